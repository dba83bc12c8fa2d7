//! Symmetric matched-pair maps
//!
//! The before/after relations are total partial bijections stored as two
//! maps for O(1) lookup in either direction. Inserting through this type is
//! the only way to extend a relation, which keeps the two directions
//! symmetric by construction.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct MatchedMap<T: Ord + Copy> {
    before: BTreeMap<T, T>,
    after: BTreeMap<T, T>,
}

impl<T: Ord + Copy> MatchedMap<T> {
    pub fn new() -> Self {
        Self {
            before: BTreeMap::new(),
            after: BTreeMap::new(),
        }
    }

    /// Record `before ↔ after`. Returns false (and changes nothing) when
    /// either side is already bound to a different partner.
    pub fn insert(&mut self, before: T, after: T) -> bool {
        match (self.before.get(&before), self.after.get(&after)) {
            (Some(b), _) if *b != after => false,
            (_, Some(a)) if *a != before => false,
            _ => {
                self.before.insert(before, after);
                self.after.insert(after, before);
                true
            }
        }
    }

    pub fn after_of(&self, before: T) -> Option<T> {
        self.before.get(&before).copied()
    }

    pub fn before_of(&self, after: T) -> Option<T> {
        self.after.get(&after).copied()
    }

    pub fn contains_before(&self, before: T) -> bool {
        self.before.contains_key(&before)
    }

    pub fn contains_after(&self, after: T) -> bool {
        self.after.contains_key(&after)
    }

    /// Either-direction partner lookup.
    pub fn partner(&self, item: T) -> Option<T> {
        self.after_of(item).or_else(|| self.before_of(item))
    }

    pub fn len(&self) -> usize {
        self.before.len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }

    pub fn iter_before(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.before.iter().map(|(b, a)| (*b, *a))
    }

    /// Symmetry invariant: `after_of(b) == a ⇔ before_of(a) == b`.
    pub fn is_symmetric(&self) -> bool {
        self.before.len() == self.after.len()
            && self
                .before
                .iter()
                .all(|(b, a)| self.after.get(a) == Some(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_symmetric() {
        let mut map = MatchedMap::new();
        assert!(map.insert(1u32, 10u32));
        assert!(map.insert(2, 20));
        assert_eq!(map.after_of(1), Some(10));
        assert_eq!(map.before_of(20), Some(2));
        assert!(map.is_symmetric());
    }

    #[test]
    fn test_conflicting_insert_rejected() {
        let mut map = MatchedMap::new();
        assert!(map.insert(1u32, 10u32));
        assert!(!map.insert(1, 11));
        assert!(!map.insert(2, 10));
        assert!(map.insert(1, 10)); // re-inserting the same pair is fine
        assert_eq!(map.len(), 1);
        assert!(map.is_symmetric());
    }

    #[test]
    fn test_partner_checks_both_directions() {
        let mut map = MatchedMap::new();
        map.insert(1u32, 10u32);
        assert_eq!(map.partner(1), Some(10));
        assert_eq!(map.partner(10), Some(1));
        assert_eq!(map.partner(5), None);
    }
}
