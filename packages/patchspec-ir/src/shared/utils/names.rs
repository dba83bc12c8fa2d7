//! Name cleaning helpers
//!
//! The module image carries both patch variants of every function, with the
//! `before.patch.` / `after.patch.` prefixes. Matching across the variants
//! compares *cleaned* names: prefixes stripped, compiler-added `.N` suffixes
//! removed.

use once_cell::sync::Lazy;
use regex::Regex;

pub const BEFORE_PREFIX: &str = "before.patch.";
pub const AFTER_PREFIX: &str = "after.patch.";

static NUMERIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\d+").expect("static regex"));

/// Strip the patch-variant prefix, if present.
pub fn clean_name(name: &str) -> String {
    let mut out = name.to_string();
    if let Some(rest) = out.strip_prefix(BEFORE_PREFIX) {
        out = rest.to_string();
    } else if let Some(rest) = out.strip_prefix(AFTER_PREFIX) {
        out = rest.to_string();
    }
    out
}

/// Aggressive cleaning for structural matching: variant prefix gone, `.N`
/// renaming suffixes gone, whitespace gone.
pub fn clean_name_patch(name: &str) -> String {
    let stripped = clean_name(name);
    let no_suffix = NUMERIC_SUFFIX.replace_all(&stripped, "");
    no_suffix.chars().filter(|c| !c.is_whitespace()).collect()
}

/// The counterpart variant name: `before.patch.f` <-> `after.patch.f`.
/// Names without a variant prefix are returned unchanged.
pub fn ab_match_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix(AFTER_PREFIX) {
        format!("{}{}", BEFORE_PREFIX, rest)
    } else if let Some(rest) = name.strip_prefix(BEFORE_PREFIX) {
        format!("{}{}", AFTER_PREFIX, rest)
    } else {
        name.to_string()
    }
}

pub fn is_before_variant(name: &str) -> bool {
    name.starts_with(BEFORE_PREFIX)
}

pub fn is_after_variant(name: &str) -> bool {
    name.starts_with(AFTER_PREFIX)
}

/// Synthesized copy values (`.ex_copy` / `.loop_copy`) terminate slicing.
pub fn is_excopy_name(name: &str) -> bool {
    name.contains(".ex_copy") || name.contains(".loop_copy")
}

/// Cleaned type string used for structural type comparison.
pub fn clean_type(ty: &str) -> String {
    let no_suffix = NUMERIC_SUFFIX.replace_all(ty, "");
    no_suffix.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name_strips_variant_prefix() {
        assert_eq!(clean_name("before.patch.probe"), "probe");
        assert_eq!(clean_name("after.patch.probe"), "probe");
        assert_eq!(clean_name("kfree"), "kfree");
    }

    #[test]
    fn test_clean_name_patch_strips_renaming_suffix() {
        assert_eq!(clean_name_patch("after.patch.probe.2"), "probe");
        assert_eq!(clean_name_patch("tmp.1"), "tmp");
    }

    #[test]
    fn test_ab_match_roundtrip() {
        assert_eq!(ab_match_name("before.patch.f"), "after.patch.f");
        assert_eq!(ab_match_name("after.patch.f"), "before.patch.f");
        assert_eq!(ab_match_name(ab_match_name("before.patch.f").as_str()), "before.patch.f");
        assert_eq!(ab_match_name("kmalloc"), "kmalloc");
    }

    #[test]
    fn test_excopy_detection() {
        assert!(is_excopy_name("p.ex_copy"));
        assert!(is_excopy_name("i.loop_copy.3"));
        assert!(!is_excopy_name("plain"));
    }

    #[test]
    fn test_clean_type() {
        assert_eq!(clean_type("%struct.device *"), "%struct.device*");
        assert_eq!(clean_type("i32"), "i32");
    }
}
