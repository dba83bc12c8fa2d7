//! Bug specification records and the peer-function table

use crate::features::enhanced_trace::{InputKind, OutputKind};
use crate::shared::models::{PatchSpecError, Result};
use crate::shared::utils::{ab_match_name, clean_name, is_after_variant, is_before_variant};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const SPEC_TYPE_MUST_REACH: &str = "Src Must Reach Sink";
pub const SPEC_TYPE_MUST_NOT_REACH: &str = "Src Must Not Reach Sink";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecType {
    /// Post-patch-required behaviour: missing it is the bug
    MustReach,
    /// Post-patch-forbidden behaviour: having it is the bug
    MustNotReach,
}

impl SpecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecType::MustReach => SPEC_TYPE_MUST_REACH,
            SpecType::MustNotReach => SPEC_TYPE_MUST_NOT_REACH,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            SPEC_TYPE_MUST_REACH => Ok(SpecType::MustReach),
            SPEC_TYPE_MUST_NOT_REACH => Ok(SpecType::MustNotReach),
            other => Err(PatchSpecError::spec_malformed(format!(
                "unknown spec type: {:?}",
                other
            ))),
        }
    }
}

/// `(input, output, condition)` record
#[derive(Debug, Clone)]
pub struct SingleSrcSingleSinkSpec {
    pub input: InputKind,
    pub output: OutputKind,
    /// SMT-LIB2 dump of data-dependency ∧ tree encoding, when a condition
    /// survived filtering
    pub cond_smt: Option<String>,
    pub is_buggy: bool,
    /// `file:name` of the indirect function anchoring the spec, when any
    pub indirect_call: String,
}

impl SingleSrcSingleSinkSpec {
    pub fn spec_type(&self) -> SpecType {
        if self.is_buggy {
            SpecType::MustNotReach
        } else {
            SpecType::MustReach
        }
    }
}

/// `(input, {output_i}, order)` record
#[derive(Debug, Clone)]
pub struct SingleSrcMultiSinkSpec {
    pub input: InputKind,
    pub outputs: Vec<OutputKind>,
    /// output → (before_order, after_order), parallel to `outputs`
    pub order_map: Vec<(u32, u32)>,
    pub indirect_call: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpecSet {
    pub added: Vec<SingleSrcSingleSinkSpec>,
    pub removed: Vec<SingleSrcSingleSinkSpec>,
    pub cond_changed: Vec<SingleSrcSingleSinkSpec>,
    pub order_changed: Vec<SingleSrcMultiSinkSpec>,
}

impl SpecSet {
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.cond_changed.len() + self.order_changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn single_sink(&self) -> impl Iterator<Item = &SingleSrcSingleSinkSpec> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.cond_changed.iter())
    }
}

/// Functions considered interchangeable at the same dispatch slot.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: BTreeMap<String, BTreeSet<String>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each line of a peer file lists space-separated names forming one
    /// group. Both patch variants of a listed function get the group, with
    /// names projected to the matching variant.
    pub fn load(text: &str) -> Self {
        let mut table = Self::new();
        for line in text.lines() {
            let names: BTreeSet<&str> = line.split_whitespace().collect();
            if names.len() < 2 {
                continue;
            }
            for &cur in &names {
                let mut group: BTreeSet<String> = BTreeSet::new();
                for &peer in &names {
                    let same_variant = (is_before_variant(cur) && is_before_variant(peer))
                        || (is_after_variant(cur) && is_after_variant(peer))
                        || (!cur.contains(".patch.") && !peer.contains(".patch."));
                    if same_variant {
                        group.insert(peer.to_string());
                    }
                }
                if group.len() < 2 {
                    continue;
                }
                table.peers.entry(cur.to_string()).or_default().extend(group.clone());
                let counterpart = ab_match_name(cur);
                if counterpart != cur {
                    let projected: BTreeSet<String> =
                        group.iter().map(|p| ab_match_name(p)).collect();
                    table
                        .peers
                        .entry(counterpart)
                        .or_default()
                        .extend(projected);
                }
            }
        }
        table
    }

    pub fn is_peer(&self, name1: &str, name2: &str) -> bool {
        let short1 = short_name(name1);
        let short2 = short_name(name2);
        match self.peers.get(short1.as_str()) {
            Some(group) => group.iter().any(|p| short_name(p) == short2),
            None => false,
        }
    }

    pub fn peers_of(&self, name: &str) -> Vec<String> {
        self.peers
            .get(short_name(name).as_str())
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Bare function name out of a `file:name` path-qualified form.
fn short_name(name: &str) -> String {
    let base = name.rsplit_once(':').map(|(_, n)| n).unwrap_or(name);
    clean_name(base)
}

/// Peer-aware semantic input equality.
pub fn inputs_equal(a: &InputKind, b: &InputKind, peers: &PeerTable) -> bool {
    match (a, b) {
        (
            InputKind::IndirectArg { func: f1, arg: a1 },
            InputKind::IndirectArg { func: f2, arg: a2 },
        ) => (f1 == f2 || peers.is_peer(f1, f2)) && a1 == a2,
        (
            InputKind::ErrorCode { cause: c1, code: k1 },
            InputKind::ErrorCode { cause: c2, code: k2 },
        ) => k1 == k2 && inputs_equal(c1, c2, peers),
        _ => a == b,
    }
}

/// Peer-aware semantic output equality.
pub fn outputs_equal(a: &OutputKind, b: &OutputKind, peers: &PeerTable) -> bool {
    match (a, b) {
        (OutputKind::IndirectRet { func: f1 }, OutputKind::IndirectRet { func: f2 }) => {
            f1 == f2 || peers.is_peer(f1, f2)
        }
        _ => a == b,
    }
}
