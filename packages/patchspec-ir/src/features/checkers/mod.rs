//! Downstream checker records
//!
//! `--detect-patch-bug` compiles loaded specs into in-memory checker records
//! and registers them with the manager. Checker execution belongs to the
//! detection runtime; this registry only holds the spec data the checkers
//! receive.

use crate::features::enhanced_trace::{InputKind, OutputKind};
use crate::features::spec_abstraction::{PeerTable, SpecSet};
use tracing::info;

#[derive(Debug, Clone)]
pub enum CompiledChecker {
    /// Source must (or must not) reach sink, optionally under a condition
    SingleSrcSingleSink {
        input: InputKind,
        output: OutputKind,
        cond_smt: Option<String>,
        /// true: reaching the sink is the bug; false: failing to reach it is
        must_not_reach: bool,
        peers: Vec<String>,
        fast_mode: bool,
    },
    /// Source must reach its sinks in the recorded order
    SingleSrcMultiSink {
        input: InputKind,
        outputs: Vec<OutputKind>,
        order_map: Vec<(u32, u32)>,
        peers: Vec<String>,
        fast_mode: bool,
    },
}

#[derive(Debug, Default)]
pub struct CheckerManager {
    checkers: Vec<CompiledChecker>,
}

impl CheckerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, checker: CompiledChecker) {
        self.checkers.push(checker);
    }

    pub fn checkers(&self) -> &[CompiledChecker] {
        &self.checkers
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Compile every loaded spec into a checker record.
    pub fn register_specs(&mut self, specs: &SpecSet, peers: &PeerTable, fast_mode: bool) {
        for spec in specs.single_sink() {
            let peer_names = peers.peers_of(&spec.indirect_call);
            self.register(CompiledChecker::SingleSrcSingleSink {
                input: spec.input.clone(),
                output: spec.output.clone(),
                cond_smt: spec.cond_smt.clone(),
                must_not_reach: spec.is_buggy,
                peers: peer_names,
                fast_mode,
            });
        }
        for spec in &specs.order_changed {
            let peer_names = peers.peers_of(&spec.indirect_call);
            self.register(CompiledChecker::SingleSrcMultiSink {
                input: spec.input.clone(),
                outputs: spec.outputs.clone(),
                order_map: spec.order_map.clone(),
                peers: peer_names,
                fast_mode,
            });
        }
        info!(checkers = self.len(), "specs registered as checkers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::spec_abstraction::SingleSrcSingleSinkSpec;

    #[test]
    fn test_register_specs_compiles_all() {
        let mut specs = SpecSet::default();
        specs.added.push(SingleSrcSingleSinkSpec {
            input: InputKind::GlobalVarIn { global: "g".into() },
            output: OutputKind::SensitiveOp {
                opcode: "div".into(),
                operand_index: 1,
            },
            cond_smt: None,
            is_buggy: false,
            indirect_call: String::new(),
        });
        let mut manager = CheckerManager::new();
        manager.register_specs(&specs, &PeerTable::new(), true);
        assert_eq!(manager.len(), 1);
        match &manager.checkers()[0] {
            CompiledChecker::SingleSrcSingleSink {
                must_not_reach,
                fast_mode,
                ..
            } => {
                assert!(!must_not_reach);
                assert!(fast_mode);
            }
            _ => panic!("wrong checker kind"),
        }
    }
}
