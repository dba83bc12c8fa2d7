//! Analysis configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Widen generated checkers to peer functions without re-deriving specs
    pub fast_mode: bool,
    /// Per-check SMT wall-clock budget; exhaustion degrades to Unknown
    pub smt_timeout: Duration,
    /// Boolean atoms the bounded solver will case-split over
    pub smt_branch_budget: usize,
    /// Callees with this prefix never enter the call graph
    pub sanitizer_prefix: String,
    /// Functions containing this substring belong to analysis tooling
    pub ignored_function_substr: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fast_mode: false,
            smt_timeout: Duration::from_millis(500),
            smt_branch_budget: 18,
            sanitizer_prefix: "asan.".to_string(),
            ignored_function_substr: String::new(),
        }
    }
}
