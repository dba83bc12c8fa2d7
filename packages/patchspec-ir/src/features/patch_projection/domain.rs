//! Patch projection domain types: parsed diff lines, line scopes, and the
//! session-owned matched state every later phase reads.

use crate::shared::models::ir::{BlockId, FuncId, ValueId};
use crate::shared::models::{MatchedMap, PatchSpecError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// One `+file:line` / `-file:line` entry of the patch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedLine {
    pub source_file: String,
    pub line: u32,
    pub is_add: bool,
    /// Enclosing function, resolved during projection
    pub func: Option<FuncId>,
}

impl ChangedLine {
    /// Parse a single non-blank patch line.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (is_add, rest) = match raw.as_bytes().first() {
            Some(b'+') => (true, &raw[1..]),
            Some(b'-') => (false, &raw[1..]),
            _ => {
                return Err(PatchSpecError::patch_malformed(format!(
                    "patch line must start with '+' or '-': {:?}",
                    raw
                )))
            }
        };
        let (file, line) = rest.rsplit_once(':').ok_or_else(|| {
            PatchSpecError::patch_malformed(format!("missing ':' separator: {:?}", raw))
        })?;
        if file.is_empty() {
            return Err(PatchSpecError::patch_malformed(format!(
                "empty source path: {:?}",
                raw
            )));
        }
        let line = line.parse::<u32>().map_err(|_| {
            PatchSpecError::patch_malformed(format!("bad line number: {:?}", raw))
        })?;
        Ok(Self {
            source_file: file.to_string(),
            line,
            is_add,
            func: None,
        })
    }
}

/// Parse the whole patch file body (blank lines ignored).
pub fn parse_patch_text(text: &str) -> Result<Vec<ChangedLine>> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        lines.push(ChangedLine::parse(raw)?);
    }
    Ok(lines)
}

/// `[start, end]` source-line scope
pub type LineScope = (u32, u32);

/// Per-source-file pre↔post line mappings
pub type LineMapping = BTreeMap<String, BTreeMap<u32, u32>>;

/// Matched state produced by C2 and consumed by every later phase.
///
/// All relations are monotone (insert-only) and symmetric (P1).
#[derive(Debug, Default)]
pub struct ProjectionState {
    /// before-value ↔ after-value (instructions, blocks, functions, ...)
    pub matched_values: MatchedMap<ValueId>,
    /// before-block ↔ after-block
    pub matched_blocks: MatchedMap<BlockId>,
    /// Functions touched by the patch (both variants)
    pub changed_funcs: BTreeSet<FuncId>,
    /// Blocks with no line-scope partner
    pub unmatched_blocks: BTreeSet<BlockId>,
    /// Per file: pre-line → post-line for unchanged lines
    pub unchanged_mapping: LineMapping,
    /// Per file: pre-line → post-line for lines changed on both sides
    pub changed_mapping: LineMapping,
}

impl ProjectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The post-patch line an unchanged pre-patch line maps to.
    pub fn mapped_line(&self, file: &str, pre_line: u32) -> Option<u32> {
        self.unchanged_mapping.get(file)?.get(&pre_line).copied()
    }
}
