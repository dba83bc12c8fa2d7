//! Patch projector
//!
//! Lifts the line-level diff onto the IR: caches per-function and per-block
//! source-line scopes, maps pre-patch lines to post-patch lines with a
//! lock-step cursor walk, matches basic blocks by mapped line scope, matches
//! instructions structurally, and surfaces the rest as added/removed values.

use super::super::domain::{parse_patch_text, ChangedLine, LineScope, ProjectionState};
use super::value_match::{register_block_values, ValueMatcher};
use crate::shared::models::ir::{BlockId, FuncId, InstId, ModuleIr, Opcode, ValueId};
use crate::shared::models::{resolved_value_name, Result};
use crate::shared::utils::{ab_match_name, is_after_variant, is_before_variant, is_excopy_name};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct PatchProjector<'a> {
    module: &'a ModuleIr,
    added_lines: Vec<ChangedLine>,
    removed_lines: Vec<ChangedLine>,
    func_line_scope: BTreeMap<FuncId, LineScope>,
    block_line_scope: BTreeMap<BlockId, LineScope>,
    func_source_file: BTreeMap<FuncId, String>,
    name_index: BTreeMap<String, FuncId>,
}

/// Outcome of a projection run
#[derive(Debug, Default)]
pub struct ProjectedChanges {
    pub added_values: BTreeSet<ValueId>,
    pub removed_values: BTreeSet<ValueId>,
}

impl<'a> PatchProjector<'a> {
    /// Parse the patch text and pre-compute the line-scope caches.
    /// `register_block_values` must have run on the module beforehand.
    pub fn new(module: &'a ModuleIr, patch_text: &str) -> Result<Self> {
        let mut projector = Self {
            module,
            added_lines: Vec::new(),
            removed_lines: Vec::new(),
            func_line_scope: BTreeMap::new(),
            block_line_scope: BTreeMap::new(),
            func_source_file: BTreeMap::new(),
            name_index: module.name_index(),
        };
        projector.cache_line_scopes();
        let parsed = parse_patch_text(patch_text)?;
        for line in parsed {
            if line.is_add {
                projector.added_lines.push(line);
            } else {
                projector.removed_lines.push(line);
            }
        }
        Ok(projector)
    }

    /// Prepare a module for projection (block value registration).
    pub fn prepare(module: &mut ModuleIr) {
        register_block_values(module);
    }

    /// Run the full projection: changed functions, line map, block match,
    /// instruction match/diff.
    pub fn project(&mut self, state: &mut ProjectionState) -> ProjectedChanges {
        self.resolve_enclosing_funcs(state);
        self.compute_line_map(state);
        self.match_blocks_by_line(state);

        let mut changes = ProjectedChanges::default();
        self.match_unchanged_irs(state, &mut changes);
        self.match_and_diff_changed_irs(state, &mut changes);

        info!(
            added = changes.added_values.len(),
            removed = changes.removed_values.len(),
            matched_before = state.matched_values.len(),
            "patch projection done"
        );
        debug_assert!(state.matched_values.is_symmetric());
        changes
    }

    // ──────────────────────────────────────────────────────────────────
    // Line-scope caching
    // ──────────────────────────────────────────────────────────────────

    fn cache_line_scopes(&mut self) {
        let module = self.module;
        let per_func: Vec<(FuncId, Option<(String, LineScope)>, Vec<(BlockId, LineScope)>)> =
            module
                .func_ids()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|func| {
                    let f = module.func(func);
                    if f.is_empty() || f.is_declaration {
                        return (func, None, Vec::new());
                    }
                    let mut func_scope: Option<LineScope> = None;
                    let mut source_file = String::new();
                    let mut block_scopes = Vec::new();
                    for &bb in &f.blocks {
                        let block = module.block(bb);
                        if is_excopy_name(&block.name) {
                            continue;
                        }
                        let mut bb_scope: Option<LineScope> = None;
                        for &inst in &block.insts {
                            if module.is_debug_intrinsic_call(inst) {
                                continue;
                            }
                            let (file, line) = match &module.inst(inst).debug {
                                Some(d) if d.line != 0 && !d.file.is_empty() => {
                                    (d.file.clone(), d.line)
                                }
                                _ => continue,
                            };
                            source_file = file;
                            bb_scope = Some(match bb_scope {
                                None => (line, line),
                                Some((lo, hi)) => (lo, hi.max(line)),
                            });
                            func_scope = Some(match func_scope {
                                None => (line, line),
                                Some((lo, hi)) => (lo.min(line), hi.max(line)),
                            });
                        }
                        if let Some(scope) = bb_scope {
                            block_scopes.push((bb, scope));
                        }
                    }
                    (func, func_scope.map(|s| (source_file, s)), block_scopes)
                })
                .collect();

        for (func, scope, block_scopes) in per_func {
            if let Some((file, scope)) = scope {
                if !file.is_empty() {
                    self.func_line_scope.insert(func, scope);
                    self.func_source_file.insert(func, file);
                }
            }
            for (bb, scope) in block_scopes {
                self.block_line_scope.insert(bb, scope);
            }
        }
    }

    pub fn source_file_of(&self, func: FuncId) -> Option<&str> {
        self.func_source_file.get(&func).map(|s| s.as_str())
    }

    // ──────────────────────────────────────────────────────────────────
    // Enclosing functions and the changed set
    // ──────────────────────────────────────────────────────────────────

    fn enclosed_funcs(&self, source_file: &str, line: u32, is_added: bool) -> Vec<FuncId> {
        self.func_line_scope
            .iter()
            .filter(|(func, (lo, hi))| {
                let name = &self.module.func(**func).name;
                let variant_ok = if is_added {
                    is_after_variant(name)
                } else {
                    is_before_variant(name)
                };
                variant_ok
                    && self.func_source_file.get(func).map(|s| s.as_str()) == Some(source_file)
                    && line >= *lo
                    && line <= *hi
            })
            .map(|(func, _)| *func)
            .collect()
    }

    fn resolve_enclosing_funcs(&mut self, state: &mut ProjectionState) {
        let mut resolved_added = Vec::new();
        for line in &self.added_lines {
            let funcs = self.enclosed_funcs(&line.source_file, line.line, true);
            if funcs.is_empty() {
                warn!(file = %line.source_file, line = line.line, "added line has no enclosing function; dropped");
            }
            for func in funcs {
                let mut bound = line.clone();
                bound.func = Some(func);
                state.changed_funcs.insert(func);
                if let Some(counterpart) =
                    self.name_index.get(&ab_match_name(&self.module.func(func).name))
                {
                    state.changed_funcs.insert(*counterpart);
                }
                resolved_added.push(bound);
            }
        }
        let mut resolved_removed = Vec::new();
        for line in &self.removed_lines {
            let funcs = self.enclosed_funcs(&line.source_file, line.line, false);
            if funcs.is_empty() {
                warn!(file = %line.source_file, line = line.line, "removed line has no enclosing function; dropped");
            }
            for func in funcs {
                let mut bound = line.clone();
                bound.func = Some(func);
                state.changed_funcs.insert(func);
                if let Some(counterpart) =
                    self.name_index.get(&ab_match_name(&self.module.func(func).name))
                {
                    state.changed_funcs.insert(*counterpart);
                }
                resolved_removed.push(bound);
            }
        }
        self.added_lines = resolved_added;
        self.removed_lines = resolved_removed;
    }

    fn is_line_added(&self, file: &str, line: u32) -> bool {
        self.added_lines
            .iter()
            .any(|l| l.line == line && l.source_file == file)
    }

    fn is_line_removed(&self, file: &str, line: u32) -> bool {
        self.removed_lines
            .iter()
            .any(|l| l.line == line && l.source_file == file)
    }

    // ──────────────────────────────────────────────────────────────────
    // Pre ↔ post line mapping
    // ──────────────────────────────────────────────────────────────────

    fn compute_line_map(&mut self, state: &mut ProjectionState) {
        // changed functions: lock-step cursor walk
        let changed: Vec<FuncId> = state.changed_funcs.iter().copied().collect();
        for before_func in changed {
            let name = &self.module.func(before_func).name;
            if !is_before_variant(name) {
                continue;
            }
            let after_func = match self.name_index.get(&ab_match_name(name)) {
                Some(f) => *f,
                None => continue,
            };
            let (before_scope, after_scope) = match (
                self.func_line_scope.get(&before_func),
                self.func_line_scope.get(&after_func),
            ) {
                (Some(b), Some(a)) => (*b, *a),
                _ => continue,
            };
            let file = match self.func_source_file.get(&before_func) {
                Some(f) => f.clone(),
                None => continue,
            };

            let mut unchanged = BTreeMap::new();
            let mut changed_lines = BTreeMap::new();
            let mut before_line = before_scope.0;
            let mut after_line = after_scope.0;
            while before_line <= before_scope.1 {
                let added = self.is_line_added(&file, after_line);
                let removed = self.is_line_removed(&file, before_line);
                match (added, removed) {
                    (false, false) => {
                        unchanged.insert(before_line, after_line);
                        before_line += 1;
                        after_line += 1;
                    }
                    (true, false) => after_line += 1,
                    (false, true) => before_line += 1,
                    (true, true) => {
                        changed_lines.insert(before_line, after_line);
                        before_line += 1;
                        after_line += 1;
                    }
                }
            }
            if after_line <= after_scope.1 {
                unchanged.insert(before_line, after_line);
            }

            state
                .unchanged_mapping
                .entry(file.clone())
                .or_default()
                .extend(unchanged);
            state
                .changed_mapping
                .entry(file)
                .or_default()
                .extend(changed_lines);
        }

        // untouched functions map 1:1 by scope offset
        for (before_func, scope) in &self.func_line_scope {
            if state.changed_funcs.contains(before_func) {
                continue;
            }
            let name = &self.module.func(*before_func).name;
            if !is_before_variant(name) {
                continue;
            }
            let after_func = match self.name_index.get(&ab_match_name(name)) {
                Some(f) => *f,
                None => continue,
            };
            let after_start = match self.func_line_scope.get(&after_func) {
                Some((lo, _)) => *lo,
                None => continue,
            };
            let file = match self.func_source_file.get(before_func) {
                Some(f) => f.clone(),
                None => continue,
            };
            let mapping = state.unchanged_mapping.entry(file).or_default();
            let mut after_line = after_start;
            for before_line in scope.0..=scope.1 {
                mapping.insert(before_line, after_line);
                after_line += 1;
            }
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Block matching by mapped line scope
    // ──────────────────────────────────────────────────────────────────

    fn match_blocks_by_line(&mut self, state: &mut ProjectionState) {
        // file → mapped (start, end) → blocks from both variants
        let mut groups: BTreeMap<String, BTreeMap<LineScope, Vec<BlockId>>> = BTreeMap::new();

        for (bb, scope) in &self.block_line_scope {
            let func = self.module.func_of_block(*bb);
            let name = &self.module.func(func).name;
            let file = match self.func_source_file.get(&func) {
                Some(f) => f.clone(),
                None => continue,
            };
            let mapped = if is_after_variant(name) {
                *scope
            } else if let Some(file_map) = state.unchanged_mapping.get(&file) {
                match (file_map.get(&scope.0), file_map.get(&scope.1)) {
                    (Some(lo), Some(hi)) => (*lo, *hi),
                    _ => continue,
                }
            } else {
                continue;
            };
            groups.entry(file).or_default().entry(mapped).or_default().push(*bb);
        }

        let matcher = ValueMatcher::new(self.module);
        for (_file, scope_groups) in groups {
            for (_scope, blocks) in scope_groups {
                if blocks.is_empty() {
                    continue;
                }
                let mut before_blocks = Vec::new();
                let mut after_blocks = Vec::new();
                for bb in &blocks {
                    let fname = &self.module.func(self.module.func_of_block(*bb)).name;
                    if is_before_variant(fname) {
                        before_blocks.push(*bb);
                    } else if is_after_variant(fname) {
                        after_blocks.push(*bb);
                    }
                }
                if before_blocks.is_empty() || after_blocks.is_empty() {
                    for bb in blocks {
                        if state.changed_funcs.contains(&self.module.func_of_block(bb)) {
                            debug!(block = %self.module.block(bb).name, "line scope has no partner block");
                        }
                        state.unmatched_blocks.insert(bb);
                    }
                    continue;
                }

                for b1 in &before_blocks {
                    if state.matched_blocks.contains_before(*b1) {
                        continue;
                    }
                    let mut found = false;
                    for b2 in &after_blocks {
                        if state.matched_blocks.contains_after(*b2) {
                            continue;
                        }
                        if matcher.blocks_match(state, *b1, *b2) {
                            found = true;
                            break;
                        }
                    }
                    if !found {
                        state.unmatched_blocks.insert(*b1);
                    }
                }
                for b2 in &after_blocks {
                    if !state.matched_blocks.contains_after(*b2) {
                        state.unmatched_blocks.insert(*b2);
                    }
                }
            }
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Instruction matching / diffing
    // ──────────────────────────────────────────────────────────────────

    /// Same-line instruction matching over the unchanged line map; leftovers
    /// surface as added/removed.
    fn match_unchanged_irs(&self, state: &mut ProjectionState, changes: &mut ProjectedChanges) {
        let matcher = ValueMatcher::new(self.module);
        let mapping: Vec<(String, Vec<(u32, u32)>)> = state
            .unchanged_mapping
            .iter()
            .map(|(file, m)| (file.clone(), m.iter().map(|(a, b)| (*a, *b)).collect()))
            .collect();

        for (file, pairs) in mapping {
            for (before_line, after_line) in pairs {
                let before_irs = self.insts_at_line(&file, before_line, false);
                let after_irs = self.insts_at_line(&file, after_line, true);

                for &i1 in &before_irs {
                    if matcher.is_skip_match_inst(i1) {
                        continue;
                    }
                    let v1 = self.module.inst(i1).value;
                    let mut found = state.matched_values.contains_before(v1);
                    if !found {
                        for &i2 in &after_irs {
                            if matcher.is_skip_match_inst(i2) {
                                continue;
                            }
                            if state.matched_values.contains_after(self.module.inst(i2).value) {
                                continue;
                            }
                            if matcher.insts_match(state, i1, i2, true) {
                                found = true;
                                break;
                            }
                        }
                    }
                    if !found {
                        debug!(line = before_line, "removed IR at unchanged line");
                        changes.removed_values.insert(v1);
                    }
                }

                for &i2 in &after_irs {
                    if matcher.is_skip_match_inst(i2) {
                        continue;
                    }
                    let v2 = self.module.inst(i2).value;
                    if !state.matched_values.contains_after(v2) {
                        debug!(line = after_line, "added IR at unchanged line");
                        changes.added_values.insert(v2);
                    }
                }
            }
        }
    }

    /// Instructions at changed / added / removed lines surface directly.
    fn match_and_diff_changed_irs(
        &mut self,
        state: &mut ProjectionState,
        changes: &mut ProjectedChanges,
    ) {
        let changed_pairs: Vec<(String, u32, u32)> = state
            .changed_mapping
            .iter()
            .flat_map(|(file, m)| m.iter().map(move |(b, a)| (file.clone(), *b, *a)))
            .collect();

        for (file, before_line, after_line) in changed_pairs {
            // the paired entries supersede the raw diff lines
            self.added_lines
                .retain(|l| !(l.line == after_line && l.source_file == file));
            self.removed_lines
                .retain(|l| !(l.line == before_line && l.source_file == file));

            for inst in self.insts_at_line(&file, before_line, false) {
                changes.removed_values.insert(self.module.inst(inst).value);
            }
            for inst in self.insts_at_line(&file, after_line, true) {
                changes.added_values.insert(self.module.inst(inst).value);
            }
        }

        for line in &self.removed_lines {
            if let Some(func) = line.func {
                for inst in self.insts_at_line_in_func(func, line.line) {
                    changes.removed_values.insert(self.module.inst(inst).value);
                }
            }
        }
        for line in &self.added_lines {
            if let Some(func) = line.func {
                for inst in self.insts_at_line_in_func(func, line.line) {
                    changes.added_values.insert(self.module.inst(inst).value);
                }
            }
        }
    }

    fn insts_at_line(&self, file: &str, line: u32, is_after: bool) -> Vec<InstId> {
        let mut out = Vec::new();
        for func in self.enclosed_funcs(file, line, is_after) {
            out.extend(self.insts_at_line_in_func(func, line));
        }
        out
    }

    /// All instructions of `func` attributed to `line`, with line-number
    /// guessing and the backwards-run repair.
    fn insts_at_line_in_func(&self, func: FuncId, line: u32) -> Vec<InstId> {
        let mut out = Vec::new();
        for &bb in &self.module.func(func).blocks {
            let (bb_lo, bb_hi) = match self.block_line_scope.get(&bb) {
                Some(s) => *s,
                None => continue,
            };
            if bb_lo > line || bb_hi < line {
                continue;
            }

            let mut inst_lines: Vec<(InstId, u32)> = Vec::new();
            for &inst in &self.module.block(bb).insts {
                let ir = self.module.inst(inst);
                match ir.opcode {
                    Opcode::Ret => continue,
                    Opcode::Br => continue,
                    _ => {}
                }
                if self.module.is_intrinsic_call(inst) {
                    continue;
                }
                if resolved_value_name(self.module, ir.value)
                    .map(is_excopy_name)
                    .unwrap_or(false)
                {
                    continue;
                }
                let guessed = match self.guess_inst_line(inst) {
                    Some(l) => l,
                    None => continue,
                };
                inst_lines.push((inst, guessed));
            }

            // repair backwards-running line numbers inside the block
            let mut last_line: Option<u32> = None;
            for i in 0..inst_lines.len() {
                let cur = inst_lines[i].1;
                if let Some(prev) = last_line {
                    if cur < prev {
                        for item in inst_lines.iter_mut().take(i) {
                            if item.1 > cur {
                                item.1 = cur;
                            }
                        }
                    }
                }
                last_line = Some(cur);
            }

            for (inst, inst_line) in inst_lines {
                if inst_line == line {
                    out.push(inst);
                }
            }
        }
        out
    }

    /// Best-effort line for an instruction without debug info.
    fn guess_inst_line(&self, inst: InstId) -> Option<u32> {
        let ir = self.module.inst(inst);
        if let Some(d) = &ir.debug {
            if d.line != 0 {
                return Some(d.line);
            }
        }
        let bb = ir.block;
        let scope = self.block_line_scope.get(&bb).copied();

        match ir.opcode {
            Opcode::Phi => {
                // the next instruction with a line speaks for the phi
                let insts = &self.module.block(bb).insts;
                let pos = insts.iter().position(|i| *i == inst)?;
                for &next in &insts[pos + 1..] {
                    if let Some(d) = &self.module.inst(next).debug {
                        if d.line != 0 {
                            return Some(d.line);
                        }
                    }
                }
                None
            }
            Opcode::Icmp(_) => {
                // a branch or arithmetic user carries the line
                for user in self.module.users_of(ir.value) {
                    let u = self.module.inst(user);
                    if matches!(u.opcode, Opcode::CondBr | Opcode::BinOp(_)) {
                        if let Some(l) = self.guess_inst_line(user) {
                            return Some(l);
                        }
                    }
                }
                None
            }
            Opcode::Alloca => scope.map(|s| s.0),
            Opcode::CondBr => scope.map(|s| s.1),
            _ => match scope {
                Some((lo, hi)) if lo == hi => Some(lo),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::{dbg, BinOp, IcmpPred, Opcode};

    /// before: `return 0;` at lines 10..12; after: adds `if (bad) return -22;`
    /// plus an untouched `init` pair further down the same file.
    fn patched_module() -> ModuleIr {
        let mut m = ModuleIr::new();

        let fb = m.add_function("before.patch.probe", "driver/x.c");
        let eb = m.add_block(fb, "entry");
        let _bad_b = m.add_argument(fb, "bad", "i32");
        let zero_b = m.const_int(0, "i32");
        let one_b = m.const_int(1, "i32");
        m.add_inst(eb, Opcode::BinOp(BinOp::Add), vec![zero_b, one_b], "i32", dbg("driver/x.c", 10));
        m.add_inst(eb, Opcode::Ret, vec![zero_b], "void", dbg("driver/x.c", 12));

        let fa = m.add_function("after.patch.probe", "driver/x.c");
        let ea = m.add_block(fa, "entry");
        let then_a = m.add_block(fa, "if.then");
        let end_a = m.add_block(fa, "if.end");
        m.add_edge(ea, then_a);
        m.add_edge(ea, end_a);
        m.add_edge(then_a, end_a);
        let bad_a = m.add_argument(fa, "bad", "i32");
        let zero_a = m.const_int(0, "i32");
        let one_a = m.const_int(1, "i32");
        m.add_inst(ea, Opcode::BinOp(BinOp::Add), vec![zero_a, one_a], "i32", dbg("driver/x.c", 10));
        let cmp = m.add_inst(ea, Opcode::Icmp(IcmpPred::Ne), vec![bad_a, zero_a], "i1", dbg("driver/x.c", 11));
        let cmp_v = m.inst(cmp).value;
        let tv = m.block_value(then_a);
        let ev = m.block_value(end_a);
        m.add_inst(ea, Opcode::CondBr, vec![cmp_v, tv, ev], "void", dbg("driver/x.c", 11));
        let e22 = m.const_int(-22, "i32");
        m.add_inst(then_a, Opcode::Ret, vec![e22], "void", dbg("driver/x.c", 12));
        m.add_inst(end_a, Opcode::Ret, vec![zero_a], "void", dbg("driver/x.c", 14));

        // untouched pair: identical shape on both sides
        let gb = m.add_function("before.patch.init", "driver/x.c");
        let ga = m.add_function("after.patch.init", "driver/x.c");
        let geb = m.add_block(gb, "entry");
        let gea = m.add_block(ga, "entry");
        let xb = m.add_argument(gb, "x", "i32");
        let xa = m.add_argument(ga, "x", "i32");
        let cb = m.const_int(2, "i32");
        let ca = m.const_int(2, "i32");
        m.add_inst(geb, Opcode::BinOp(BinOp::Mul), vec![xb, cb], "i32", dbg("driver/x.c", 30));
        m.add_inst(gea, Opcode::BinOp(BinOp::Mul), vec![xa, ca], "i32", dbg("driver/x.c", 32));

        PatchProjector::prepare(&mut m);
        m
    }

    #[test]
    fn test_changed_funcs_cover_both_variants() {
        let m = patched_module();
        let mut projector =
            PatchProjector::new(&m, "+driver/x.c:11\n+driver/x.c:12\n").unwrap();
        let mut state = ProjectionState::new();
        projector.project(&mut state);

        let fb = m.function_by_name("before.patch.probe").unwrap();
        let fa = m.function_by_name("after.patch.probe").unwrap();
        assert!(state.changed_funcs.contains(&fa));
        assert!(state.changed_funcs.contains(&fb));
    }

    #[test]
    fn test_added_lines_surface_added_values() {
        let m = patched_module();
        let mut projector =
            PatchProjector::new(&m, "+driver/x.c:11\n+driver/x.c:12\n").unwrap();
        let mut state = ProjectionState::new();
        let changes = projector.project(&mut state);

        assert!(!changes.added_values.is_empty());
        // the icmp at line 11 is among the added values
        let fa = m.function_by_name("after.patch.probe").unwrap();
        let added_in_after = changes.added_values.iter().any(|v| {
            matches!(m.value(*v).kind, crate::shared::models::ir::ValueKind::Inst(i)
                if m.func_of_inst(i) == fa)
        });
        assert!(added_in_after);
    }

    #[test]
    fn test_untouched_function_matches_cleanly() {
        let m = patched_module();
        let mut projector =
            PatchProjector::new(&m, "+driver/x.c:11\n+driver/x.c:12\n").unwrap();
        let mut state = ProjectionState::new();
        let changes = projector.project(&mut state);

        assert!(state.matched_values.len() > 0);
        assert!(state.matched_values.is_symmetric());

        // the untouched init pair matches 1:1 and contributes no diff
        let gb = m.function_by_name("before.patch.init").unwrap();
        let ga = m.function_by_name("after.patch.init").unwrap();
        assert!(!state.changed_funcs.contains(&gb));
        let diff_in_init = changes
            .added_values
            .iter()
            .chain(changes.removed_values.iter())
            .any(|v| {
                matches!(m.value(*v).kind, crate::shared::models::ir::ValueKind::Inst(i)
                    if m.func_of_inst(i) == gb || m.func_of_inst(i) == ga)
            });
        assert!(!diff_in_init);

        // and its instructions were actually paired up
        let mul_b = m.func(gb).blocks[0];
        let mul_inst = m.block(mul_b).insts[0];
        assert!(state.matched_values.contains_before(m.inst(mul_inst).value));
    }

    #[test]
    fn test_malformed_patch_is_fatal() {
        let m = patched_module();
        let err = PatchProjector::new(&m, "driver/x.c:11\n").unwrap_err();
        assert_eq!(err.kind, crate::shared::models::ErrorKind::PatchMalformed);
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let m = patched_module();
        let mut projector = PatchProjector::new(&m, "").unwrap();
        let mut state = ProjectionState::new();
        let changes = projector.project(&mut state);
        assert!(changes.added_values.is_empty());
        assert!(changes.removed_values.is_empty());
        assert!(state.changed_funcs.is_empty());
    }
}
