//! CFG reachability and control dependence
//!
//! Per-function block reachability (memoised BFS over the successor lists the
//! module image carries) and classic Ferrante–Ottenstein–Warren control
//! dependence computed from postdominators over a virtual-exit reverse CFG.
//!
//! Polarity convention: successor 0 of a conditional branch is the true
//! target, successor 1 the false target.

use crate::shared::models::ir::{BlockId, FuncId, InstId, ModuleIr, Opcode};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};

/// Control-dependence edge polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CdPolarity {
    True,
    False,
    None,
}

impl CdPolarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdPolarity::True => "T",
            CdPolarity::False => "F",
            CdPolarity::None => "-",
        }
    }
}

/// Per-function control-dependence table: block → its controllers
type CdTable = BTreeMap<BlockId, Vec<(BlockId, CdPolarity)>>;

#[derive(Default)]
pub struct CfgIndex {
    block_reach: FxHashMap<(BlockId, BlockId), bool>,
    cd_tables: FxHashMap<FuncId, CdTable>,
}

impl CfgIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is `to` reachable from `from` along CFG edges (reflexive)?
    pub fn block_reachable(&mut self, module: &ModuleIr, from: BlockId, to: BlockId) -> bool {
        if from == to {
            return true;
        }
        if let Some(&cached) = self.block_reach.get(&(from, to)) {
            return cached;
        }
        let mut visited = vec![false; module.blocks.len()];
        let mut queue = VecDeque::new();
        queue.push_back(from);
        let mut found = false;
        while let Some(bb) = queue.pop_front() {
            if visited[bb.index()] {
                continue;
            }
            visited[bb.index()] = true;
            if bb == to {
                found = true;
                break;
            }
            for succ in &module.block(bb).succs {
                queue.push_back(*succ);
            }
        }
        self.block_reach.insert((from, to), found);
        found
    }

    /// Intra-procedural instruction reachability: program order within a
    /// block, block reachability otherwise.
    pub fn inst_reachable(&mut self, module: &ModuleIr, from: InstId, to: InstId) -> bool {
        let from_bb = module.inst(from).block;
        let to_bb = module.inst(to).block;
        if from_bb == to_bb {
            let insts = &module.block(from_bb).insts;
            let pf = insts.iter().position(|i| *i == from);
            let pt = insts.iter().position(|i| *i == to);
            return matches!((pf, pt), (Some(a), Some(b)) if a <= b);
        }
        if module.func_of_block(from_bb) != module.func_of_block(to_bb) {
            return false;
        }
        self.block_reachable(module, from_bb, to_bb)
    }

    /// Blocks `bb` is directly control-dependent on, with polarity.
    pub fn controllers_of(
        &mut self,
        module: &ModuleIr,
        bb: BlockId,
    ) -> Vec<(BlockId, CdPolarity)> {
        let func = module.func_of_block(bb);
        self.cd_table(module, func)
            .get(&bb)
            .cloned()
            .unwrap_or_default()
    }

    /// Polarity under which `controller` controls `controlled`, if at all.
    pub fn controls(
        &mut self,
        module: &ModuleIr,
        controller: BlockId,
        controlled: BlockId,
    ) -> CdPolarity {
        self.controllers_of(module, controlled)
            .iter()
            .find(|(b, _)| *b == controller)
            .map(|(_, p)| *p)
            .unwrap_or(CdPolarity::None)
    }

    fn cd_table(&mut self, module: &ModuleIr, func: FuncId) -> &CdTable {
        if !self.cd_tables.contains_key(&func) {
            let table = build_cd_table(module, func);
            self.cd_tables.insert(func, table);
        }
        self.cd_tables.get(&func).expect("just inserted")
    }
}

/// Postdominator-based control dependence for one function.
fn build_cd_table(module: &ModuleIr, func: FuncId) -> CdTable {
    let blocks = &module.func(func).blocks;
    let mut table = CdTable::new();
    if blocks.is_empty() {
        return table;
    }

    // local indices, virtual exit at position n
    let n = blocks.len();
    let local: BTreeMap<BlockId, usize> = blocks.iter().enumerate().map(|(i, b)| (*b, i)).collect();
    let exit = n;

    // reverse CFG successors (= CFG predecessors), exits flowing to the
    // virtual exit
    let mut rsuccs: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    let mut rpreds: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    for (i, bb) in blocks.iter().enumerate() {
        let succs = &module.block(*bb).succs;
        if succs.is_empty() {
            rsuccs[i].push(exit);
            rpreds[exit].push(i);
        }
        for s in succs {
            if let Some(&j) = local.get(s) {
                rsuccs[i].push(j);
                rpreds[j].push(i);
            }
        }
    }

    // iterative postdominator computation: ipdom over the reverse graph
    let order = reverse_postorder_from_exit(&rpreds, exit, n + 1);
    let mut ipdom: Vec<Option<usize>> = vec![None; n + 1];
    ipdom[exit] = Some(exit);
    let pos: Vec<usize> = {
        let mut p = vec![0; n + 1];
        for (i, node) in order.iter().enumerate() {
            p[*node] = i;
        }
        p
    };
    let mut changed = true;
    while changed {
        changed = false;
        for &node in &order {
            if node == exit {
                continue;
            }
            let mut new_idom: Option<usize> = None;
            for &succ in &rsuccs[node] {
                if ipdom[succ].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => succ,
                    Some(cur) => intersect(&ipdom, &pos, cur, succ),
                });
            }
            if let Some(ni) = new_idom {
                if ipdom[node] != Some(ni) {
                    ipdom[node] = Some(ni);
                    changed = true;
                }
            }
        }
    }

    // FOW: for each conditional edge (u, v) with v not postdominating u,
    // every block from v up to (exclusive) ipdom(u) depends on u
    for (ui, ubb) in blocks.iter().enumerate() {
        let block = module.block(*ubb);
        let term_is_cond = block
            .insts
            .last()
            .map(|i| module.inst(*i).opcode == Opcode::CondBr)
            .unwrap_or(false);
        if block.succs.len() < 2 {
            continue;
        }
        for (edge_idx, succ) in block.succs.iter().enumerate() {
            let polarity = if !term_is_cond {
                CdPolarity::None
            } else if edge_idx == 0 {
                CdPolarity::True
            } else {
                CdPolarity::False
            };
            let vi = match local.get(succ) {
                Some(v) => *v,
                None => continue,
            };
            let stop = ipdom[ui];
            let mut w = vi;
            let mut steps = 0;
            while Some(w) != stop && w != exit && steps <= n {
                let wb = blocks[w];
                let entry = table.entry(wb).or_default();
                if !entry.contains(&(*ubb, polarity)) {
                    entry.push((*ubb, polarity));
                }
                w = match ipdom[w] {
                    Some(next) => next,
                    None => break,
                };
                steps += 1;
            }
        }
    }

    table
}

fn reverse_postorder_from_exit(rpreds: &[Vec<usize>], exit: usize, count: usize) -> Vec<usize> {
    // DFS over the reverse graph starting at the virtual exit; reverse
    // postorder gives a good iteration order for the dataflow loop
    let mut visited = vec![false; count];
    let mut post = Vec::new();
    let mut stack = vec![(exit, 0usize)];
    visited[exit] = true;
    while let Some((node, idx)) = stack.pop() {
        if idx < rpreds[node].len() {
            stack.push((node, idx + 1));
            let next = rpreds[node][idx];
            if !visited[next] {
                visited[next] = true;
                stack.push((next, 0));
            }
        } else {
            post.push(node);
        }
    }
    post.reverse();
    post
}

fn intersect(ipdom: &[Option<usize>], pos: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while pos[a] > pos[b] {
            a = ipdom[a].unwrap_or(b);
        }
        while pos[b] > pos[a] {
            b = ipdom[b].unwrap_or(a);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::{dbg, Opcode};

    /// entry --cond--> then / else --> end
    fn diamond() -> (ModuleIr, FuncId, BlockId, BlockId, BlockId, BlockId) {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "if.then");
        let else_bb = m.add_block(f, "if.else");
        let end = m.add_block(f, "if.end");
        m.add_edge(entry, then_bb);
        m.add_edge(entry, else_bb);
        m.add_edge(then_bb, end);
        m.add_edge(else_bb, end);

        let a = m.add_argument(f, "a", "i32");
        let zero = m.const_int(0, "i32");
        let cond = m.add_inst(
            entry,
            Opcode::Icmp(crate::shared::models::ir::IcmpPred::Ne),
            vec![a, zero],
            "i1",
            dbg("a.c", 2),
        );
        let cond_v = m.inst(cond).value;
        let tv = m.block_value(then_bb);
        let ev = m.block_value(else_bb);
        m.add_inst(entry, Opcode::CondBr, vec![cond_v, tv, ev], "void", dbg("a.c", 2));
        m.add_inst(end, Opcode::Ret, vec![], "void", dbg("a.c", 9));
        (m, f, entry, then_bb, else_bb, end)
    }

    #[test]
    fn test_block_reachability() {
        let (m, _f, entry, then_bb, _else_bb, end) = diamond();
        let mut cfg = CfgIndex::new();
        assert!(cfg.block_reachable(&m, entry, end));
        assert!(cfg.block_reachable(&m, then_bb, end));
        assert!(!cfg.block_reachable(&m, end, entry));
    }

    #[test]
    fn test_inst_reachability_same_block() {
        let (m, _f, entry, ..) = diamond();
        let mut cfg = CfgIndex::new();
        let insts = &m.block(entry).insts;
        assert!(cfg.inst_reachable(&m, insts[0], insts[1]));
        assert!(!cfg.inst_reachable(&m, insts[1], insts[0]));
    }

    #[test]
    fn test_control_dependence_polarities() {
        let (m, _f, entry, then_bb, else_bb, end) = diamond();
        let mut cfg = CfgIndex::new();

        assert_eq!(cfg.controls(&m, entry, then_bb), CdPolarity::True);
        assert_eq!(cfg.controls(&m, entry, else_bb), CdPolarity::False);
        // the join point is not control-dependent on the branch
        assert_eq!(cfg.controls(&m, entry, end), CdPolarity::None);
    }

    #[test]
    fn test_controllers_of_branch_arm() {
        let (m, _f, entry, then_bb, ..) = diamond();
        let mut cfg = CfgIndex::new();
        let deps = cfg.controllers_of(&m, then_bb);
        assert_eq!(deps, vec![(entry, CdPolarity::True)]);
    }
}
