//! Symbolic Expression Graph model
//!
//! Typed data-flow graph over IR values, one graph per function, all nodes and
//! sites living in module-wide arenas so that cross-function relations
//! (matched-node maps, inter-procedural traces) are plain id pairs.
//!
//! Graph construction is an external collaborator's job; this module only
//! defines the shapes the analyses consume, plus a builder API used by that
//! collaborator and by tests.

use super::ir::{BinOp, BlockId, FuncId, IcmpPred, InstId, ModuleIr, ValueId, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegNodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegSiteId(pub u32);

impl SegNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SegSiteId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An element of a value-flow trace: a node, or an explicit call/return site
/// marking an inter-procedural crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SegObj {
    Node(SegNodeId),
    Site(SegSiteId),
}

impl SegObj {
    pub fn as_node(self) -> Option<SegNodeId> {
        match self {
            SegObj::Node(n) => Some(n),
            SegObj::Site(_) => None,
        }
    }
}

impl fmt::Display for SegObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegObj::Node(n) => write!(f, "n{}", n.0),
            SegObj::Site(s) => write!(f, "s{}", s.0),
        }
    }
}

/// Base pointer plus field offsets identifying a memory sub-object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPath {
    pub base: ValueId,
    pub offsets: Vec<i64>,
}

impl AccessPath {
    pub fn new(base: ValueId, offsets: Vec<i64>) -> Self {
        Self { base, offsets }
    }

    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    pub fn same_shape(&self, other: &AccessPath) -> bool {
        self.offsets == other.offsets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeKind {
    Binary(BinOp),
    Cast,
    Select,
    Gep,
    Icmp(IcmpPred),
    Concat,
    ExtractElement,
    InsertElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiIncoming {
    pub value: SegNodeId,
    pub block: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegNodeKind {
    SimpleOperand,
    Phi { incomings: Vec<PhiIncoming> },
    LoadMem { load: InstId },
    StoreMem { store: Option<InstId> },
    Region,
    CommonArgument { index: u32 },
    PseudoArgument { index: u32, path: AccessPath },
    CommonReturn,
    PseudoReturn { index: u32, path: AccessPath },
    CallSiteCommonOutput { site: SegSiteId },
    CallSitePseudoOutput { site: SegSiteId, index: u32, path: AccessPath },
    CallSitePseudoInput { site: SegSiteId, index: u32, path: AccessPath },
    Opcode(OpcodeKind),
}

impl SegNodeKind {
    /// Discriminant used by structural node matching.
    pub fn tag(&self) -> u8 {
        match self {
            SegNodeKind::SimpleOperand => 0,
            SegNodeKind::Phi { .. } => 1,
            SegNodeKind::LoadMem { .. } => 2,
            SegNodeKind::StoreMem { .. } => 3,
            SegNodeKind::Region => 4,
            SegNodeKind::CommonArgument { .. } => 5,
            SegNodeKind::PseudoArgument { .. } => 6,
            SegNodeKind::CommonReturn => 7,
            SegNodeKind::PseudoReturn { .. } => 8,
            SegNodeKind::CallSiteCommonOutput { .. } => 9,
            SegNodeKind::CallSitePseudoOutput { .. } => 10,
            SegNodeKind::CallSitePseudoInput { .. } => 11,
            SegNodeKind::Opcode(_) => 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegNode {
    pub kind: SegNodeKind,
    pub func: FuncId,
    /// Owning block; mutable so constant phi inputs can be re-attributed
    pub block: Option<BlockId>,
    /// The IR value this node models, when one exists
    pub dbg_value: Option<ValueId>,
    pub ty: String,
    /// Operands (data sources)
    pub children: Vec<SegNodeId>,
    /// Users
    pub parents: Vec<SegNodeId>,
    /// Sites consuming this node
    pub use_sites: Vec<SegSiteId>,
    /// Creation order within the owning graph
    pub obj_index: u32,
}

impl SegNode {
    pub fn is_opcode(&self) -> bool {
        matches!(self.kind, SegNodeKind::Opcode(_))
    }

    pub fn is_operand(&self) -> bool {
        !self.is_opcode()
    }

    pub fn is_argument(&self) -> bool {
        matches!(
            self.kind,
            SegNodeKind::CommonArgument { .. } | SegNodeKind::PseudoArgument { .. }
        )
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self.kind,
            SegNodeKind::CommonReturn | SegNodeKind::PseudoReturn { .. }
        )
    }

    pub fn is_call_site_output(&self) -> bool {
        matches!(
            self.kind,
            SegNodeKind::CallSiteCommonOutput { .. } | SegNodeKind::CallSitePseudoOutput { .. }
        )
    }

    pub fn access_path(&self) -> Option<&AccessPath> {
        match &self.kind {
            SegNodeKind::PseudoArgument { path, .. }
            | SegNodeKind::PseudoReturn { path, .. }
            | SegNodeKind::CallSitePseudoOutput { path, .. }
            | SegNodeKind::CallSitePseudoInput { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The call site behind a call-site output / pseudo-input node.
    pub fn owning_call_site(&self) -> Option<SegSiteId> {
        match &self.kind {
            SegNodeKind::CallSiteCommonOutput { site }
            | SegNodeKind::CallSitePseudoOutput { site, .. }
            | SegNodeKind::CallSitePseudoInput { site, .. } => Some(*site),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegSiteKind {
    Call {
        callee: Option<FuncId>,
        /// The invoked value, for indirect calls
        callee_value: Option<ValueId>,
        indirect: bool,
        common_inputs: Vec<SegNodeId>,
        common_output: Option<SegNodeId>,
        pseudo_inputs: Vec<SegNodeId>,
        pseudo_outputs: Vec<SegNodeId>,
    },
    Return {
        returned: Option<SegNodeId>,
    },
    Div {
        denominator: SegNodeId,
    },
    Dereference {
        pointer: SegNodeId,
    },
    Store {
        pointer: SegNodeId,
    },
}

impl SegSiteKind {
    pub fn tag(&self) -> u8 {
        match self {
            SegSiteKind::Call { .. } => 0,
            SegSiteKind::Return { .. } => 1,
            SegSiteKind::Div { .. } => 2,
            SegSiteKind::Dereference { .. } => 3,
            SegSiteKind::Store { .. } => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegSite {
    pub kind: SegSiteKind,
    pub inst: InstId,
    pub func: FuncId,
}

impl SegSite {
    pub fn as_call(&self) -> Option<(&SegSiteKind, InstId)> {
        match self.kind {
            SegSiteKind::Call { .. } => Some((&self.kind, self.inst)),
            _ => None,
        }
    }

    pub fn called_function(&self) -> Option<FuncId> {
        match &self.kind {
            SegSiteKind::Call { callee, .. } => *callee,
            _ => None,
        }
    }

    pub fn is_indirect_call(&self) -> bool {
        matches!(&self.kind, SegSiteKind::Call { indirect: true, .. })
    }

    pub fn common_input_index(&self, node: SegNodeId) -> Option<u32> {
        match &self.kind {
            SegSiteKind::Call { common_inputs, .. } => common_inputs
                .iter()
                .position(|n| *n == node)
                .map(|i| i as u32),
            _ => None,
        }
    }
}

/// Per-function view into the arenas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegGraph {
    pub func: FuncId,
    pub nodes: Vec<SegNodeId>,
    pub sites: Vec<SegSiteId>,
    pub value_nodes: BTreeMap<ValueId, SegNodeId>,
    pub common_args: Vec<SegNodeId>,
    pub pseudo_args: Vec<SegNodeId>,
    pub common_return: Option<SegNodeId>,
    pub pseudo_returns: Vec<SegNodeId>,
}

/// Module-wide SEG: all graphs plus the node/site arenas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegModule {
    pub graphs: BTreeMap<FuncId, SegGraph>,
    pub nodes: Vec<SegNode>,
    pub sites: Vec<SegSite>,
}

impl SegModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: SegNodeId) -> &SegNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: SegNodeId) -> &mut SegNode {
        &mut self.nodes[id.index()]
    }

    pub fn site(&self, id: SegSiteId) -> &SegSite {
        &self.sites[id.index()]
    }

    pub fn graph(&self, func: FuncId) -> Option<&SegGraph> {
        self.graphs.get(&func)
    }

    pub fn has_graph(&self, func: FuncId) -> bool {
        self.graphs.contains_key(&func)
    }

    /// Node modelling `value` inside `func`'s graph.
    pub fn find_node(&self, func: FuncId, value: ValueId) -> Option<SegNodeId> {
        self.graph(func)?.value_nodes.get(&value).copied()
    }

    /// Call site wrapping `inst`.
    pub fn find_call_site(&self, func: FuncId, inst: InstId) -> Option<SegSiteId> {
        self.graph(func)?
            .sites
            .iter()
            .copied()
            .find(|s| self.site(*s).inst == inst && matches!(self.site(*s).kind, SegSiteKind::Call { .. }))
    }

    /// Return site of `func` feeding from `returned`, or any return site.
    pub fn find_return_site(&self, func: FuncId, returned: Option<SegNodeId>) -> Option<SegSiteId> {
        let graph = self.graph(func)?;
        let mut any = None;
        for s in &graph.sites {
            if let SegSiteKind::Return { returned: r } = &self.site(*s).kind {
                any = Some(*s);
                if returned.is_some() && *r == returned {
                    return Some(*s);
                }
            }
        }
        any
    }

    /// Func of a trace object.
    pub fn func_of(&self, obj: SegObj) -> FuncId {
        match obj {
            SegObj::Node(n) => self.node(n).func,
            SegObj::Site(s) => self.site(s).func,
        }
    }

    /// First node (skipping sites) of a trace.
    pub fn first_node(&self, trace: &[SegObj]) -> Option<SegNodeId> {
        trace.iter().find_map(|o| o.as_node())
    }

    /// Last node (skipping sites) of a trace.
    pub fn last_node(&self, trace: &[SegObj]) -> Option<SegNodeId> {
        trace.iter().rev().find_map(|o| o.as_node())
    }

    /// The IR name behind a node, chased through loads/stores like the
    /// external-copy detection needs.
    pub fn resolved_name<'a>(&self, module: &'a ModuleIr, id: SegNodeId) -> Option<&'a str> {
        let value = self.node(id).dbg_value?;
        resolved_value_name(module, value)
    }

    /// Owning block of a node: the attributed block if set, else the block
    /// of the instruction behind its debug value.
    pub fn block_of_node(&self, module: &ModuleIr, id: SegNodeId) -> Option<BlockId> {
        if let Some(block) = self.node(id).block {
            return Some(block);
        }
        let value = self.node(id).dbg_value?;
        match module.value(value).kind {
            ValueKind::Inst(inst) => Some(module.inst(inst).block),
            _ => None,
        }
    }
}

/// Chase a value to a stable name (through loads, stores, geps and calls).
pub fn resolved_value_name<'a>(module: &'a ModuleIr, value: ValueId) -> Option<&'a str> {
    let v = module.value(value);
    if !v.name.is_empty() {
        return Some(v.name.as_str());
    }
    if let ValueKind::Inst(inst) = v.kind {
        let ir = module.inst(inst);
        let chase = match ir.opcode {
            super::ir::Opcode::Load | super::ir::Opcode::GetElementPtr | super::ir::Opcode::Cast => {
                ir.operands.first().copied()
            }
            super::ir::Opcode::Store => ir.operands.get(1).copied(),
            super::ir::Opcode::Call => ir.operands.first().copied(),
            _ => None,
        };
        if let Some(next) = chase {
            return resolved_value_name(module, next);
        }
    }
    None
}

// ──────────────────────────────────────────────────────────────────────────
// Builder API
// ──────────────────────────────────────────────────────────────────────────

impl SegModule {
    pub fn add_graph(&mut self, func: FuncId) {
        self.graphs.entry(func).or_insert_with(|| SegGraph {
            func,
            ..SegGraph::default()
        });
    }

    pub fn add_node(
        &mut self,
        func: FuncId,
        kind: SegNodeKind,
        dbg_value: Option<ValueId>,
        ty: impl Into<String>,
    ) -> SegNodeId {
        self.add_graph(func);
        let id = SegNodeId(self.nodes.len() as u32);
        let graph = self.graphs.get_mut(&func).expect("graph just added");
        let obj_index = graph.nodes.len() as u32;
        graph.nodes.push(id);
        match &kind {
            SegNodeKind::CommonArgument { .. } => graph.common_args.push(id),
            SegNodeKind::PseudoArgument { .. } => graph.pseudo_args.push(id),
            SegNodeKind::CommonReturn => graph.common_return = Some(id),
            SegNodeKind::PseudoReturn { .. } => graph.pseudo_returns.push(id),
            _ => {}
        }
        if let Some(v) = dbg_value {
            graph.value_nodes.entry(v).or_insert(id);
        }
        self.nodes.push(SegNode {
            kind,
            func,
            block: None,
            dbg_value,
            ty: ty.into(),
            children: Vec::new(),
            parents: Vec::new(),
            use_sites: Vec::new(),
            obj_index,
        });
        id
    }

    pub fn set_block(&mut self, node: SegNodeId, block: BlockId) {
        self.nodes[node.index()].block = Some(block);
    }

    /// Wire `child` as an operand of `parent` (and `parent` as a user).
    pub fn connect(&mut self, parent: SegNodeId, child: SegNodeId) {
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parents.push(parent);
    }

    pub fn add_site(&mut self, func: FuncId, inst: InstId, kind: SegSiteKind) -> SegSiteId {
        self.add_graph(func);
        let id = SegSiteId(self.sites.len() as u32);
        let used: Vec<SegNodeId> = match &kind {
            SegSiteKind::Call {
                common_inputs,
                pseudo_inputs,
                ..
            } => common_inputs
                .iter()
                .chain(pseudo_inputs.iter())
                .copied()
                .collect(),
            SegSiteKind::Return { returned } => returned.iter().copied().collect(),
            SegSiteKind::Div { denominator } => vec![*denominator],
            SegSiteKind::Dereference { pointer } => vec![*pointer],
            SegSiteKind::Store { pointer } => vec![*pointer],
        };
        self.sites.push(SegSite { kind, inst, func });
        self.graphs.get_mut(&func).expect("graph just added").sites.push(id);
        for node in used {
            self.nodes[node.index()].use_sites.push(id);
        }
        id
    }

    /// Register a use-site on a node after the fact (e.g. a call consuming a
    /// node that was created later).
    pub fn add_use_site(&mut self, node: SegNodeId, site: SegSiteId) {
        if !self.nodes[node.index()].use_sites.contains(&site) {
            self.nodes[node.index()].use_sites.push(site);
        }
    }

    /// Clone a constant incoming of a phi into a fresh simple operand so
    /// different incoming blocks stay distinguishable downstream.
    pub fn clone_phi_constant(&mut self, phi: SegNodeId, incoming_pos: usize) -> SegNodeId {
        let (func, old, block, dbg_value, ty) = {
            let node = self.node(phi);
            let incs = match &node.kind {
                SegNodeKind::Phi { incomings } => incomings,
                _ => panic!("clone_phi_constant on non-phi"),
            };
            let inc = &incs[incoming_pos];
            let old = inc.value;
            (
                node.func,
                old,
                inc.block,
                self.node(old).dbg_value,
                self.node(old).ty.clone(),
            )
        };
        let fresh = self.add_node(func, SegNodeKind::SimpleOperand, None, ty);
        self.nodes[fresh.index()].dbg_value = dbg_value;
        self.nodes[fresh.index()].block = Some(block);
        if let SegNodeKind::Phi { incomings } = &mut self.nodes[phi.index()].kind {
            incomings[incoming_pos].value = fresh;
        }
        if let Some(pos) = self.nodes[phi.index()]
            .children
            .iter()
            .position(|c| *c == old)
        {
            self.nodes[phi.index()].children[pos] = fresh;
        }
        self.nodes[fresh.index()].parents.push(phi);
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::Opcode;

    #[test]
    fn test_connect_maintains_both_directions() {
        let mut module = ModuleIr::new();
        let f = module.add_function("before.patch.f", "a.c");
        let mut seg = SegModule::new();
        let a = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, None, "i32");
        let op = seg.add_node(
            f,
            SegNodeKind::Opcode(OpcodeKind::Binary(BinOp::Add)),
            None,
            "i32",
        );
        seg.connect(op, a);

        assert_eq!(seg.node(op).children, vec![a]);
        assert_eq!(seg.node(a).parents, vec![op]);
        assert!(seg.node(a).is_argument());
        assert!(seg.node(op).is_opcode());
    }

    #[test]
    fn test_find_node_and_first_last() {
        let mut module = ModuleIr::new();
        let f = module.add_function("before.patch.f", "a.c");
        let bb = module.add_block(f, "entry");
        let a = module.add_argument(f, "a", "i32");
        let ret = module.add_inst(bb, Opcode::Ret, vec![a], "void", None);

        let mut seg = SegModule::new();
        let an = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(a), "i32");
        let site = seg.add_site(f, ret, SegSiteKind::Return { returned: Some(an) });

        assert_eq!(seg.find_node(f, a), Some(an));
        let trace = vec![SegObj::Node(an), SegObj::Site(site)];
        assert_eq!(seg.first_node(&trace), Some(an));
        assert_eq!(seg.last_node(&trace), Some(an));
        assert_eq!(seg.find_return_site(f, Some(an)), Some(site));
    }

    #[test]
    fn test_clone_phi_constant_rewires_incoming() {
        let mut module = ModuleIr::new();
        let f = module.add_function("before.patch.f", "a.c");
        let bb1 = module.add_block(f, "if.then");
        let bb2 = module.add_block(f, "if.else");
        let c = module.const_int(-22, "i32");

        let mut seg = SegModule::new();
        let cn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(c), "i32");
        let phi = seg.add_node(
            f,
            SegNodeKind::Phi {
                incomings: vec![
                    PhiIncoming { value: cn, block: bb1 },
                    PhiIncoming { value: cn, block: bb2 },
                ],
            },
            None,
            "i32",
        );
        seg.connect(phi, cn);
        seg.connect(phi, cn);

        let fresh = seg.clone_phi_constant(phi, 1);
        assert_ne!(fresh, cn);
        assert_eq!(seg.node(fresh).block, Some(bb2));
        assert_eq!(seg.node(fresh).dbg_value, Some(c));
        match &seg.node(phi).kind {
            SegNodeKind::Phi { incomings } => {
                assert_eq!(incomings[0].value, cn);
                assert_eq!(incomings[1].value, fresh);
            }
            _ => unreachable!(),
        }
    }
}
