// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! The per-function instruction arena.

use crate::{InstrId, Op};

/// An arena-owned instruction plus its linkage.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    /// Straight-line successor; `None` for terminators and for the open end
    /// of a fragment under construction.
    pub next: Option<InstrId>,
    /// Exception-handler region active when the instruction was created.
    pub try_index: Option<u32>,
}

/// The instruction graph of a single function.
///
/// Owns every node for the function's lifetime; nodes are never shared
/// across functions and never freed individually.
#[derive(Debug, Default)]
pub struct FlowGraph {
    nodes: Vec<Node>,
    pub entry: Option<InstrId>,
    /// `Return` instructions.
    pub normal_exits: Vec<InstrId>,
    /// `Throw` and `Rethrow` instructions.
    pub exceptional_exits: Vec<InstrId>,
    /// `CatchEntry` instructions, in allocation order.
    pub catch_entries: Vec<InstrId>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node, stamping it with the active try-index and recording
    /// it in the relevant exit/handler set.
    pub fn add(&mut self, op: Op, try_index: Option<u32>) -> InstrId {
        let id = InstrId(self.nodes.len() as u32);
        match op {
            Op::Return { .. } => self.normal_exits.push(id),
            Op::Throw { .. } | Op::Rethrow { .. } => self.exceptional_exits.push(id),
            Op::CatchEntry { .. } => self.catch_entries.push(id),
            _ => {}
        }
        self.nodes.push(Node { op, next: None, try_index });
        id
    }

    pub fn node(&self, id: InstrId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: InstrId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Wire `from`'s straight-line successor to `to`.
    ///
    /// Block entries are never linked into: joins are reached through `Goto`
    /// (which registers a predecessor) and target/catch entries through the
    /// instructions referencing them.
    pub fn link(&mut self, from: InstrId, to: InstrId) {
        assert!(
            !self.node(to).op.is_block_entry(),
            "block entries are entered via control transfer, not fallthrough"
        );
        let node = self.node_mut(from);
        assert!(
            !node.op.is_terminator(),
            "cannot link past a terminator: {from:?}"
        );
        assert!(node.next.is_none(), "instruction {from:?} already linked");
        node.next = Some(to);
    }

    /// Record `pred` as a predecessor of the join `join`.
    pub fn add_predecessor(&mut self, join: InstrId, pred: InstrId) {
        match &mut self.node_mut(join).op {
            Op::JoinEntry { predecessors } => predecessors.push(pred),
            other => panic!("add_predecessor on non-join {other:?}"),
        }
    }

    pub fn predecessor_count(&self, join: InstrId) -> usize {
        match &self.node(join).op {
            Op::JoinEntry { predecessors } => predecessors.len(),
            other => panic!("predecessor_count on non-join {other:?}"),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (InstrId(i as u32), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstValue;

    #[test]
    fn add_stamps_try_index() {
        let mut g = FlowGraph::new();
        let id = g.add(Op::Constant(ConstValue::Int(1)), Some(2));
        assert_eq!(g.node(id).try_index, Some(2));
    }

    #[test]
    fn terminators_are_recorded_as_exits() {
        let mut g = FlowGraph::new();
        let c = g.add(Op::Constant(ConstValue::Null), None);
        let r = g.add(Op::Return { value: c }, None);
        let t = g.add(Op::Throw { exception: c }, None);
        assert_eq!(g.normal_exits, vec![r]);
        assert_eq!(g.exceptional_exits, vec![t]);
    }

    #[test]
    fn link_chains_straight_line_code() {
        let mut g = FlowGraph::new();
        let a = g.add(Op::Constant(ConstValue::Int(1)), None);
        let b = g.add(Op::Constant(ConstValue::Int(2)), None);
        g.link(a, b);
        assert_eq!(g.node(a).next, Some(b));
    }

    #[test]
    #[should_panic(expected = "cannot link past a terminator")]
    fn linking_past_a_terminator_panics() {
        let mut g = FlowGraph::new();
        let c = g.add(Op::Constant(ConstValue::Null), None);
        let r = g.add(Op::Return { value: c }, None);
        g.link(r, c);
    }

    #[test]
    fn join_predecessors_accumulate() {
        let mut g = FlowGraph::new();
        let join = g.add(Op::JoinEntry { predecessors: Vec::new() }, None);
        let g1 = g.add(Op::Goto { target: join }, None);
        let g2 = g.add(Op::Goto { target: join }, None);
        g.add_predecessor(join, g1);
        g.add_predecessor(join, g2);
        assert_eq!(g.predecessor_count(join), 2);
    }
}
