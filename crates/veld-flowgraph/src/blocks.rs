// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Scoped records for non-local control transfers.
//!
//! Each structured construct pushes a record on entry and pops it on exit,
//! forming the chains a `break`, switch jump, `return`, or rethrow consults
//! to find its target. The records live in plain `Vec` stacks on the
//! builder; the "outer" pointer of the original chain formulation becomes
//! the stack depth recorded at push time.

use indexmap::IndexMap;

use veld_ast::Stmt;
use veld_il::InstrId;
use veld_scopes::LocalVariable;

use crate::builder::FlowGraphBuilder;

/// Marks an active protected region.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TryCatchBlock {
    pub try_index: u32,
}

/// Marks an active protected region with a finalizer.
///
/// `try_depth` is one less than the surrounding try-nesting count because
/// finalizers execute outside the region they guard. `try_catch_depth` and
/// `try_index` record the handler environment at entry so a replay can
/// reinstall it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TryFinallyBlock<'a> {
    pub finalizer: &'a Stmt,
    pub context_depth: u32,
    pub try_depth: u32,
    pub try_catch_depth: usize,
    pub try_index: Option<u32>,
}

/// Labels a breakable construct (a `Labeled` statement).
#[derive(Debug, Clone, Copy)]
pub(crate) struct BreakableBlock {
    /// One greater than the nearest enclosing breakable's index; zero at the
    /// outermost level.
    pub index: u32,
    /// Shared join for every break targeting this construct, created on
    /// first use.
    pub destination: Option<InstrId>,
    /// `try_finally` stack depth at entry: the finalizers a jump here must
    /// not replay.
    pub outer_finally: usize,
    pub context_depth: u32,
    pub try_index: Option<u32>,
}

/// Labels a switch construct.
///
/// Case numbering is flattened across nested switches: `depth_offset` is
/// the sum of the case counts of all enclosing switches, so an absolute
/// target index resolves to the block whose range contains it.
#[derive(Debug, Clone)]
pub(crate) struct SwitchBlock {
    pub depth_offset: u32,
    pub case_count: u32,
    /// Join per jumped-to case, keyed by case number within this block.
    pub destinations: IndexMap<u32, InstrId>,
    pub outer_finally: usize,
    pub context_depth: u32,
    pub try_index: Option<u32>,
}

/// Marks the body of one catch clause.
#[derive(Debug, Clone)]
pub(crate) struct CatchBlock {
    pub exception_var: LocalVariable,
    pub stack_trace_var: LocalVariable,
    /// The handler region being handled; a rethrow propagates past it.
    pub catch_try_index: u32,
}

/// A resolved non-local jump: where to go, which finalizers to replay on
/// the way, and the context depth to restore at the target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpTarget {
    pub destination: InstrId,
    pub outer_finally: usize,
    pub context_depth: u32,
}

impl<'a> FlowGraphBuilder<'a> {
    // ── Breakable blocks ────────────────────────────────────────────

    pub(crate) fn push_breakable(&mut self) {
        let index = self.breakable.last().map_or(0, |b| b.index + 1);
        self.breakable.push(BreakableBlock {
            index,
            destination: None,
            outer_finally: self.try_finally.len(),
            context_depth: self.base.context_depth,
            try_index: self.base.current_try_index(),
        });
    }

    pub(crate) fn pop_breakable(&mut self) -> BreakableBlock {
        self.breakable.pop().expect("breakable stack underflow")
    }

    /// Resolve a break to the construct with label `label_index`, creating
    /// its shared destination join on first use.
    pub(crate) fn break_destination(&mut self, label_index: u32) -> JumpTarget {
        let position = self
            .breakable
            .iter()
            .rposition(|b| b.index == label_index)
            .unwrap_or_else(|| panic!("break targets unknown label {label_index}"));
        let (outer_finally, context_depth, try_index, existing) = {
            let block = &self.breakable[position];
            (block.outer_finally, block.context_depth, block.try_index, block.destination)
        };
        let destination = match existing {
            Some(join) => join,
            None => {
                let join = self.base.build_join_entry_in(try_index);
                self.breakable[position].destination = Some(join);
                join
            }
        };
        JumpTarget { destination, outer_finally, context_depth }
    }

    // ── Switch blocks ───────────────────────────────────────────────

    pub(crate) fn push_switch(&mut self, case_count: u32) {
        let depth_offset = self
            .switches
            .last()
            .map_or(0, |s| s.depth_offset + s.case_count);
        self.switches.push(SwitchBlock {
            depth_offset,
            case_count,
            destinations: IndexMap::new(),
            outer_finally: self.try_finally.len(),
            context_depth: self.base.context_depth,
            try_index: self.base.current_try_index(),
        });
    }

    pub(crate) fn pop_switch(&mut self) -> SwitchBlock {
        self.switches.pop().expect("switch stack underflow")
    }

    /// Whether some jump already targeted case `case_num` of the innermost
    /// switch.
    pub(crate) fn switch_had_jumper(&self, case_num: u32) -> bool {
        self.switches
            .last()
            .expect("not inside a switch")
            .destinations
            .contains_key(&case_num)
    }

    /// Resolve an absolute (flattened across nested switches) case index.
    pub(crate) fn switch_destination(&mut self, target_index: u32) -> JumpTarget {
        let position = self
            .switches
            .iter()
            .rposition(|s| s.depth_offset <= target_index)
            .unwrap_or_else(|| panic!("switch jump to absolute case {target_index} outside any switch"));
        let relative = target_index - self.switches[position].depth_offset;
        self.ensure_switch_destination(position, relative)
    }

    /// Resolve a case number relative to the innermost switch.
    pub(crate) fn switch_destination_direct(&mut self, case_num: u32) -> JumpTarget {
        let position = self.switches.len().checked_sub(1).expect("not inside a switch");
        self.ensure_switch_destination(position, case_num)
    }

    fn ensure_switch_destination(&mut self, position: usize, case_num: u32) -> JumpTarget {
        let (outer_finally, context_depth, try_index) = {
            let block = &self.switches[position];
            assert!(case_num < block.case_count, "case {case_num} out of range");
            (block.outer_finally, block.context_depth, block.try_index)
        };
        let destination = match self.switches[position].destinations.get(&case_num) {
            Some(&join) => join,
            None => {
                let join = self.base.build_join_entry_in(try_index);
                self.switches[position].destinations.insert(case_num, join);
                join
            }
        };
        JumpTarget { destination, outer_finally, context_depth }
    }

    // ── Try-finally blocks ──────────────────────────────────────────

    pub(crate) fn push_try_finally(&mut self, finalizer: &'a Stmt) {
        self.try_finally.push(TryFinallyBlock {
            finalizer,
            context_depth: self.base.context_depth,
            // finalizers execute outside the protected region
            try_depth: self.try_depth - 1,
            try_catch_depth: self.base.try_catch_depth(),
            try_index: self.base.current_try_index(),
        });
    }

    pub(crate) fn pop_try_finally(&mut self) {
        self.try_finally.pop().expect("try-finally stack underflow");
    }

    // ── Catch blocks ────────────────────────────────────────────────

    pub(crate) fn push_catch_block(
        &mut self,
        exception_var: LocalVariable,
        stack_trace_var: LocalVariable,
        catch_try_index: u32,
    ) {
        self.catch_blocks.push(CatchBlock { exception_var, stack_trace_var, catch_try_index });
    }

    pub(crate) fn pop_catch_block(&mut self) {
        self.catch_blocks.pop().expect("catch-block stack underflow");
    }

    pub(crate) fn current_catch_block(&self) -> &CatchBlock {
        self.catch_blocks.last().expect("rethrow outside of a catch clause")
    }
}

#[cfg(test)]
mod tests {
    use veld_ast::{Function, NodeOffset, Stmt, StmtKind};
    use veld_scopes::FunctionScopes;

    use crate::builder::{BuilderOptions, FlowGraphBuilder};

    fn fixture() -> (Function, FunctionScopes) {
        let function = Function {
            offset: NodeOffset(0),
            name: "test".into(),
            arity: 0,
            type_parameters: 0,
            is_suspending: false,
            body: Stmt::new(NodeOffset(1), StmtKind::Empty),
        };
        (function, FunctionScopes::new())
    }

    #[test]
    fn breakable_indices_count_inward() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_breakable();
        b.push_breakable();
        b.push_breakable();
        assert_eq!(b.breakable.last().unwrap().index, 2);
        b.pop_breakable();
        assert_eq!(b.breakable.last().unwrap().index, 1);
    }

    #[test]
    fn repeated_breaks_share_one_join() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_breakable();
        let first = b.break_destination(0);
        let second = b.break_destination(0);
        let third = b.break_destination(0);
        assert_eq!(first.destination, second.destination);
        assert_eq!(second.destination, third.destination);
    }

    #[test]
    fn break_resolves_to_the_matching_label() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_breakable(); // index 0
        b.push_breakable(); // index 1
        let outer = b.break_destination(0);
        let inner = b.break_destination(1);
        assert_ne!(outer.destination, inner.destination);
        assert_eq!(b.breakable[0].destination, Some(outer.destination));
        assert_eq!(b.breakable[1].destination, Some(inner.destination));
    }

    #[test]
    #[should_panic(expected = "unknown label")]
    fn break_to_missing_label_panics() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_breakable();
        b.break_destination(7);
    }

    #[test]
    fn nested_switch_absolute_targets_split_on_depth_offset() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_switch(3); // outer: absolute cases 0..3
        b.push_switch(2); // inner: absolute cases 3..5
        assert_eq!(b.switches.last().unwrap().depth_offset, 3);

        let outer_case_1 = b.switch_destination(1);
        let inner_case_0 = b.switch_destination(3);
        let inner_case_1 = b.switch_destination(4);

        assert_eq!(b.switches[0].destinations.get(&1), Some(&outer_case_1.destination));
        assert_eq!(b.switches[1].destinations.get(&0), Some(&inner_case_0.destination));
        assert_eq!(b.switches[1].destinations.get(&1), Some(&inner_case_1.destination));
    }

    #[test]
    fn direct_resolution_stays_in_the_innermost_switch() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_switch(2);
        b.push_switch(2);
        let direct = b.switch_destination_direct(1);
        assert_eq!(b.switches[1].destinations.get(&1), Some(&direct.destination));
        assert!(b.switches[0].destinations.is_empty());
    }

    #[test]
    fn absolute_and_direct_resolution_agree_within_one_switch() {
        let (function, scopes) = fixture();
        let mut b = FlowGraphBuilder::new(&function, &scopes, None, BuilderOptions::default());
        b.push_switch(4);
        let absolute = b.switch_destination(2);
        let direct = b.switch_destination_direct(2);
        assert_eq!(absolute.destination, direct.destination);
    }
}
