// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Primitive fragment builders.
//!
//! `BaseFlowGraphBuilder` owns the instruction arena and the per-function
//! counters (deopt ids, try indices, lexical context depth) and provides the
//! primitive fragments every construct translation is assembled from. The
//! expression evaluation stack is modeled explicitly so stack effects are
//! well defined even though lowering emits a flat instruction sequence.

use veld_ast::{ArithOp, CompareKind, InferredType, RelOp, TypeRef};
use veld_il::{layout, ConstValue, FlowGraph, InstrId, Op};
use veld_scopes::LocalVariable;

use crate::blocks::TryCatchBlock;
use crate::Fragment;

/// An alias for a value pinned on the expression stack.
///
/// `load_temporary` re-materializes the aliased value; there is no store
/// counterpart. Values merged from multiple predecessors must go through a
/// declared local slot instead - the stack model supports merging only for
/// real locals, and a temporary written on two paths would not survive SSA
/// construction.
#[derive(Debug, Clone, Copy)]
pub struct Temporary {
    value: InstrId,
}

pub struct BaseFlowGraphBuilder {
    graph: FlowGraph,
    pub(crate) context_depth: u32,
    next_deopt_id: u32,
    next_try_index: u32,
    pub(crate) try_catch: Vec<TryCatchBlock>,
    /// `(deopt_id, context_depth)` pairs for the optimizer, when requested.
    context_levels: Option<Vec<(u32, u32)>>,
    stack: Vec<InstrId>,
    pending_argument_count: u32,
    no_such_method_stub: Option<InstrId>,
}

impl BaseFlowGraphBuilder {
    pub fn new(record_context_levels: bool) -> Self {
        Self {
            graph: FlowGraph::new(),
            context_depth: 0,
            next_deopt_id: 0,
            next_try_index: 0,
            try_catch: Vec::new(),
            context_levels: record_context_levels.then(Vec::new),
            stack: Vec::new(),
            pending_argument_count: 0,
            no_such_method_stub: None,
        }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn finish(self) -> (FlowGraph, Vec<(u32, u32)>) {
        (self.graph, self.context_levels.unwrap_or_default())
    }

    // ── Fragment plumbing ───────────────────────────────────────────

    pub fn append(&mut self, first: Fragment, second: Fragment) -> Fragment {
        first.concat(&mut self.graph, second)
    }

    pub(crate) fn link(&mut self, from: InstrId, to: InstrId) {
        self.graph.link(from, to);
    }

    fn add(&mut self, op: Op) -> InstrId {
        let try_index = self.current_try_index();
        self.graph.add(op, try_index)
    }

    fn emit(&mut self, op: Op) -> Fragment {
        Fragment::from_instr(self.add(op))
    }

    // ── Counters ────────────────────────────────────────────────────

    pub fn allocate_try_index(&mut self) -> u32 {
        let index = self.next_try_index;
        self.next_try_index += 1;
        index
    }

    /// Allocate a deopt id, recording the current context depth alongside it
    /// when the optimizer asked for the side table.
    pub fn allocate_deopt_id(&mut self) -> u32 {
        let id = self.next_deopt_id;
        self.next_deopt_id += 1;
        if let Some(levels) = &mut self.context_levels {
            levels.push((id, self.context_depth));
        }
        id
    }

    // ── Try-catch chain ─────────────────────────────────────────────

    pub fn current_try_index(&self) -> Option<u32> {
        self.try_catch.last().map(|b| b.try_index)
    }

    pub(crate) fn push_try_catch(&mut self, try_index: u32) {
        self.try_catch.push(TryCatchBlock { try_index });
    }

    pub(crate) fn pop_try_catch(&mut self) {
        self.try_catch.pop().expect("try-catch stack underflow");
    }

    pub fn try_catch_depth(&self) -> usize {
        self.try_catch.len()
    }

    /// Detach the records inner to `depth`, leaving the environment that was
    /// active at that depth; `restore_try_catch` puts them back.
    pub(crate) fn split_try_catch(&mut self, depth: usize) -> Vec<TryCatchBlock> {
        self.try_catch.split_off(depth)
    }

    pub(crate) fn restore_try_catch(&mut self, saved: Vec<TryCatchBlock>) {
        self.try_catch.extend(saved);
    }

    // ── Block entries ───────────────────────────────────────────────

    pub fn build_target_entry(&mut self) -> InstrId {
        self.add(Op::TargetEntry)
    }

    pub fn build_join_entry(&mut self) -> InstrId {
        self.add(Op::JoinEntry { predecessors: Vec::new() })
    }

    /// Join tagged with an explicit handler region instead of the one active
    /// at the call site; used for jump targets resolved across constructs.
    pub fn build_join_entry_in(&mut self, try_index: Option<u32>) -> InstrId {
        self.graph
            .add(Op::JoinEntry { predecessors: Vec::new() }, try_index)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build_catch_entry(
        &mut self,
        handled_types: Vec<TypeRef>,
        handler_index: u32,
        needs_stack_trace: bool,
        is_synthesized: bool,
        raw_exception_var: LocalVariable,
        raw_stack_trace_var: LocalVariable,
    ) -> InstrId {
        self.add(Op::CatchEntry {
            handled_types,
            handler_index,
            needs_stack_trace,
            is_synthesized,
            raw_exception_var,
            raw_stack_trace_var,
        })
    }

    /// A closed fragment jumping to `join`, registering the predecessor edge.
    pub fn goto_join(&mut self, join: InstrId) -> Fragment {
        self.allocate_deopt_id();
        let goto = self.add(Op::Goto { target: join });
        self.graph.add_predecessor(join, goto);
        Fragment::new(Some(goto), None)
    }

    // ── Operand stack ───────────────────────────────────────────────

    pub fn push(&mut self, definition: InstrId) {
        self.stack.push(definition);
    }

    pub fn pop(&mut self) -> InstrId {
        self.stack.pop().expect("expression stack underflow")
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Pin the value currently on top of the stack.
    pub fn make_temporary(&mut self) -> Temporary {
        let value = *self.stack.last().expect("expression stack is empty");
        Temporary { value }
    }

    /// Re-materialize a pinned value on top of the stack. Emits nothing.
    pub fn load_temporary(&mut self, temporary: &Temporary) -> Fragment {
        self.push(temporary.value);
        Fragment::empty()
    }

    /// Reserve an expression-stack slot with a placeholder definition.
    pub fn make_temp(&mut self) -> Fragment {
        let fragment = self.emit(Op::MakeTemp);
        let id = fragment.entry.unwrap();
        self.push(id);
        fragment
    }

    pub fn drop_temp(&mut self) -> Fragment {
        self.pop();
        self.emit(Op::DropTemps { count: 1, preserved: None })
    }

    /// Discard `count` values below the top of the stack, preserving the top.
    pub fn drop_temps_preserve_top(&mut self, count: u32) -> Fragment {
        let top = self.pop();
        for _ in 0..count {
            self.pop();
        }
        self.push(top);
        self.emit(Op::DropTemps { count, preserved: Some(top) })
    }

    // ── Constants ───────────────────────────────────────────────────

    pub fn constant(&mut self, value: ConstValue) -> Fragment {
        let fragment = self.emit(Op::Constant(value));
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn int_constant(&mut self, value: i64) -> Fragment {
        self.constant(ConstValue::Int(value))
    }

    pub fn bool_constant(&mut self, value: bool) -> Fragment {
        self.constant(ConstValue::Bool(value))
    }

    pub fn null_constant(&mut self) -> Fragment {
        self.constant(ConstValue::Null)
    }

    // ── Loads and stores ────────────────────────────────────────────

    pub fn load_local(&mut self, variable: &LocalVariable) -> Fragment {
        let fragment = self.emit(Op::LoadLocal(variable.clone()));
        self.push(fragment.entry.unwrap());
        fragment
    }

    /// Pops the stored value and pushes the store, which evaluates to it.
    pub fn store_local(&mut self, variable: &LocalVariable) -> Fragment {
        let value = self.pop();
        let fragment = self.emit(Op::StoreLocal { variable: variable.clone(), value });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn load_field(&mut self, field_offset: u32) -> Fragment {
        let receiver = self.pop();
        let fragment = self.emit(Op::LoadField { receiver, field_offset });
        self.push(fragment.entry.unwrap());
        fragment
    }

    /// Pops the value, then the receiver. Pushes nothing.
    pub fn store_field(&mut self, field_offset: u32) -> Fragment {
        let value = self.pop();
        let receiver = self.pop();
        self.emit(Op::StoreField { receiver, field_offset, value })
    }

    pub fn load_indexed(&mut self, index_scale: u8) -> Fragment {
        let index = self.pop();
        let receiver = self.pop();
        let fragment = self.emit(Op::LoadIndexed { receiver, index, index_scale });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn store_indexed(&mut self, index_scale: u8) -> Fragment {
        let value = self.pop();
        let index = self.pop();
        let receiver = self.pop();
        self.emit(Op::StoreIndexed { receiver, index, value, index_scale })
    }

    pub fn allocate_context(&mut self, num_variables: u32) -> Fragment {
        let fragment = self.emit(Op::AllocateContext { num_variables });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn clone_context(&mut self, num_variables: u32) -> Fragment {
        let context = self.pop();
        let fragment = self.emit(Op::CloneContext { context, num_variables });
        self.push(fragment.entry.unwrap());
        fragment
    }

    // ── Comparisons and arithmetic ──────────────────────────────────

    pub fn binary_int_op(&mut self, op: ArithOp) -> Fragment {
        self.allocate_deopt_id();
        let right = self.pop();
        let left = self.pop();
        let fragment = self.emit(Op::BinaryIntOp { op, left, right });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn relational_op(&mut self, op: RelOp) -> Fragment {
        self.allocate_deopt_id();
        let right = self.pop();
        let left = self.pop();
        let fragment = self.emit(Op::RelationalOp { op, left, right });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn strict_compare(&mut self, kind: CompareKind, number_check: bool) -> Fragment {
        let right = self.pop();
        let left = self.pop();
        let fragment = self.emit(Op::StrictCompare { kind, number_check, left, right });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn equality_compare(&mut self, kind: CompareKind) -> Fragment {
        self.allocate_deopt_id();
        let right = self.pop();
        let left = self.pop();
        let fragment = self.emit(Op::EqualityCompare { kind, left, right });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn boolean_negate(&mut self) -> Fragment {
        let value = self.pop();
        let fragment = self.emit(Op::BooleanNegate { value });
        self.push(fragment.entry.unwrap());
        fragment
    }

    // ── Branches ────────────────────────────────────────────────────

    /// Pop the condition and branch on it. Returns the closed fragment plus
    /// the two output targets; `negate` swaps which output is "then".
    pub fn branch_if_true(&mut self, negate: bool) -> (Fragment, InstrId, InstrId) {
        self.branch_on_popped(negate)
    }

    /// Pop a value and branch on whether it is null.
    pub fn branch_if_null(&mut self, negate: bool) -> (Fragment, InstrId, InstrId) {
        let mut fragment = self.null_constant();
        let compare = self.strict_compare(CompareKind::Eq, false);
        fragment = fragment.concat(&mut self.graph, compare);
        let (branch, then_entry, otherwise_entry) = self.branch_on_popped(negate);
        (fragment.concat(&mut self.graph, branch), then_entry, otherwise_entry)
    }

    /// Pop two values and branch on their equality.
    pub fn branch_if_equal(&mut self, negate: bool) -> (Fragment, InstrId, InstrId) {
        let fragment = self.equality_compare(CompareKind::Eq);
        let (branch, then_entry, otherwise_entry) = self.branch_on_popped(negate);
        (fragment.concat(&mut self.graph, branch), then_entry, otherwise_entry)
    }

    /// Pop two values and branch on their identity; number values compare by
    /// value.
    pub fn branch_if_strict_equal(&mut self) -> (Fragment, InstrId, InstrId) {
        let fragment = self.strict_compare(CompareKind::Eq, true);
        let (branch, then_entry, otherwise_entry) = self.branch_on_popped(false);
        (fragment.concat(&mut self.graph, branch), then_entry, otherwise_entry)
    }

    fn branch_on_popped(&mut self, negate: bool) -> (Fragment, InstrId, InstrId) {
        let condition = self.pop();
        self.allocate_deopt_id();
        let then_entry = self.add(Op::TargetEntry);
        let otherwise_entry = self.add(Op::TargetEntry);
        let (true_successor, false_successor) = if negate {
            (otherwise_entry, then_entry)
        } else {
            (then_entry, otherwise_entry)
        };
        let branch = self.add(Op::Branch { condition, true_successor, false_successor });
        (Fragment::new(Some(branch), None), then_entry, otherwise_entry)
    }

    // ── Calls ───────────────────────────────────────────────────────

    /// Pop a value and wrap it for an upcoming call.
    pub fn push_argument(&mut self) -> Fragment {
        let value = self.pop();
        let fragment = self.emit(Op::PushArgument { value });
        self.push(fragment.entry.unwrap());
        self.pending_argument_count += 1;
        fragment
    }

    pub fn pending_argument_count(&self) -> u32 {
        self.pending_argument_count
    }

    /// Collect the last `count` pushed arguments, in push order.
    fn get_arguments(&mut self, count: u32) -> Vec<InstrId> {
        assert!(self.pending_argument_count >= count, "argument stack underflow");
        self.pending_argument_count -= count;
        let mut args = Vec::with_capacity(count as usize);
        for _ in 0..count {
            args.push(self.pop());
        }
        args.reverse();
        args
    }

    pub fn static_call(
        &mut self,
        target: impl Into<String>,
        argument_count: u32,
        result_type: Option<InferredType>,
    ) -> Fragment {
        let args = self.get_arguments(argument_count);
        self.allocate_deopt_id();
        let fragment = self.emit(Op::StaticCall { target: target.into(), args, result_type });
        self.push(fragment.entry.unwrap());
        fragment
    }

    pub fn instance_call(
        &mut self,
        name: impl Into<String>,
        argument_count: u32,
        checked_argument_count: u8,
        result_type: Option<InferredType>,
    ) -> Fragment {
        let args = self.get_arguments(argument_count);
        self.allocate_deopt_id();
        let fragment = self.emit(Op::InstanceCall {
            name: name.into(),
            args,
            checked_argument_count,
            result_type,
        });
        self.push(fragment.entry.unwrap());
        fragment
    }

    // ── Checks and terminators ──────────────────────────────────────

    pub fn check_stack_overflow(&mut self, loop_depth: u32) -> Fragment {
        self.allocate_deopt_id();
        self.emit(Op::CheckStackOverflow { loop_depth })
    }

    /// Pop the return value and close the fragment.
    pub fn return_value(&mut self) -> Fragment {
        let value = self.pop();
        self.emit(Op::Return { value }).closed()
    }

    /// Pop the exception and close the fragment.
    pub fn throw_value(&mut self) -> Fragment {
        self.allocate_deopt_id();
        let exception = self.pop();
        self.emit(Op::Throw { exception }).closed()
    }

    /// Pop the stack trace then the exception and re-raise past the handler
    /// `catch_try_index`.
    pub fn rethrow(&mut self, catch_try_index: u32) -> Fragment {
        self.allocate_deopt_id();
        let stack_trace = self.pop();
        let exception = self.pop();
        self.emit(Op::Rethrow { exception, stack_trace, catch_try_index }).closed()
    }

    /// The shared dispatch-failure stub: a join whose body calls the runtime
    /// entry that raises no-such-method. Built once per function and reused
    /// by every failing check.
    pub fn throw_no_such_method(&mut self) -> InstrId {
        if let Some(stub) = self.no_such_method_stub {
            return stub;
        }
        let join = self.build_join_entry();
        let mut fragment = Fragment::from_instr(join);
        let call = self.static_call(layout::RUNTIME_THROW_NO_SUCH_METHOD, 0, None);
        fragment = fragment.concat(&mut self.graph, call);
        let throw = self.throw_value();
        let _ = fragment.concat(&mut self.graph, throw);
        self.no_such_method_stub = Some(join);
        join
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> BaseFlowGraphBuilder {
        BaseFlowGraphBuilder::new(false)
    }

    #[test]
    fn try_indices_are_monotonic() {
        let mut b = builder();
        assert_eq!(b.allocate_try_index(), 0);
        assert_eq!(b.allocate_try_index(), 1);
        assert_eq!(b.allocate_try_index(), 2);
    }

    #[test]
    fn instructions_are_stamped_with_the_active_try_index() {
        let mut b = builder();
        let outside = b.int_constant(1);
        let index = b.allocate_try_index();
        b.push_try_catch(index);
        let inside = b.int_constant(2);
        b.pop_try_catch();
        assert_eq!(b.graph().node(outside.entry.unwrap()).try_index, None);
        assert_eq!(b.graph().node(inside.entry.unwrap()).try_index, Some(index));
    }

    #[test]
    fn deopt_side_table_records_context_depth() {
        let mut b = BaseFlowGraphBuilder::new(true);
        b.allocate_deopt_id();
        b.context_depth = 2;
        b.allocate_deopt_id();
        let (_, levels) = b.finish();
        assert_eq!(levels, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn deopt_side_table_is_absent_unless_requested() {
        let mut b = builder();
        b.allocate_deopt_id();
        let (_, levels) = b.finish();
        assert!(levels.is_empty());
    }

    #[test]
    fn store_local_leaves_the_value_on_the_stack() {
        let mut b = builder();
        let v = LocalVariable::slot("x", 0);
        b.int_constant(7);
        b.store_local(&v);
        assert_eq!(b.stack_depth(), 1);
    }

    #[test]
    fn branch_negate_swaps_successors() {
        let mut b = builder();
        b.bool_constant(true);
        let (_, then_entry, otherwise_entry) = b.branch_if_true(true);
        let branch = b
            .graph()
            .iter()
            .find_map(|(_, n)| match n.op {
                Op::Branch { true_successor, false_successor, .. } => {
                    Some((true_successor, false_successor))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(branch.0, otherwise_entry);
        assert_eq!(branch.1, then_entry);
    }

    #[test]
    fn get_arguments_preserves_push_order() {
        let mut b = builder();
        b.int_constant(1);
        b.push_argument();
        b.int_constant(2);
        b.push_argument();
        b.static_call("f", 2, None);
        let args = b
            .graph()
            .iter()
            .find_map(|(_, n)| match &n.op {
                Op::StaticCall { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap();
        let first = match b.graph().node(args[0]).op {
            Op::PushArgument { value } => value,
            _ => panic!("expected push-argument"),
        };
        assert!(matches!(b.graph().node(first).op, Op::Constant(ConstValue::Int(1))));
    }

    #[test]
    fn drop_temps_preserve_top_keeps_the_top_value() {
        let mut b = builder();
        b.int_constant(1);
        b.int_constant(2);
        let top = b.int_constant(3).entry.unwrap();
        b.drop_temps_preserve_top(2);
        assert_eq!(b.stack_depth(), 1);
        assert_eq!(b.pop(), top);
    }

    #[test]
    fn load_temporary_rematerializes_the_pinned_value() {
        let mut b = builder();
        let value = b.int_constant(9).entry.unwrap();
        let temp = b.make_temporary();
        b.pop();
        b.load_temporary(&temp);
        assert_eq!(b.pop(), value);
    }

    #[test]
    fn no_such_method_stub_is_built_once() {
        let mut b = builder();
        let first = b.throw_no_such_method();
        let second = b.throw_no_such_method();
        assert_eq!(first, second);
    }

    #[test]
    fn goto_registers_a_join_predecessor() {
        let mut b = builder();
        let join = b.build_join_entry();
        b.goto_join(join);
        b.goto_join(join);
        assert_eq!(b.graph().predecessor_count(join), 2);
    }
}
