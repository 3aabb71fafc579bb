// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! The flow-graph builder driver.
//!
//! One instance lowers one function: it walks the decoded tree one construct
//! at a time, dispatching on node kind, and assembles the finished graph in
//! a single pass. Non-local transfers resolve through the scoped record
//! stacks in [`crate::blocks`]; primitive fragments come from
//! [`crate::BaseFlowGraphBuilder`].

mod expr;
mod stmt;

use veld_ast::{CallSiteHints, Function, NodeOffset, Stmt, TypeRef};
use veld_il::{layout, FlowGraph, InstrId, Op};
use veld_scopes::{FunctionScopes, LocalVariable, VarLocation};

use crate::blocks::{BreakableBlock, CatchBlock, SwitchBlock, TryFinallyBlock};
use crate::{Bailout, BaseFlowGraphBuilder, Fragment};

/// Per-function translation options, threaded explicitly (no ambient state).
#[derive(Debug, Clone, Copy)]
pub struct BuilderOptions {
    /// Building a body for inlining into another function; constructs the
    /// inliner cannot handle bail out instead of translating.
    pub inlining: bool,
    /// Emit interrupt/overflow checks in the prologue and at loop heads.
    pub emit_stack_overflow_checks: bool,
    /// Record the `(deopt_id, context_depth)` side table for the optimizer.
    pub record_context_levels: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            inlining: false,
            emit_stack_overflow_checks: true,
            record_context_levels: false,
        }
    }
}

/// A resumption entry point of a suspending function, paired with the
/// handler region active at the suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldContinuation {
    pub entry: InstrId,
    pub try_index: Option<u32>,
}

/// Everything flow-graph construction hands downstream.
#[derive(Debug)]
pub struct FlowGraphResult {
    pub graph: FlowGraph,
    /// Suspension re-entry points in source order; downstream code builds
    /// the resumption dispatch from these.
    pub yield_continuations: Vec<YieldContinuation>,
    /// `(deopt_id, context_depth)` pairs, empty unless requested.
    pub context_levels: Vec<(u32, u32)>,
}

pub struct FlowGraphBuilder<'a> {
    pub(crate) base: BaseFlowGraphBuilder,
    pub(crate) function: &'a Function,
    pub(crate) scopes: &'a FunctionScopes,
    pub(crate) hints: Option<&'a CallSiteHints>,
    pub(crate) options: BuilderOptions,

    // Nesting counters; used for diagnostics and variable lookup, never for
    // control resolution (that goes through the record stacks below).
    pub(crate) loop_depth: u32,
    pub(crate) try_depth: u32,
    pub(crate) catch_depth: u32,
    pub(crate) for_in_depth: u32,

    pub(crate) breakable: Vec<BreakableBlock>,
    pub(crate) switches: Vec<SwitchBlock>,
    pub(crate) try_finally: Vec<TryFinallyBlock<'a>>,
    pub(crate) catch_blocks: Vec<CatchBlock>,

    pub(crate) yield_continuations: Vec<YieldContinuation>,
}

impl<'a> FlowGraphBuilder<'a> {
    pub fn new(
        function: &'a Function,
        scopes: &'a FunctionScopes,
        hints: Option<&'a CallSiteHints>,
        options: BuilderOptions,
    ) -> Self {
        Self {
            base: BaseFlowGraphBuilder::new(options.record_context_levels),
            function,
            scopes,
            hints,
            options,
            loop_depth: 0,
            try_depth: 0,
            catch_depth: 0,
            for_in_depth: 0,
            breakable: Vec::new(),
            switches: Vec::new(),
            try_finally: Vec::new(),
            catch_blocks: Vec::new(),
            yield_continuations: Vec::new(),
        }
    }

    /// Lower the whole function: prologue, body, implicit return.
    pub fn build_graph(mut self) -> Result<FlowGraphResult, Bailout> {
        let normal_entry = self.base.build_target_entry();
        let mut instructions = Fragment::from_instr(normal_entry);
        let prologue = self.build_prologue()?;
        instructions = self.base.append(instructions, prologue);

        let function: &'a Function = self.function;
        let body: &'a Stmt = &function.body;
        let body_fragment = self.translate_stmt(body)?;
        instructions = self.base.append(instructions, body_fragment);

        if instructions.is_open() {
            let null = self.base.null_constant();
            instructions = self.base.append(instructions, null);
            let ret = self.base.return_value();
            instructions = self.base.append(instructions, ret);
        }

        debug_assert!(self.breakable.is_empty(), "breakable records leaked");
        debug_assert!(self.switches.is_empty(), "switch records leaked");
        debug_assert!(self.try_finally.is_empty(), "try-finally records leaked");
        debug_assert!(self.catch_blocks.is_empty(), "catch records leaked");
        debug_assert_eq!(self.base.try_catch_depth(), 0, "try-catch records leaked");

        let yield_continuations = std::mem::take(&mut self.yield_continuations);
        let (mut graph, context_levels) = self.base.finish();
        graph.entry = Some(normal_entry);
        Ok(FlowGraphResult { graph, yield_continuations, context_levels })
    }

    // ── Prologue ────────────────────────────────────────────────────

    fn build_prologue(&mut self) -> Result<Fragment, Bailout> {
        let scopes = self.scopes;
        let mut prologue = Fragment::empty();

        if self.options.emit_stack_overflow_checks {
            let check = self.base.check_stack_overflow(0);
            prologue = self.base.append(prologue, check);
        }

        if let Some(arg_desc) = &scopes.argument_descriptor_var {
            let check = self.check_descriptor_count(
                arg_desc,
                layout::ARGDESC_COUNT_OFFSET,
                i64::from(self.function.arity),
            );
            prologue = self.base.append(prologue, check);
            if self.function.type_parameters > 0 {
                let check = self.check_descriptor_count(
                    arg_desc,
                    layout::ARGDESC_TYPE_ARGS_LEN_OFFSET,
                    i64::from(self.function.type_parameters),
                );
                prologue = self.base.append(prologue, check);
            }
        }

        if scopes.context_size > 0 {
            let setup = self.push_context(scopes.context_size);
            prologue = self.base.append(prologue, setup);
            let context_var = scopes.current_context_var();
            for captured in &scopes.captured_parameters {
                let mut copy = self.base.load_local(context_var);
                let load = self.base.load_local(&captured.home);
                copy = self.base.append(copy, load);
                let store = self
                    .base
                    .store_field(layout::context_variable_offset(captured.context_index));
                copy = self.base.append(copy, store);
                prologue = self.base.append(prologue, copy);
            }
        }

        Ok(prologue)
    }

    /// Compare a field of the argument descriptor against `expected`; a
    /// mismatch falls into the shared dispatch-failure stub.
    fn check_descriptor_count(
        &mut self,
        arg_desc: &LocalVariable,
        field_offset: u32,
        expected: i64,
    ) -> Fragment {
        let mut fragment = self.base.load_local(arg_desc);
        let load = self.base.load_field(field_offset);
        fragment = self.base.append(fragment, load);
        let constant = self.base.int_constant(expected);
        fragment = self.base.append(fragment, constant);
        let (branch, ok_entry, fail_entry) = self.base.branch_if_strict_equal();
        fragment = self.base.append(fragment, branch);

        let stub = self.base.throw_no_such_method();
        let fail = Fragment::from_instr(fail_entry);
        let goto = self.base.goto_join(stub);
        let _ = self.base.append(fail, goto);

        Fragment::new(fragment.entry, Some(ok_entry))
    }

    // ── Shared fragment helpers ─────────────────────────────────────

    /// Route an open fragment into `entry`, which is either a join (entered
    /// via goto) or a plain instruction (entered via fallthrough).
    pub(crate) fn jump_to(&mut self, from: Fragment, entry: InstrId) {
        debug_assert!(from.is_open() && from.entry.is_some());
        if matches!(self.base.graph().node(entry).op, Op::JoinEntry { .. }) {
            let goto = self.base.goto_join(entry);
            let _ = self.base.append(from, goto);
        } else {
            self.base.link(from.current.expect("open fragment"), entry);
        }
    }

    // ── Lexical contexts ────────────────────────────────────────────

    /// Entering a scope that captures variables allocates a fresh context
    /// chained to the current one.
    pub(crate) fn enter_scope(&mut self, offset: NodeOffset) -> Fragment {
        let info = self.scopes.scope_info(offset);
        if info.context_size > 0 {
            self.push_context(info.context_size)
        } else {
            Fragment::empty()
        }
    }

    pub(crate) fn exit_scope(&mut self, offset: NodeOffset) -> Fragment {
        let info = self.scopes.scope_info(offset);
        if info.context_size > 0 {
            self.adjust_context_to(self.base.context_depth - 1)
        } else {
            Fragment::empty()
        }
    }

    fn push_context(&mut self, size: u32) -> Fragment {
        debug_assert!(size > 0);
        let context_var = self.scopes.current_context_var();
        let mut instructions = self.base.allocate_context(size);
        let context = self.base.make_temporary();
        let reload = self.base.load_temporary(&context);
        instructions = self.base.append(instructions, reload);
        let parent = self.base.load_local(context_var);
        instructions = self.base.append(instructions, parent);
        let chain = self.base.store_field(layout::CONTEXT_PARENT_OFFSET);
        instructions = self.base.append(instructions, chain);
        let install = self.base.store_local(context_var);
        instructions = self.base.append(instructions, install);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);
        self.base.context_depth += 1;
        instructions
    }

    /// Emit the parent-chain walk that re-installs the context at `depth`.
    /// No-op when already there; jumping across scope boundaries depends on
    /// this running before the transfer.
    pub(crate) fn adjust_context_to(&mut self, depth: u32) -> Fragment {
        debug_assert!(depth <= self.base.context_depth);
        let mut instructions = Fragment::empty();
        if depth < self.base.context_depth {
            let context_var = self.scopes.current_context_var();
            instructions = self.load_context_at(depth);
            let store = self.base.store_local(context_var);
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
            self.base.context_depth = depth;
        }
        instructions
    }

    /// Push the context object at `depth` by walking parent links from the
    /// current one.
    pub(crate) fn load_context_at(&mut self, depth: u32) -> Fragment {
        let context_var = self.scopes.current_context_var();
        let mut instructions = self.base.load_local(context_var);
        let mut delta = self.base.context_depth - depth;
        while delta > 0 {
            let hop = self.base.load_field(layout::CONTEXT_PARENT_OFFSET);
            instructions = self.base.append(instructions, hop);
            delta -= 1;
        }
        instructions
    }

    /// Re-clone the current context so each loop iteration observes distinct
    /// captured bindings.
    pub(crate) fn clone_current_context(&mut self, num_variables: u32) -> Fragment {
        let context_var = self.scopes.current_context_var();
        let mut instructions = self.base.load_local(context_var);
        let clone = self.base.clone_context(num_variables);
        instructions = self.base.append(instructions, clone);
        let store = self.base.store_local(context_var);
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);
        instructions
    }

    // ── Variable access ─────────────────────────────────────────────

    pub(crate) fn load_variable(&mut self, variable: &LocalVariable) -> Fragment {
        match variable.location {
            VarLocation::Slot(_) => self.base.load_local(variable),
            VarLocation::Context { depth, index } => {
                let instructions = self.load_context_at(depth);
                let load = self.base.load_field(layout::context_variable_offset(index));
                self.base.append(instructions, load)
            }
        }
    }

    /// Store the value on top of the stack into `variable`; the value stays
    /// on the stack as the result of the store expression.
    pub(crate) fn store_variable(&mut self, variable: &LocalVariable) -> Fragment {
        match variable.location {
            VarLocation::Slot(_) => self.base.store_local(variable),
            VarLocation::Context { depth, index } => {
                let value = self.base.make_temporary();
                let mut instructions = self.load_context_at(depth);
                let reload = self.base.load_temporary(&value);
                instructions = self.base.append(instructions, reload);
                let store = self.base.store_field(layout::context_variable_offset(index));
                self.base.append(instructions, store)
            }
        }
    }

    // ── Protected regions ───────────────────────────────────────────

    /// Save the context on entry to a protected region so the handler can
    /// restore it.
    pub(crate) fn enter_try(&mut self) -> Fragment {
        if self.scopes.current_context_var.is_none() {
            return Fragment::empty();
        }
        let context_var = self.scopes.current_context_var();
        let saved = self.scopes.catch_context_var(self.try_depth);
        let mut instructions = self.base.load_local(context_var);
        let store = self.base.store_local(saved);
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        self.base.append(instructions, drop)
    }

    /// Open a handler: allocate the catch entry, restore the saved context,
    /// and populate the checked exception/stack-trace pair from the raw one.
    pub(crate) fn catch_block_entry(
        &mut self,
        handled_types: Vec<TypeRef>,
        handler_index: u32,
        needs_stack_trace: bool,
        is_synthesized: bool,
    ) -> Fragment {
        let scopes = self.scopes;
        let depth = self.catch_depth - 1;
        let raw_exception = scopes.raw_exception_var(depth).clone();
        let raw_stack_trace = scopes.raw_stack_trace_var(depth).clone();
        let entry = self.base.build_catch_entry(
            handled_types,
            handler_index,
            needs_stack_trace,
            is_synthesized,
            raw_exception.clone(),
            raw_stack_trace.clone(),
        );
        let mut instructions = Fragment::from_instr(entry);

        if scopes.current_context_var.is_some() {
            let saved = scopes.catch_context_var(self.try_depth);
            let context_var = scopes.current_context_var();
            let load = self.base.load_local(saved);
            instructions = self.base.append(instructions, load);
            let store = self.base.store_local(context_var);
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
        }

        let load = self.base.load_local(&raw_exception);
        instructions = self.base.append(instructions, load);
        let store = self.base.store_local(scopes.exception_var(depth));
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);
        if needs_stack_trace {
            let load = self.base.load_local(&raw_stack_trace);
            instructions = self.base.append(instructions, load);
            let store = self.base.store_local(scopes.stack_trace_var(depth));
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
        }
        instructions
    }

    // ── Finalizer replay ────────────────────────────────────────────

    /// Re-translate every finalizer between the current position and the
    /// record stack depth `outer_finally`, innermost first. Each replay
    /// restores that finalizer's recorded context depth and handler
    /// environment; afterwards the builder state is exactly as before the
    /// call. A replayed finalizer that terminates the run stops the walk.
    pub(crate) fn translate_finally_finalizers(
        &mut self,
        outer_finally: usize,
        target_context_depth: Option<u32>,
    ) -> Result<Fragment, Bailout> {
        let saved_context_depth = self.base.context_depth;
        let saved_try_depth = self.try_depth;
        let mut replayed: Vec<TryFinallyBlock<'a>> = Vec::new();
        let mut instructions = Fragment::empty();
        let mut failure: Option<Bailout> = None;

        while self.try_finally.len() > outer_finally {
            // Popping makes the enclosing records the active chain while
            // this finalizer's body is re-translated.
            let record = self.try_finally.pop().expect("record counted above");
            self.try_depth = record.try_depth;
            let adjust = self.adjust_context_to(record.context_depth);
            instructions = self.base.append(instructions, adjust);

            let detached = self.base.split_try_catch(record.try_catch_depth);
            debug_assert_eq!(self.base.current_try_index(), record.try_index);
            let result = self.translate_stmt(record.finalizer);
            self.base.restore_try_catch(detached);
            replayed.push(record);

            match result {
                Ok(finalizer) => {
                    instructions = self.base.append(instructions, finalizer);
                    if instructions.is_closed() {
                        break;
                    }
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if failure.is_none() && instructions.is_open() {
            if let Some(depth) = target_context_depth {
                let adjust = self.adjust_context_to(depth);
                instructions = self.base.append(instructions, adjust);
            }
        }

        while let Some(record) = replayed.pop() {
            self.try_finally.push(record);
        }
        self.base.context_depth = saved_context_depth;
        self.try_depth = saved_try_depth;

        match failure {
            Some(error) => Err(error),
            None => Ok(instructions),
        }
    }
}
