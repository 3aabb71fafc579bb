// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Statement translation.

use veld_ast::{CatchClause, Expr, NodeOffset, Stmt, StmtKind, SwitchCase, TypeRef};
use veld_il::{layout, ConstValue, InstrId};
use veld_scopes::LocalVariable;

use super::{FlowGraphBuilder, YieldContinuation};
use crate::{Bailout, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(crate) fn translate_stmt(&mut self, stmt: &'a Stmt) -> Result<Fragment, Bailout> {
        match &stmt.kind {
            StmtKind::Empty => Ok(Fragment::empty()),
            StmtKind::Block(stmts) => self.translate_block(stmt.offset, stmts),
            StmtKind::Expr(expr) => {
                let mut instructions = self.translate_expr(expr)?;
                if instructions.is_open() {
                    let drop = self.base.drop_temp();
                    instructions = self.base.append(instructions, drop);
                }
                Ok(instructions)
            }
            StmtKind::VariableDeclaration { init } => {
                self.translate_variable_declaration(stmt.offset, init.as_ref())
            }
            StmtKind::If { condition, then, otherwise } => {
                self.translate_if(condition, then, otherwise.as_deref())
            }
            StmtKind::Labeled(body) => self.translate_labeled(body),
            StmtKind::Break { label_index } => self.translate_break(*label_index),
            StmtKind::While { condition, body } => {
                self.loop_depth += 1;
                let result = self.translate_while(condition, body);
                self.loop_depth -= 1;
                result
            }
            StmtKind::DoWhile { body, condition } => {
                self.loop_depth += 1;
                let result = self.translate_do_while(body, condition);
                self.loop_depth -= 1;
                result
            }
            StmtKind::For { variables, condition, updates, body } => {
                self.loop_depth += 1;
                let result =
                    self.translate_for(stmt.offset, variables, condition.as_ref(), updates, body);
                self.loop_depth -= 1;
                result
            }
            StmtKind::ForIn { variable, iterable, body } => {
                self.translate_for_in(stmt.offset, *variable, iterable, body)
            }
            StmtKind::Switch { value, cases } => self.translate_switch(value, cases),
            StmtKind::ContinueSwitch { target_index } => {
                self.translate_continue_switch(*target_index)
            }
            StmtKind::TryCatch { body, catches } => self.translate_try_catch(body, catches),
            StmtKind::TryFinally { body, finalizer } => {
                self.translate_try_finally(body, finalizer)
            }
            StmtKind::Return { value } => self.translate_return(value.as_ref()),
            StmtKind::Yield { value } => self.translate_yield(value),
        }
    }

    // ── Straight-line statements ────────────────────────────────────

    fn translate_block(&mut self, offset: NodeOffset, stmts: &'a [Stmt]) -> Result<Fragment, Bailout> {
        let mut instructions = self.enter_scope(offset);
        for stmt in stmts {
            if instructions.is_closed() {
                // statements after a jump or throw are unreachable
                break;
            }
            let fragment = self.translate_stmt(stmt)?;
            instructions = self.base.append(instructions, fragment);
        }
        if instructions.is_open() {
            let exit = self.exit_scope(offset);
            instructions = self.base.append(instructions, exit);
        }
        Ok(instructions)
    }

    fn translate_variable_declaration(
        &mut self,
        offset: NodeOffset,
        init: Option<&'a Expr>,
    ) -> Result<Fragment, Bailout> {
        let variable = self.scopes.variable(offset).clone();
        let mut instructions = match init {
            Some(expr) => self.translate_expr(expr)?,
            None => self.base.null_constant(),
        };
        if instructions.is_open() {
            let store = self.store_variable(&variable);
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
        }
        Ok(instructions)
    }

    fn translate_if(
        &mut self,
        condition: &'a Expr,
        then: &'a Stmt,
        otherwise: Option<&'a Stmt>,
    ) -> Result<Fragment, Bailout> {
        let (instructions, then_entry, otherwise_entry) = self.translate_condition(condition, false)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let mut then_fragment = Fragment::from_instr(then_entry);
        let inner = self.translate_stmt(then)?;
        then_fragment = self.base.append(then_fragment, inner);
        let mut otherwise_fragment = Fragment::from_instr(otherwise_entry);
        if let Some(otherwise) = otherwise {
            let inner = self.translate_stmt(otherwise)?;
            otherwise_fragment = self.base.append(otherwise_fragment, inner);
        }

        match (then_fragment.is_open(), otherwise_fragment.is_open()) {
            (true, true) => {
                let join = self.base.build_join_entry();
                let goto = self.base.goto_join(join);
                let _ = self.base.append(then_fragment, goto);
                let goto = self.base.goto_join(join);
                let _ = self.base.append(otherwise_fragment, goto);
                Ok(Fragment::new(instructions.entry, Some(join)))
            }
            (true, false) => Ok(Fragment::new(instructions.entry, then_fragment.current)),
            (false, true) => Ok(Fragment::new(instructions.entry, otherwise_fragment.current)),
            (false, false) => Ok(Fragment::new(instructions.entry, None)),
        }
    }

    // ── Breakable constructs and jumps ──────────────────────────────

    fn translate_labeled(&mut self, body: &'a Stmt) -> Result<Fragment, Bailout> {
        self.push_breakable();
        let result = self.translate_stmt(body);
        let record = self.pop_breakable();
        let mut instructions = result?;
        if let Some(destination) = record.destination {
            if instructions.is_open() {
                let goto = self.base.goto_join(destination);
                instructions = self.base.append(instructions, goto);
            }
            instructions = Fragment::new(instructions.entry, Some(destination));
        }
        Ok(instructions)
    }

    fn translate_break(&mut self, label_index: u32) -> Result<Fragment, Bailout> {
        let target = self.break_destination(label_index);
        let mut instructions =
            self.translate_finally_finalizers(target.outer_finally, Some(target.context_depth))?;
        if instructions.is_open() {
            let goto = self.base.goto_join(target.destination);
            instructions = self.base.append(instructions, goto);
        }
        Ok(instructions)
    }

    fn translate_continue_switch(&mut self, target_index: u32) -> Result<Fragment, Bailout> {
        let target = self.switch_destination(target_index);
        let mut instructions =
            self.translate_finally_finalizers(target.outer_finally, Some(target.context_depth))?;
        if instructions.is_open() {
            let goto = self.base.goto_join(target.destination);
            instructions = self.base.append(instructions, goto);
        }
        Ok(instructions)
    }

    fn translate_return(&mut self, value: Option<&'a Expr>) -> Result<Fragment, Bailout> {
        let mut instructions = match value {
            Some(expr) => self.translate_expr(expr)?,
            None => self.base.null_constant(),
        };
        if instructions.is_closed() {
            return Ok(instructions);
        }
        // The return value rides the expression stack across the replays.
        let finalizers = self.translate_finally_finalizers(0, None)?;
        instructions = self.base.append(instructions, finalizers);
        if instructions.is_open() {
            let ret = self.base.return_value();
            instructions = self.base.append(instructions, ret);
        }
        Ok(instructions)
    }

    // ── Loops ───────────────────────────────────────────────────────

    fn translate_while(&mut self, condition: &'a Expr, body: &'a Stmt) -> Result<Fragment, Bailout> {
        let (condition, body_entry, loop_exit) = self.translate_condition(condition, false)?;
        if condition.is_closed() {
            return Ok(condition);
        }
        let mut body_fragment = Fragment::from_instr(body_entry);
        let inner = self.translate_stmt(body)?;
        body_fragment = self.base.append(body_fragment, inner);

        let entry = if body_fragment.is_open() {
            let join = self.base.build_join_entry();
            let goto = self.base.goto_join(join);
            let _ = self.base.append(body_fragment, goto);
            let mut loop_fragment = Fragment::from_instr(join);
            let check = self.base.check_stack_overflow(self.loop_depth);
            loop_fragment = self.base.append(loop_fragment, check);
            let _ = self.base.append(loop_fragment, condition);
            let goto = self.base.goto_join(join);
            goto.entry.expect("goto fragment has an entry")
        } else {
            condition.entry.expect("condition fragment has an entry")
        };
        Ok(Fragment::new(Some(entry), Some(loop_exit)))
    }

    fn translate_do_while(&mut self, body: &'a Stmt, condition: &'a Expr) -> Result<Fragment, Bailout> {
        let body_fragment = self.translate_stmt(body)?;
        if body_fragment.is_closed() {
            return Ok(body_fragment);
        }
        let join = self.base.build_join_entry();
        let mut loop_fragment = Fragment::from_instr(join);
        let check = self.base.check_stack_overflow(self.loop_depth);
        loop_fragment = self.base.append(loop_fragment, check);
        loop_fragment = self.base.append(loop_fragment, body_fragment);
        let (condition, repeat_entry, loop_exit) = self.translate_condition(condition, false)?;
        let _ = self.base.append(loop_fragment, condition);
        let repeat = Fragment::from_instr(repeat_entry);
        let goto = self.base.goto_join(join);
        let _ = self.base.append(repeat, goto);
        let entry = self.base.goto_join(join);
        Ok(Fragment::new(entry.entry, Some(loop_exit)))
    }

    fn translate_for(
        &mut self,
        offset: NodeOffset,
        variables: &'a [Stmt],
        condition: Option<&'a Expr>,
        updates: &'a [Expr],
        body: &'a Stmt,
    ) -> Result<Fragment, Bailout> {
        let mut declarations = self.enter_scope(offset);
        for variable in variables {
            let fragment = self.translate_stmt(variable)?;
            declarations = self.base.append(declarations, fragment);
        }
        if declarations.is_closed() {
            return Ok(declarations);
        }

        let (condition, body_entry, loop_exit) = match condition {
            Some(expr) => self.translate_condition(expr, false)?,
            None => {
                let constant = self.base.bool_constant(true);
                let (branch, then_entry, otherwise_entry) = self.base.branch_if_true(false);
                (self.base.append(constant, branch), then_entry, otherwise_entry)
            }
        };
        if condition.is_closed() {
            return Ok(self.base.append(declarations, condition));
        }

        let mut body_fragment = Fragment::from_instr(body_entry);
        let inner = self.translate_stmt(body)?;
        body_fragment = self.base.append(body_fragment, inner);
        if body_fragment.is_open() {
            // each iteration observes fresh bindings for captured loop vars
            let context_size = self.scopes.scope_info(offset).context_size;
            if context_size > 0 {
                let clone = self.clone_current_context(context_size);
                body_fragment = self.base.append(body_fragment, clone);
            }
            for update in updates {
                let fragment = self.translate_expr(update)?;
                body_fragment = self.base.append(body_fragment, fragment);
                if body_fragment.is_closed() {
                    break;
                }
                let drop = self.base.drop_temp();
                body_fragment = self.base.append(body_fragment, drop);
            }
        }

        let entry = if body_fragment.is_open() {
            let join = self.base.build_join_entry();
            let goto = self.base.goto_join(join);
            let _ = self.base.append(body_fragment, goto);
            let mut loop_fragment = Fragment::from_instr(join);
            let check = self.base.check_stack_overflow(self.loop_depth);
            loop_fragment = self.base.append(loop_fragment, check);
            let _ = self.base.append(loop_fragment, condition);
            let goto = self.base.goto_join(join);
            goto.entry.expect("goto fragment has an entry")
        } else {
            condition.entry.expect("condition fragment has an entry")
        };

        if let Some(current) = declarations.current {
            self.base.link(current, entry);
        }
        let mut instructions =
            Fragment::new(declarations.entry.or(Some(entry)), Some(loop_exit));
        let exit = self.exit_scope(offset);
        instructions = self.base.append(instructions, exit);
        Ok(instructions)
    }

    fn translate_for_in(
        &mut self,
        offset: NodeOffset,
        variable: NodeOffset,
        iterable: &'a Expr,
        body: &'a Stmt,
    ) -> Result<Fragment, Bailout> {
        let iterator = self.scopes.iterator_var(self.for_in_depth).clone();
        let mut instructions = self.translate_expr(iterable)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let push = self.base.push_argument();
        instructions = self.base.append(instructions, push);
        let call = self.base.instance_call("iterator", 1, 1, None);
        instructions = self.base.append(instructions, call);
        let store = self.base.store_local(&iterator);
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);

        self.loop_depth += 1;
        self.for_in_depth += 1;
        let result = self.translate_for_in_loop(offset, variable, &iterator, body);
        self.for_in_depth -= 1;
        self.loop_depth -= 1;
        let loop_fragment = result?;
        Ok(self.base.append(instructions, loop_fragment))
    }

    fn translate_for_in_loop(
        &mut self,
        offset: NodeOffset,
        variable: NodeOffset,
        iterator: &LocalVariable,
        body: &'a Stmt,
    ) -> Result<Fragment, Bailout> {
        let mut condition = self.base.load_local(iterator);
        let push = self.base.push_argument();
        condition = self.base.append(condition, push);
        let call = self.base.instance_call("moveNext", 1, 1, None);
        condition = self.base.append(condition, call);
        let (branch, body_entry, loop_exit) = self.base.branch_if_true(false);
        condition = self.base.append(condition, branch);

        let mut body_fragment = Fragment::from_instr(body_entry);
        let scope = self.enter_scope(offset);
        body_fragment = self.base.append(body_fragment, scope);
        let load = self.base.load_local(iterator);
        body_fragment = self.base.append(body_fragment, load);
        let push = self.base.push_argument();
        body_fragment = self.base.append(body_fragment, push);
        let call = self.base.instance_call("current", 1, 1, None);
        body_fragment = self.base.append(body_fragment, call);
        let bound = self.scopes.variable(variable).clone();
        let store = self.store_variable(&bound);
        body_fragment = self.base.append(body_fragment, store);
        let drop = self.base.drop_temp();
        body_fragment = self.base.append(body_fragment, drop);
        let inner = self.translate_stmt(body)?;
        body_fragment = self.base.append(body_fragment, inner);
        if body_fragment.is_open() {
            let exit = self.exit_scope(offset);
            body_fragment = self.base.append(body_fragment, exit);
        }

        let entry = if body_fragment.is_open() {
            let join = self.base.build_join_entry();
            let goto = self.base.goto_join(join);
            let _ = self.base.append(body_fragment, goto);
            let mut loop_fragment = Fragment::from_instr(join);
            let check = self.base.check_stack_overflow(self.loop_depth);
            loop_fragment = self.base.append(loop_fragment, check);
            let _ = self.base.append(loop_fragment, condition);
            let goto = self.base.goto_join(join);
            goto.entry.expect("goto fragment has an entry")
        } else {
            condition.entry.expect("condition fragment has an entry")
        };
        Ok(Fragment::new(Some(entry), Some(loop_exit)))
    }

    // ── Switch ──────────────────────────────────────────────────────

    fn translate_switch(
        &mut self,
        value: &'a Expr,
        cases: &'a [SwitchCase],
    ) -> Result<Fragment, Bailout> {
        let mut head = self.translate_expr(value)?;
        if head.is_closed() {
            return Ok(head);
        }
        let switch_var = self.scopes.switch_var().clone();
        let store = self.base.store_local(&switch_var);
        head = self.base.append(head, store);
        let drop = self.base.drop_temp();
        head = self.base.append(head, drop);

        self.push_switch(cases.len() as u32);
        let result = self.translate_switch_inner(head, &switch_var, cases);
        self.pop_switch();
        result
    }

    fn translate_switch_inner(
        &mut self,
        head: Fragment,
        switch_var: &LocalVariable,
        cases: &'a [SwitchCase],
    ) -> Result<Fragment, Bailout> {
        // Case bodies are translated before the dispatch chain so jumps
        // between cases can resolve their destinations.
        let mut bodies = Vec::with_capacity(cases.len());
        for case in cases {
            bodies.push(self.translate_stmt(&case.body)?);
        }

        // Falling off an open case body leaves the switch.
        let mut exit_join: Option<InstrId> = None;
        for body in &mut bodies {
            if body.is_open() {
                let join = match exit_join {
                    Some(join) => join,
                    None => {
                        let join = self.base.build_join_entry();
                        exit_join = Some(join);
                        join
                    }
                };
                let goto = self.base.goto_join(join);
                *body = self.base.append(*body, goto);
            }
        }

        // Comparison chain in declaration order; case expressions are
        // constants.
        let mut current = head;
        let mut default_entry: Option<InstrId> = None;
        for (i, case) in cases.iter().enumerate() {
            let case_num = i as u32;
            let needs_join = case.expressions.len() > 1 || self.switch_had_jumper(case_num);
            let body_entry = if needs_join {
                let join = self.switch_destination_direct(case_num).destination;
                let entry = bodies[i].entry.expect("translated case body has an entry");
                self.base.link(join, entry);
                join
            } else {
                bodies[i].entry.expect("translated case body has an entry")
            };
            if case.is_default {
                default_entry = Some(body_entry);
                continue;
            }
            for expression in &case.expressions {
                let load = self.base.load_local(switch_var);
                current = self.base.append(current, load);
                let constant = self.translate_expr(expression)?;
                current = self.base.append(current, constant);
                let (branch, match_entry, no_match_entry) = self.base.branch_if_strict_equal();
                current = self.base.append(current, branch);
                self.jump_to(Fragment::from_instr(match_entry), body_entry);
                current = Fragment::from_instr(no_match_entry);
            }
        }

        let entry = head.entry;
        if let Some(default_entry) = default_entry {
            self.jump_to(current, default_entry);
            Ok(Fragment::new(entry, exit_join))
        } else if let Some(join) = exit_join {
            let goto = self.base.goto_join(join);
            let _ = self.base.append(current, goto);
            Ok(Fragment::new(entry, Some(join)))
        } else {
            Ok(Fragment::new(entry, current.current))
        }
    }

    // ── Protected regions ───────────────────────────────────────────

    fn translate_try_catch(
        &mut self,
        body: &'a Stmt,
        catches: &'a [CatchClause],
    ) -> Result<Fragment, Bailout> {
        if self.options.inlining {
            return Err(Bailout::InlinedConstruct { construct: "try/catch" });
        }
        let try_index = self.base.allocate_try_index();
        let mut try_body = self.enter_try();
        let after_try = self.base.build_join_entry();

        self.try_depth += 1;
        self.base.push_try_catch(try_index);
        let body_result = self.translate_stmt(body);
        self.base.pop_try_catch();
        self.try_depth -= 1;

        let mut inner = body_result?;
        if inner.is_open() {
            let goto = self.base.goto_join(after_try);
            inner = self.base.append(inner, goto);
        }
        try_body = self.base.append(try_body, inner);

        self.catch_depth += 1;
        let handlers = self.translate_catch_clauses(try_index, catches, after_try);
        self.catch_depth -= 1;
        handlers?;

        Ok(Fragment::new(try_body.entry, Some(after_try)))
    }

    fn translate_catch_clauses(
        &mut self,
        try_index: u32,
        catches: &'a [CatchClause],
        after_try: InstrId,
    ) -> Result<(), Bailout> {
        let handled_types: Vec<TypeRef> = catches
            .iter()
            .map(|c| c.guard.clone().unwrap_or(TypeRef::Dynamic))
            .collect();
        let has_catch_all = catches
            .iter()
            .any(|c| c.guard.as_ref().map_or(true, TypeRef::is_dynamic));
        let needs_stack_trace =
            catches.iter().any(|c| c.stack_trace_var.is_some()) || !has_catch_all;

        let mut chain =
            self.catch_block_entry(handled_types, try_index, needs_stack_trace, false);
        let depth = self.catch_depth - 1;
        let exception = self.scopes.exception_var(depth).clone();
        let stack_trace = self.scopes.stack_trace_var(depth).clone();

        for clause in catches {
            let is_catch_all = clause.guard.as_ref().map_or(true, |g| g.is_dynamic());
            if is_catch_all {
                let body =
                    self.translate_catch_clause(clause, &exception, &stack_trace, try_index, after_try)?;
                let _ = self.base.append(chain, body);
                return Ok(());
            }
            // guarded clause: linear type test, in declaration order
            let guard = clause.guard.clone().expect("guarded clause has a type");
            let load = self.base.load_local(&exception);
            chain = self.base.append(chain, load);
            let push = self.base.push_argument();
            chain = self.base.append(chain, push);
            let ty = self.base.constant(ConstValue::Type(guard));
            chain = self.base.append(chain, ty);
            let push = self.base.push_argument();
            chain = self.base.append(chain, push);
            let test = self.base.static_call(layout::RUNTIME_INSTANCE_OF, 2, None);
            chain = self.base.append(chain, test);
            let (branch, match_entry, no_match_entry) = self.base.branch_if_true(false);
            chain = self.base.append(chain, branch);

            let clause_fragment = Fragment::from_instr(match_entry);
            let body =
                self.translate_catch_clause(clause, &exception, &stack_trace, try_index, after_try)?;
            let _ = self.base.append(clause_fragment, body);
            chain = Fragment::from_instr(no_match_entry);
        }

        // no clause matched: implicit rethrow past this handler
        let raw_exception = self.scopes.raw_exception_var(depth).clone();
        let raw_stack_trace = self.scopes.raw_stack_trace_var(depth).clone();
        let load = self.base.load_local(&raw_exception);
        chain = self.base.append(chain, load);
        let load = self.base.load_local(&raw_stack_trace);
        chain = self.base.append(chain, load);
        let rethrow = self.base.rethrow(try_index);
        let _ = self.base.append(chain, rethrow);
        Ok(())
    }

    fn translate_catch_clause(
        &mut self,
        clause: &'a CatchClause,
        exception: &LocalVariable,
        stack_trace: &LocalVariable,
        try_index: u32,
        after_try: InstrId,
    ) -> Result<Fragment, Bailout> {
        self.push_catch_block(exception.clone(), stack_trace.clone(), try_index);
        let result = self.translate_catch_clause_inner(clause, exception, stack_trace, after_try);
        self.pop_catch_block();
        result
    }

    fn translate_catch_clause_inner(
        &mut self,
        clause: &'a CatchClause,
        exception: &LocalVariable,
        stack_trace: &LocalVariable,
        after_try: InstrId,
    ) -> Result<Fragment, Bailout> {
        let mut instructions = Fragment::empty();
        if let Some(decl) = clause.exception_var {
            let variable = self.scopes.variable(decl).clone();
            let load = self.base.load_local(exception);
            instructions = self.base.append(instructions, load);
            let store = self.store_variable(&variable);
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
        }
        if let Some(decl) = clause.stack_trace_var {
            let variable = self.scopes.variable(decl).clone();
            let load = self.base.load_local(stack_trace);
            instructions = self.base.append(instructions, load);
            let store = self.store_variable(&variable);
            instructions = self.base.append(instructions, store);
            let drop = self.base.drop_temp();
            instructions = self.base.append(instructions, drop);
        }
        let body = self.translate_stmt(&clause.body)?;
        instructions = self.base.append(instructions, body);
        if instructions.is_open() {
            let goto = self.base.goto_join(after_try);
            instructions = self.base.append(instructions, goto);
        }
        Ok(instructions)
    }

    fn translate_try_finally(
        &mut self,
        body: &'a Stmt,
        finalizer: &'a Stmt,
    ) -> Result<Fragment, Bailout> {
        if self.options.inlining {
            return Err(Bailout::InlinedConstruct { construct: "try/finally" });
        }
        let try_index = self.base.allocate_try_index();
        let mut try_body = self.enter_try();

        // The try-finally record is pushed before the handler scope so it
        // captures the enclosing handler environment, which is where the
        // finalizer executes.
        self.try_depth += 1;
        self.push_try_finally(finalizer);
        self.base.push_try_catch(try_index);
        let body_result = self.translate_stmt(body);
        self.base.pop_try_catch();
        self.pop_try_finally();
        self.try_depth -= 1;

        let mut inner = body_result?;
        // Normal exit: the finalizer is translated inline once.
        if inner.is_open() {
            let finalizer_fragment = self.translate_stmt(finalizer)?;
            inner = self.base.append(inner, finalizer_fragment);
        }
        try_body = self.base.append(try_body, inner);

        // Exceptional exit: a synthesized catch-all re-translates the
        // finalizer and rethrows to the next enclosing handler.
        self.catch_depth += 1;
        let handler = self.translate_finally_handler(try_index, finalizer);
        self.catch_depth -= 1;
        handler?;

        Ok(Fragment::new(try_body.entry, try_body.current))
    }

    fn translate_finally_handler(
        &mut self,
        try_index: u32,
        finalizer: &'a Stmt,
    ) -> Result<(), Bailout> {
        let mut handler = self.catch_block_entry(vec![TypeRef::Dynamic], try_index, true, true);
        let finalizer_fragment = self.translate_stmt(finalizer)?;
        handler = self.base.append(handler, finalizer_fragment);
        if handler.is_open() {
            let depth = self.catch_depth - 1;
            let raw_exception = self.scopes.raw_exception_var(depth).clone();
            let raw_stack_trace = self.scopes.raw_stack_trace_var(depth).clone();
            let load = self.base.load_local(&raw_exception);
            handler = self.base.append(handler, load);
            let load = self.base.load_local(&raw_stack_trace);
            handler = self.base.append(handler, load);
            let rethrow = self.base.rethrow(try_index);
            let _ = self.base.append(handler, rethrow);
        }
        Ok(())
    }

    // ── Suspension ──────────────────────────────────────────────────

    fn translate_yield(&mut self, value: &'a Expr) -> Result<Fragment, Bailout> {
        assert!(
            self.function.is_suspending,
            "yield in a non-suspending function"
        );
        if self.options.inlining {
            return Err(Bailout::InlinedConstruct { construct: "yield" });
        }
        let jump_var = self.scopes.yield_jump_var().clone();
        let value_var = self.scopes.yield_value_var().clone();

        let mut instructions = self.translate_expr(value)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let store = self.base.store_local(&value_var);
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);

        // Continuation indices start at one; zero is the fresh entry.
        let index = self.yield_continuations.len() as i64 + 1;
        let constant = self.base.int_constant(index);
        instructions = self.base.append(instructions, constant);
        let store = self.base.store_local(&jump_var);
        instructions = self.base.append(instructions, store);
        let drop = self.base.drop_temp();
        instructions = self.base.append(instructions, drop);

        let load = self.base.load_local(&value_var);
        instructions = self.base.append(instructions, load);
        let ret = self.base.return_value();
        instructions = self.base.append(instructions, ret);

        // Translation resumes from the continuation entry; the resumption
        // dispatch targeting it is built downstream.
        let entry = self.base.build_join_entry();
        self.yield_continuations.push(YieldContinuation {
            entry,
            try_index: self.base.current_try_index(),
        });
        Ok(Fragment::new(instructions.entry, Some(entry)))
    }
}
