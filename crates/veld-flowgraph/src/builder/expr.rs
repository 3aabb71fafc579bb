// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Expression translation.
//!
//! Open expression fragments leave exactly one value on the expression
//! stack; a fragment closed by a throw leaves nothing and its consumers
//! stop emitting.

use veld_ast::{Expr, ExprKind, InferredType, LogicalOp, NodeOffset};
use veld_il::{layout, ConstValue, InstrId};
use veld_scopes::LocalVariable;

use super::FlowGraphBuilder;
use crate::{Bailout, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(crate) fn translate_expr(&mut self, expr: &'a Expr) -> Result<Fragment, Bailout> {
        match &expr.kind {
            ExprKind::Null => Ok(self.base.null_constant()),
            ExprKind::Bool(value) => Ok(self.base.bool_constant(*value)),
            ExprKind::Int(value) => Ok(self.base.int_constant(*value)),
            ExprKind::Double(value) => Ok(self.base.constant(ConstValue::Double(*value))),
            ExprKind::Str(value) => Ok(self.base.constant(ConstValue::Str(value.clone()))),

            ExprKind::VariableGet { decl } => {
                let variable = self.scopes.variable(*decl).clone();
                Ok(self.load_variable(&variable))
            }
            ExprKind::VariableSet { decl, value } => {
                let variable = self.scopes.variable(*decl).clone();
                let mut instructions = self.translate_expr(value)?;
                if instructions.is_open() {
                    let store = self.store_variable(&variable);
                    instructions = self.base.append(instructions, store);
                }
                Ok(instructions)
            }

            ExprKind::FieldGet { receiver, field_offset } => {
                let mut instructions = self.translate_expr(receiver)?;
                if instructions.is_open() {
                    let load = self.base.load_field(*field_offset);
                    instructions = self.base.append(instructions, load);
                }
                Ok(instructions)
            }
            ExprKind::FieldSet { receiver, field_offset, value } => {
                let mut instructions = self.translate_expr(receiver)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let value_fragment = self.translate_expr(value)?;
                instructions = self.base.append(instructions, value_fragment);
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let stored = self.base.make_temporary();
                let store = self.base.store_field(*field_offset);
                instructions = self.base.append(instructions, store);
                let reload = self.base.load_temporary(&stored);
                Ok(self.base.append(instructions, reload))
            }

            ExprKind::IndexGet { receiver, index } => {
                let mut instructions = self.translate_expr(receiver)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let index_fragment = self.translate_expr(index)?;
                instructions = self.base.append(instructions, index_fragment);
                if instructions.is_open() {
                    let load = self.base.load_indexed(layout::WORD_INDEX_SCALE);
                    instructions = self.base.append(instructions, load);
                }
                Ok(instructions)
            }
            ExprKind::IndexSet { receiver, index, value } => {
                let mut instructions = self.translate_expr(receiver)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let index_fragment = self.translate_expr(index)?;
                instructions = self.base.append(instructions, index_fragment);
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let value_fragment = self.translate_expr(value)?;
                instructions = self.base.append(instructions, value_fragment);
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let stored = self.base.make_temporary();
                let store = self.base.store_indexed(layout::WORD_INDEX_SCALE);
                instructions = self.base.append(instructions, store);
                let reload = self.base.load_temporary(&stored);
                Ok(self.base.append(instructions, reload))
            }

            ExprKind::Not(operand) => {
                let mut instructions = self.translate_expr(operand)?;
                if instructions.is_open() {
                    let negate = self.base.boolean_negate();
                    instructions = self.base.append(instructions, negate);
                }
                Ok(instructions)
            }
            ExprKind::Logical { op, left, right } => self.translate_logical(*op, left, right),
            ExprKind::Conditional { condition, then, otherwise } => {
                self.translate_conditional(condition, then, otherwise)
            }

            ExprKind::BinInt { op, left, right } => {
                let mut instructions = self.translate_binary_operands(left, right)?;
                if instructions.is_open() {
                    let operation = self.base.binary_int_op(*op);
                    instructions = self.base.append(instructions, operation);
                }
                Ok(instructions)
            }
            ExprKind::Relational { op, left, right } => {
                let mut instructions = self.translate_binary_operands(left, right)?;
                if instructions.is_open() {
                    let operation = self.base.relational_op(*op);
                    instructions = self.base.append(instructions, operation);
                }
                Ok(instructions)
            }
            ExprKind::StrictCompare { kind, left, right } => {
                let mut instructions = self.translate_binary_operands(left, right)?;
                if instructions.is_open() {
                    let operation = self.base.strict_compare(*kind, false);
                    instructions = self.base.append(instructions, operation);
                }
                Ok(instructions)
            }

            ExprKind::StaticCall { target, args } => {
                let instructions = self.translate_arguments(Fragment::empty(), args)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let hint = self.call_hint(expr.offset);
                let call = self.base.static_call(target.clone(), args.len() as u32, hint);
                Ok(self.base.append(instructions, call))
            }
            ExprKind::MethodCall { receiver, name, args } => {
                let mut instructions = self.translate_expr(receiver)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let push = self.base.push_argument();
                instructions = self.base.append(instructions, push);
                instructions = self.translate_arguments(instructions, args)?;
                if instructions.is_closed() {
                    return Ok(instructions);
                }
                let hint = self.call_hint(expr.offset);
                let call = self
                    .base
                    .instance_call(name.clone(), args.len() as u32 + 1, 1, hint);
                Ok(self.base.append(instructions, call))
            }

            ExprKind::Throw(exception) => {
                let mut instructions = self.translate_expr(exception)?;
                if instructions.is_open() {
                    let throw = self.base.throw_value();
                    instructions = self.base.append(instructions, throw);
                }
                Ok(instructions)
            }
            ExprKind::Rethrow => {
                let block = self.current_catch_block().clone();
                let mut instructions = self.load_variable(&block.exception_var);
                let load = self.load_variable(&block.stack_trace_var);
                instructions = self.base.append(instructions, load);
                let rethrow = self.base.rethrow(block.catch_try_index);
                Ok(self.base.append(instructions, rethrow))
            }
        }
    }

    fn translate_binary_operands(
        &mut self,
        left: &'a Expr,
        right: &'a Expr,
    ) -> Result<Fragment, Bailout> {
        let instructions = self.translate_expr(left)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let right_fragment = self.translate_expr(right)?;
        Ok(self.base.append(instructions, right_fragment))
    }

    /// Evaluate and push each call argument in order.
    fn translate_arguments(
        &mut self,
        mut instructions: Fragment,
        args: &'a [Expr],
    ) -> Result<Fragment, Bailout> {
        for arg in args {
            if instructions.is_closed() {
                return Ok(instructions);
            }
            let fragment = self.translate_expr(arg)?;
            instructions = self.base.append(instructions, fragment);
            if instructions.is_open() {
                let push = self.base.push_argument();
                instructions = self.base.append(instructions, push);
            }
        }
        Ok(instructions)
    }

    fn call_hint(&self, call_site: NodeOffset) -> Option<InferredType> {
        self.hints.and_then(|hints| hints.get(call_site)).cloned()
    }

    /// Translate `expr` as a branch condition, peeling negations into the
    /// branch's negate flag. Returns the (closed) condition fragment and the
    /// then/otherwise targets. A condition that throws leaves both arms
    /// unreachable; the returned targets then dangle.
    pub(crate) fn translate_condition(
        &mut self,
        expr: &'a Expr,
        negate: bool,
    ) -> Result<(Fragment, InstrId, InstrId), Bailout> {
        if let ExprKind::Not(inner) = &expr.kind {
            return self.translate_condition(inner, !negate);
        }
        let instructions = self.translate_expr(expr)?;
        if instructions.is_closed() {
            let then_entry = self.base.build_target_entry();
            let otherwise_entry = self.base.build_target_entry();
            return Ok((instructions, then_entry, otherwise_entry));
        }
        let (branch, then_entry, otherwise_entry) = self.base.branch_if_true(negate);
        Ok((self.base.append(instructions, branch), then_entry, otherwise_entry))
    }

    /// Short-circuit evaluation. Both paths store into the expression
    /// temporary - a declared slot, because a raw stack value must not be
    /// merged at the join - and the result is loaded back out after it.
    fn translate_logical(
        &mut self,
        op: LogicalOp,
        left: &'a Expr,
        right: &'a Expr,
    ) -> Result<Fragment, Bailout> {
        let temp = self.scopes.expression_temp_var().clone();
        let (instructions, then_entry, otherwise_entry) = self.translate_condition(left, false)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let (right_entry, constant_entry, short_circuit_value) = match op {
            LogicalOp::And => (then_entry, otherwise_entry, false),
            LogicalOp::Or => (otherwise_entry, then_entry, true),
        };

        let mut right_fragment = Fragment::from_instr(right_entry);
        let value = self.translate_expr(right)?;
        right_fragment = self.base.append(right_fragment, value);
        if right_fragment.is_open() {
            let store = self.base.store_local(&temp);
            right_fragment = self.base.append(right_fragment, store);
            let drop = self.base.drop_temp();
            right_fragment = self.base.append(right_fragment, drop);
        }

        let mut constant_fragment = Fragment::from_instr(constant_entry);
        let constant = self.base.bool_constant(short_circuit_value);
        constant_fragment = self.base.append(constant_fragment, constant);
        let store = self.base.store_local(&temp);
        constant_fragment = self.base.append(constant_fragment, store);
        let drop = self.base.drop_temp();
        constant_fragment = self.base.append(constant_fragment, drop);

        let join = self.base.build_join_entry();
        if right_fragment.is_open() {
            let goto = self.base.goto_join(join);
            let _ = self.base.append(right_fragment, goto);
        }
        let goto = self.base.goto_join(join);
        let _ = self.base.append(constant_fragment, goto);

        let result = Fragment::new(instructions.entry, Some(join));
        let load = self.base.load_local(&temp);
        Ok(self.base.append(result, load))
    }

    fn translate_conditional(
        &mut self,
        condition: &'a Expr,
        then: &'a Expr,
        otherwise: &'a Expr,
    ) -> Result<Fragment, Bailout> {
        let temp = self.scopes.expression_temp_var().clone();
        let (instructions, then_entry, otherwise_entry) =
            self.translate_condition(condition, false)?;
        if instructions.is_closed() {
            return Ok(instructions);
        }
        let then_fragment = self.translate_conditional_arm(then_entry, then, &temp)?;
        let otherwise_fragment = self.translate_conditional_arm(otherwise_entry, otherwise, &temp)?;

        if then_fragment.is_closed() && otherwise_fragment.is_closed() {
            return Ok(Fragment::new(instructions.entry, None));
        }
        let join = self.base.build_join_entry();
        if then_fragment.is_open() {
            let goto = self.base.goto_join(join);
            let _ = self.base.append(then_fragment, goto);
        }
        if otherwise_fragment.is_open() {
            let goto = self.base.goto_join(join);
            let _ = self.base.append(otherwise_fragment, goto);
        }
        let result = Fragment::new(instructions.entry, Some(join));
        let load = self.base.load_local(&temp);
        Ok(self.base.append(result, load))
    }

    fn translate_conditional_arm(
        &mut self,
        entry: InstrId,
        expr: &'a Expr,
        temp: &LocalVariable,
    ) -> Result<Fragment, Bailout> {
        let mut fragment = Fragment::from_instr(entry);
        let value = self.translate_expr(expr)?;
        fragment = self.base.append(fragment, value);
        if fragment.is_open() {
            let store = self.base.store_local(temp);
            fragment = self.base.append(fragment, store);
            let drop = self.base.drop_temp();
            fragment = self.base.append(fragment, drop);
        }
        Ok(fragment)
    }
}
