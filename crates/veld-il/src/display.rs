// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Display implementations for IL types.

use std::fmt;

use crate::{ConstValue, FlowGraph, InstrId, Op};

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => write!(f, "null"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Double(d) => write!(f, "{}", d),
            ConstValue::Str(s) => write!(f, "{:?}", s),
            ConstValue::Type(t) => write!(f, "type({:?})", t),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::JoinEntry { predecessors } => {
                write!(f, "join[")?;
                for (i, p) in predecessors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "]")
            }
            Op::TargetEntry => write!(f, "target"),
            Op::CatchEntry { handler_index, is_synthesized, .. } => {
                write!(f, "catch-entry #{handler_index}")?;
                if *is_synthesized {
                    write!(f, " (synthesized)")?;
                }
                Ok(())
            }
            Op::Constant(c) => write!(f, "const {}", c),
            Op::LoadLocal(v) => write!(f, "load {}", v.name),
            Op::StoreLocal { variable, value } => {
                write!(f, "store {} <- {}", variable.name, value)
            }
            Op::LoadField { receiver, field_offset } => {
                write!(f, "load-field {}.{}", receiver, field_offset)
            }
            Op::LoadIndexed { receiver, index, .. } => {
                write!(f, "load-indexed {}[{}]", receiver, index)
            }
            Op::AllocateContext { num_variables } => {
                write!(f, "alloc-context({})", num_variables)
            }
            Op::CloneContext { context, .. } => write!(f, "clone-context {}", context),
            Op::BinaryIntOp { op, left, right } => {
                write!(f, "int-op {:?} {}, {}", op, left, right)
            }
            Op::RelationalOp { op, left, right } => {
                write!(f, "rel-op {:?} {}, {}", op, left, right)
            }
            Op::StrictCompare { kind, left, right, .. } => {
                write!(f, "strict-cmp {:?} {}, {}", kind, left, right)
            }
            Op::EqualityCompare { kind, left, right } => {
                write!(f, "eq-cmp {:?} {}, {}", kind, left, right)
            }
            Op::BooleanNegate { value } => write!(f, "bool-not {}", value),
            Op::MakeTemp => write!(f, "make-temp"),
            Op::PushArgument { value } => write!(f, "push-arg {}", value),
            Op::StaticCall { target, args, .. } => {
                write!(f, "static-call {}({} args)", target, args.len())
            }
            Op::InstanceCall { name, args, .. } => {
                write!(f, "instance-call {}({} args)", name, args.len())
            }
            Op::StoreField { receiver, field_offset, value } => {
                write!(f, "store-field {}.{} <- {}", receiver, field_offset, value)
            }
            Op::StoreIndexed { receiver, index, value, .. } => {
                write!(f, "store-indexed {}[{}] <- {}", receiver, index, value)
            }
            Op::DropTemps { count, preserved } => match preserved {
                Some(v) => write!(f, "drop-temps {} keep {}", count, v),
                None => write!(f, "drop-temps {}", count),
            },
            Op::CheckStackOverflow { loop_depth } => {
                write!(f, "check-stack-overflow depth={}", loop_depth)
            }
            Op::Goto { target } => write!(f, "goto {}", target),
            Op::Branch { condition, true_successor, false_successor } => {
                write!(f, "branch {} ? {} : {}", condition, true_successor, false_successor)
            }
            Op::Return { value } => write!(f, "return {}", value),
            Op::Throw { exception } => write!(f, "throw {}", exception),
            Op::Rethrow { catch_try_index, .. } => {
                write!(f, "rethrow past #{}", catch_try_index)
            }
        }
    }
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entry) = self.entry {
            writeln!(f, "entry: {}", entry)?;
        }
        for (id, node) in self.iter() {
            write!(f, "  {}: {}", id, node.op)?;
            if let Some(ti) = node.try_index {
                write!(f, " [try {}]", ti)?;
            }
            if let Some(next) = node.next {
                write!(f, " -> {}", next)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
