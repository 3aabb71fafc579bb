// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Veld IL - the instruction graph flow-graph construction produces.
//!
//! Instructions are arena-allocated nodes owned by a per-function
//! [`FlowGraph`]. Straight-line order is a singly linked `next` chain;
//! control transfers reference join and target entry nodes explicitly.
//! The graph records entry, exits, and exception-handler entries so
//! downstream passes (SSA construction, the optimizer) can traverse it
//! without re-deriving structure.

mod display;
mod graph;
mod instr;
pub mod layout;

pub use graph::{FlowGraph, Node};
pub use instr::{ConstValue, InstrId, Op};
