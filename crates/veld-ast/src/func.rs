// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Function-level node.

use crate::{NodeOffset, Stmt};

/// A decoded function member: the unit of flow-graph construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    pub offset: NodeOffset,
    pub name: String,
    /// Number of explicit parameters.
    pub arity: u32,
    /// Number of type parameters; zero for non-generic functions.
    pub type_parameters: u32,
    /// True for functions that can suspend at `Yield` statements.
    pub is_suspending: bool,
    pub body: Stmt,
}
