// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Veld tree representation.
//!
//! The decoded form of Veld's compact binary module format: a typed,
//! structured tree of statements and expressions. The binary decoder
//! produces these nodes; downstream phases (scope building, flow-graph
//! construction) consume them and key their side tables by node offset.

mod expr;
mod func;
mod stmt;
mod ty;

pub use expr::{ArithOp, CompareKind, Expr, ExprKind, LogicalOp, RelOp};
pub use func::Function;
pub use stmt::{CatchClause, Stmt, StmtKind, SwitchCase};
pub use ty::{CallSiteHints, InferredType, TypeRef};

/// Byte offset of a node within the binary module.
///
/// Offsets are unique per node and stable across decoding, which is why the
/// scope allocator and call-site hint tables use them as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeOffset(pub u32);

impl NodeOffset {
    pub const INVALID: NodeOffset = NodeOffset(u32::MAX);
}

impl std::fmt::Display for NodeOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}
