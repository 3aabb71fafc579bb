// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Flow-graph construction - lowering the decoded Veld tree to IL.
//!
//! The lowering is a single linear pass: each structured construct is
//! translated exactly once as the driver reaches it, and all non-local
//! control (break, switch jumps, return, throw/rethrow, finalizer re-entry)
//! resolves through scoped record stacks maintained alongside the walk.
//! Merge points are allocated once per logical target and shared by every
//! jump that reaches them, which is the shape SSA construction expects.
//!
//! Entry point: [`FlowGraphBuilder::build_graph`], one instance per
//! function. Recoverable failures surface as [`Bailout`]; malformed input
//! panics.

mod base;
mod blocks;
mod builder;
mod error;
mod fragment;

pub use base::{BaseFlowGraphBuilder, Temporary};
pub use builder::{BuilderOptions, FlowGraphBuilder, FlowGraphResult, YieldContinuation};
pub use error::Bailout;
pub use fragment::Fragment;
