// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Recoverable translation failures.

use thiserror::Error;

/// A bailout aborts flow-graph construction for the current function.
///
/// Bailouts are not crashes: the caller is expected to retry with a less
/// optimized strategy (typically the non-inlined translation path).
/// Malformed input - a break to a label that does not exist, a rethrow
/// outside a catch clause - is a producer bug, not a bailout, and panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bailout {
    #[error("{construct} is not supported when building for inlining")]
    InlinedConstruct { construct: &'static str },
    #[error("unsupported construct: {reason}")]
    Unsupported { reason: String },
}

impl Bailout {
    /// Human-readable reason consumed by fallback-path selection.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
