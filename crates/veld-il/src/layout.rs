// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Field offsets of runtime objects the lowering emits raw accesses to.

/// Offset of the parent pointer in a heap context.
pub const CONTEXT_PARENT_OFFSET: u32 = 0;

/// Offset of the `index`-th variable slot in a heap context.
pub const fn context_variable_offset(index: u32) -> u32 {
    8 + index * 8
}

/// Offset of the explicit-argument count in an argument descriptor.
pub const ARGDESC_COUNT_OFFSET: u32 = 0;

/// Offset of the type-argument count in an argument descriptor.
pub const ARGDESC_TYPE_ARGS_LEN_OFFSET: u32 = 8;

/// Index scale for word-sized indexed loads and stores.
pub const WORD_INDEX_SCALE: u8 = 8;

/// Runtime entry invoked when argument checks fail; always throws.
pub const RUNTIME_THROW_NO_SUCH_METHOD: &str = "veld:throw-no-such-method";

/// Runtime type-test entry used by catch-clause guards; returns a bool.
pub const RUNTIME_INSTANCE_OF: &str = "veld:instance-of";
