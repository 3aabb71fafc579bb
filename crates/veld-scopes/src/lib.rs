// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Scope-allocation results consumed by flow-graph construction.
//!
//! The scope builder (external to this crate) walks a function before
//! lowering and decides, for every declared variable, whether it lives in a
//! frame slot or must be boxed into a heap context because a nested closure
//! captures it. It also synthesizes the internal variables lowering needs:
//! per-catch-depth exception/stack-trace slots, per-try-depth saved-context
//! slots, iterator slots for `for..in`, the expression temporary, and the
//! yield bookkeeping slots of suspending functions.
//!
//! Lowering trusts these results completely and never recomputes them; a
//! missing entry is a bug in the producer and fails fast.

use std::collections::HashMap;

use veld_ast::NodeOffset;

/// Where a variable lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    /// A frame slot of the enclosing function.
    Slot(u16),
    /// A slot in a heap context; `depth` is the lexical context depth of the
    /// scope that owns the context, `index` the variable's slot within it.
    Context { depth: u32, index: u32 },
}

/// A resolved variable: its display name and allocated location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub location: VarLocation,
}

impl LocalVariable {
    pub fn slot(name: impl Into<String>, slot: u16) -> Self {
        Self { name: name.into(), location: VarLocation::Slot(slot) }
    }

    pub fn captured(name: impl Into<String>, depth: u32, index: u32) -> Self {
        Self { name: name.into(), location: VarLocation::Context { depth, index } }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self.location, VarLocation::Context { .. })
    }
}

/// Allocation summary for one scope-introducing node (block, loop, `for`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeInfo {
    /// Number of captured variables the scope owns; zero means the scope
    /// allocates no context.
    pub context_size: u32,
}

/// A parameter that must be copied into the function-level context during
/// the prologue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedParameter {
    /// The incoming frame slot the argument arrives in.
    pub home: LocalVariable,
    /// Destination slot in the function-level context.
    pub context_index: u32,
}

/// The complete scope-allocation result for one function.
#[derive(Debug, Clone, Default)]
pub struct FunctionScopes {
    variables: HashMap<NodeOffset, LocalVariable>,
    scopes: HashMap<NodeOffset, ScopeInfo>,
    /// Size of the function-level context; zero when nothing is captured.
    pub context_size: u32,
    pub captured_parameters: Vec<CapturedParameter>,
    /// Slot holding the active context pointer. Present whenever any scope
    /// in the function allocates a context.
    pub current_context_var: Option<LocalVariable>,
    /// The single reusable temporary for expression-level merges. Uses of it
    /// never overlap: each merge stores and reloads it before the next one
    /// begins.
    pub expression_temp_var: Option<LocalVariable>,
    /// Slot the switch scrutinee is evaluated into.
    pub switch_var: Option<LocalVariable>,
    /// Slot holding the incoming argument descriptor, when the function
    /// needs runtime argument checks.
    pub argument_descriptor_var: Option<LocalVariable>,
    /// Indexed by catch depth (zero-based).
    pub exception_vars: Vec<LocalVariable>,
    pub stack_trace_vars: Vec<LocalVariable>,
    pub raw_exception_vars: Vec<LocalVariable>,
    pub raw_stack_trace_vars: Vec<LocalVariable>,
    /// Indexed by try depth: the slot the context pointer is saved into on
    /// entry to a protected region.
    pub catch_context_vars: Vec<LocalVariable>,
    /// Indexed by `for..in` depth.
    pub iterator_vars: Vec<LocalVariable>,
    /// Resume-index slot of a suspending function.
    pub yield_jump_var: Option<LocalVariable>,
    /// Slot the yielded value is stored into before suspending.
    pub yield_value_var: Option<LocalVariable>,
}

impl FunctionScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, offset: NodeOffset, variable: LocalVariable) {
        self.variables.insert(offset, variable);
    }

    pub fn set_scope(&mut self, offset: NodeOffset, info: ScopeInfo) {
        self.scopes.insert(offset, info);
    }

    /// Look up the variable declared at `offset`. The mapping is trusted;
    /// a miss means the producer and the tree disagree.
    pub fn variable(&self, offset: NodeOffset) -> &LocalVariable {
        self.variables
            .get(&offset)
            .unwrap_or_else(|| panic!("no variable allocated at {offset}"))
    }

    pub fn scope_info(&self, offset: NodeOffset) -> ScopeInfo {
        self.scopes.get(&offset).copied().unwrap_or_default()
    }

    pub fn current_context_var(&self) -> &LocalVariable {
        self.current_context_var
            .as_ref()
            .expect("function allocates no context")
    }

    pub fn expression_temp_var(&self) -> &LocalVariable {
        self.expression_temp_var
            .as_ref()
            .expect("no expression temporary allocated")
    }

    pub fn switch_var(&self) -> &LocalVariable {
        self.switch_var.as_ref().expect("no switch variable allocated")
    }

    pub fn exception_var(&self, catch_depth: u32) -> &LocalVariable {
        &self.exception_vars[catch_depth as usize]
    }

    pub fn stack_trace_var(&self, catch_depth: u32) -> &LocalVariable {
        &self.stack_trace_vars[catch_depth as usize]
    }

    pub fn raw_exception_var(&self, catch_depth: u32) -> &LocalVariable {
        &self.raw_exception_vars[catch_depth as usize]
    }

    pub fn raw_stack_trace_var(&self, catch_depth: u32) -> &LocalVariable {
        &self.raw_stack_trace_vars[catch_depth as usize]
    }

    pub fn catch_context_var(&self, try_depth: u32) -> &LocalVariable {
        &self.catch_context_vars[try_depth as usize]
    }

    pub fn iterator_var(&self, for_in_depth: u32) -> &LocalVariable {
        &self.iterator_vars[for_in_depth as usize]
    }

    pub fn yield_jump_var(&self) -> &LocalVariable {
        self.yield_jump_var
            .as_ref()
            .expect("not a suspending function")
    }

    pub fn yield_value_var(&self) -> &LocalVariable {
        self.yield_value_var
            .as_ref()
            .expect("not a suspending function")
    }
}
