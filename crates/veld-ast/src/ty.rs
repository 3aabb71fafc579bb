// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Type references and inferred-type call-site hints.

use std::collections::HashMap;

use crate::NodeOffset;

/// A reference to a type in the module's type table.
///
/// `Dynamic` is the top type: it matches every value in a catch guard and
/// carries no information as a hint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeRef {
    Dynamic,
    Named(String),
}

impl TypeRef {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeRef::Dynamic)
    }
}

/// Result-type metadata inferred for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InferredType {
    pub ty: TypeRef,
    pub nullable: bool,
}

/// Inferred result types keyed by call-site offset.
///
/// Absence of an entry means "no hint" and is never an error.
#[derive(Debug, Clone, Default)]
pub struct CallSiteHints {
    hints: HashMap<NodeOffset, InferredType>,
}

impl CallSiteHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, call_site: NodeOffset, ty: InferredType) {
        self.hints.insert(call_site, ty);
    }

    pub fn get(&self, call_site: NodeOffset) -> Option<&InferredType> {
        self.hints.get(&call_site)
    }
}
