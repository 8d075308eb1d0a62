//! Resolve-once reference slots
//!
//! Every use of a type or enum value in a file is recorded as a reference
//! slot: the looked-up name plus the source location, with the target
//! filled in exactly once by the resolution passes. Binding a slot twice
//! is an internal error.

use serde::{Deserialize, Serialize};

use crate::arena::TypeId;
use crate::fqname::FqName;
use crate::location::Location;

/// A use of a type by name. The empty reference (no name, no target) marks
/// the implicit super of the root interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    lookup: Option<FqName>,
    location: Location,
    target: Option<TypeId>,
}

impl TypeRef {
    pub fn new(lookup: FqName, location: Location) -> Self {
        Self {
            lookup: Some(lookup),
            location,
            target: None,
        }
    }

    /// A reference with no name that will never resolve to anything.
    pub fn empty(location: Location) -> Self {
        Self {
            lookup: None,
            location,
            target: None,
        }
    }

    /// A reference created already pointing at its target, bypassing lookup.
    pub fn bound(target: TypeId, location: Location) -> Self {
        Self {
            lookup: None,
            location,
            target: Some(target),
        }
    }

    pub fn lookup(&self) -> Option<&FqName> {
        self.lookup.as_ref()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn target(&self) -> Option<TypeId> {
        self.target
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// No name and no target.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_none() && self.target.is_none()
    }

    pub fn bind(&mut self, target: TypeId) {
        assert!(self.target.is_none(), "reference bound twice");
        self.target = Some(target);
    }
}

/// A use of an enum value by name. The target is the defining enum plus
/// the index of the value within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentRef {
    lookup: FqName,
    location: Location,
    target: Option<(TypeId, usize)>,
}

impl IdentRef {
    pub fn new(lookup: FqName, location: Location) -> Self {
        Self {
            lookup,
            location,
            target: None,
        }
    }

    pub fn bound(lookup: FqName, target: (TypeId, usize), location: Location) -> Self {
        Self {
            lookup,
            location,
            target: Some(target),
        }
    }

    pub fn lookup(&self) -> &FqName {
        &self.lookup
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn target(&self) -> Option<(TypeId, usize)> {
        self.target
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    pub fn bind(&mut self, target: (TypeId, usize)) {
        assert!(self.target.is_none(), "identifier bound twice");
        self.target = Some(target);
    }
}
