//! Type resolution, inheritance and layout engine for the ridl IDL
//!
//! The crate takes parsed interface definition files and runs them through
//! the post-parse pipeline: name lookup across imports, declaration
//! reordering, enum and interface inheritance resolution, constant
//! expression evaluation, ABI layout and validation. Parsing of the
//! surface syntax is left to a [`coordinator::SourceParser`]
//! implementation; everything after that lives here.

pub mod arena;
pub mod ast;
pub mod compound;
pub mod coordinator;
pub mod enum_type;
pub mod error;
pub mod expr;
pub mod fqname;
pub mod interface;
pub mod location;
pub mod passes;
pub mod refs;
pub mod scalar;
pub mod scope;
pub mod types;

pub use arena::{Arena, AstId, ExprId, IdentRefId, TypeId, TypeRefId};
pub use coordinator::{Coordinator, SourceParser};
pub use error::{CoreError, Result};
pub use fqname::{FqName, Version};
pub use location::{Location, Position};
pub use scalar::ScalarKind;
pub use types::{CompoundStyle, ParseStage, TypeKind};
