use thiserror::Error;

use crate::fqname::FqNameError;
use crate::location::Location;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown type '{name}' at {location}")]
    UnknownType { name: String, location: Location },

    #[error("Unknown identifier '{name}' at {location}")]
    UnknownIdentifier { name: String, location: Location },

    #[error("Ambiguous reference to '{name}': could be {first} or {second}")]
    AmbiguousReference {
        name: String,
        first: String,
        second: String,
    },

    #[error("Cyclic declaration: {0}")]
    CyclicDeclaration(String),

    #[error("Cyclic constant expression: {0}")]
    CyclicExpression(String),

    #[error("Circular import of '{0}'")]
    CircularImport(String),

    #[error("Import of '{0}' previously failed")]
    FailedImport(String),

    #[error("Forward reference to '{name}' at {location} crosses a scope boundary")]
    ForwardReference { name: String, location: Location },

    #[error("Validation error: {0}")]
    Invalid(String),

    #[error("Invalid name: {0}")]
    Name(#[from] FqNameError),

    #[error("File declares unexpected content: {0}")]
    Incongruent(String),

    #[error("Parse error in '{name}': {message}")]
    Syntax { name: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}
