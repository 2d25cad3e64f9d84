//! Core types and traits for the Orchard ORM.
//!
//! This crate provides the foundational abstractions shared by the schema
//! and query layers:
//!
//! - `Model` trait for ORM-style struct mapping
//! - `FieldDescriptor` and the relationship field kinds
//! - `Connection` trait for relational backends
//! - `DatabaseScope` for reference-counted shared connections
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod row;
pub mod scope;
pub mod validate;
pub mod value;

pub use connection::{Connection, TransactionOps};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, FieldValidationError, QueryError, QueryErrorKind,
    ResolveError, ResolveErrorKind, Result, TransactionError, TransactionErrorKind,
    ValidationError, ValidationErrorKind,
};
pub use field::{
    FieldDescriptor, FieldKind, ForeignKeyField, ManyToManyField, ReferentialAction, ReverseField,
    ScalarField, StorageType,
};
pub use identifiers::quote_ident;
pub use model::{CompositeIndex, Model, ModelConfig, RelatedValues, rows_into};
pub use row::{ColumnInfo, FromValue, Row};
pub use scope::DatabaseScope;
pub use validate::{check_value, matches_pattern, validate_values};
pub use value::Value;

/// Unwrap an [`Outcome`], forwarding every non-success variant to the caller.
///
/// This is the `?` of cancel-correct code: `Err`, `Cancelled`, and
/// `Panicked` all propagate unchanged, so no outcome is ever collapsed into
/// a plain error.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(v) => v,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}
