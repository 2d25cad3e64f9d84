//! Error types for Orchard operations.

use std::fmt;

/// The primary error type for all Orchard operations.
///
/// Backend failures (`Connection`, `Query`, `Transaction`) are passed through
/// from the relational backend unchanged; the ORM core never wraps, retries,
/// or suppresses them. The remaining variants are raised by the core itself:
/// definition-time errors during resolution/materialization and runtime data
/// errors during query execution and hydration.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, lock acquisition)
    Connection(ConnectionError),
    /// Query execution errors reported by the backend
    Query(QueryError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Relationship resolution errors (definition time)
    Resolve(ResolveError),
    /// A model referenced for resolution or querying was never registered
    UnregisteredModel { name: String },
    /// The related model has no primary key to default a join key to,
    /// or a write operation required a primary key value that is unset
    MissingPrimaryKey { model: String },
    /// The related model has a composite primary key and no explicit
    /// target column was given
    CompositePrimaryKey { model: String },
    /// A declared field type has no storage mapping
    NoStorageType {
        model: String,
        field: String,
        declared: String,
    },
    /// Attempt to materialize an abstract model
    AbstractModel { model: String },
    /// Expected exactly one row, found none
    NoMatchingRow { model: String },
    /// Expected at most one row, found several
    MultipleRows { model: String, found: usize },
    /// Relationship fetch attempted before the owning row has a known key
    MissingRelatedValue { model: String, field: String },
    /// A required relationship value was absent at write time
    MissingForeignKey { model: String, field: String },
    /// Non-positive page or page size
    Paginate { page: u64, page_size: u64 },
    /// A predicate or update referenced field names the model does not have
    UnknownFields { model: String, fields: Vec<String> },
    /// A predicate was built from an operand shape the operator cannot use
    Clause { message: String },
    /// A bulk operation was called with zero models
    EmptyBatch { operation: &'static str },
    /// Field-level validation failed
    Validation(ValidationError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Failed to acquire the shared connection lock
    Lock,
    /// Connection is closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// Release without a matching acquire
    NotAcquired,
}

/// A definition-time relationship resolution failure.
#[derive(Debug)]
pub struct ResolveError {
    pub kind: ResolveErrorKind,
    pub model: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    /// No structurally compatible counterpart field on the related model
    Unpaired,
    /// Two relationship fields target the same model without explicit
    /// counterpart names
    Duplicate,
    /// Relationship field declared with a shape the kind cannot use
    /// (e.g. a non-list many-to-many)
    WrongShape,
    /// Relationship field references a name that is not a registered model
    NotAModel,
}

/// Field-level validation errors, grouped per field.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// String is longer than maximum length
    MaxLength,
    /// Value doesn't match regex pattern
    Pattern,
    /// Required field is missing/null
    Required,
    /// Value has the wrong type for the column
    Type,
}

impl ValidationError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn add_max_length(&mut self, field: impl Into<String>, max: u32, actual: usize) {
        self.add(
            field,
            ValidationErrorKind::MaxLength,
            format!("must be at most {max} characters, got {actual}"),
        );
    }

    pub fn add_pattern(&mut self, field: impl Into<String>, pattern: &str) {
        self.add(
            field,
            ValidationErrorKind::Pattern,
            format!("must match pattern '{pattern}'"),
        );
    }

    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }

    pub fn add_type(&mut self, field: impl Into<String>, expected: &str, actual: &str) {
        self.add(
            field,
            ValidationErrorKind::Type,
            format!("expected {expected}, got {actual}"),
        );
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl Error {
    /// Shorthand for a resolution error.
    pub fn resolve(
        kind: ResolveErrorKind,
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Resolve(ResolveError {
            kind,
            model: model.into(),
            field: field.into(),
            message: message.into(),
        })
    }

    /// Is this a definition-time error (raised during resolution or
    /// materialization, never at query time)?
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Error::Resolve(_)
                | Error::UnregisteredModel { .. }
                | Error::CompositePrimaryKey { .. }
                | Error::NoStorageType { .. }
                | Error::AbstractModel { .. }
        )
    }

    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Resolve(e) => write!(
                f,
                "Cannot resolve relationship {}.{}: {}",
                e.model, e.field, e.message
            ),
            Error::UnregisteredModel { name } => {
                write!(f, "Model '{name}' is not registered")
            }
            Error::MissingPrimaryKey { model } => {
                write!(f, "{model} has no usable primary key value")
            }
            Error::CompositePrimaryKey { model } => write!(
                f,
                "{model} has a composite primary key; an explicit target column is required"
            ),
            Error::NoStorageType {
                model,
                field,
                declared,
            } => write!(
                f,
                "{model}.{field}: no storage mapping for declared type '{declared}'"
            ),
            Error::AbstractModel { model } => {
                write!(f, "Abstract model '{model}' cannot be materialized")
            }
            Error::NoMatchingRow { model } => write!(f, "No match data for {model}"),
            Error::MultipleRows { model, found } => {
                write!(f, "{model} expect one row, but got {found} rows")
            }
            Error::MissingRelatedValue { model, field } => write!(
                f,
                "{model}.{field} has no cached key value; insert or fetch the instance first"
            ),
            Error::MissingForeignKey { model, field } => {
                write!(f, "{model}.{field}: required relationship value is missing")
            }
            Error::Paginate { page, page_size } => write!(
                f,
                "page and page_size must be positive, got page={page} page_size={page_size}"
            ),
            Error::UnknownFields { model, fields } => {
                write!(f, "{model} has no fields: {}", fields.join(", "))
            }
            Error::Clause { message } => write!(f, "Invalid clause: {message}"),
            Error::EmptyBatch { operation } => {
                write!(f, "You must give at least one model to {operation}")
            }
            Error::Validation(e) => write!(f, "Validation error: {e}"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.model, self.field, self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "validation error on '{}': {}", err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        Error::Resolve(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

/// Result type alias for Orchard operations.
pub type Result<T> = std::result::Result<T, Error>;
