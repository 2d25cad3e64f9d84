//! Orchard - relationship-aware ORM core for async Rust.
//!
//! Orchard maps explicit model descriptors onto relational tables,
//! resolves relationship declarations into paired foreign keys and shared
//! junction tables, and compiles composable queries:
//!
//! - Declarative field descriptors with foreign-key, reverse, and
//!   many-to-many relationships paired automatically at registration
//! - Deterministic schema materialization, synthetic key columns and
//!   junction tables included
//! - A chainable `QuerySet` with `field__operator` keyword filters, join
//!   inference, pagination, aggregates, and batched relationship loading
//! - Cancel-correct execution on asupersync; every backend call takes a
//!   `Cx` and returns an `Outcome`
//!
//! # Quick Start
//!
//! ```ignore
//! use orchard::{Database, DatabaseBuilder, Expr, Value};
//!
//! async fn example(cx: &Cx, conn: impl Connection) -> Outcome<(), Error> {
//!     let db = DatabaseBuilder::new()
//!         .register::<School>()
//!         .register::<Student>()
//!         .connect(conn)?;
//!     db.create_all(cx).await?;
//!
//!     let mut student = Student::new("student 1", 18);
//!     db.insert(cx, &mut student).await?;
//!
//!     let adults = db
//!         .query::<Student>()
//!         .filter_kw("age__gte", Value::Int(18))?
//!         .order_by("name", OrderDir::Asc)
//!         .all(cx)
//!         .await?;
//! }
//! ```

pub use orchard_core::{
    // asupersync re-exports
    Budget,
    // Core types
    Connection,
    Cx,
    DatabaseScope,
    Error,
    FieldDescriptor,
    FieldKind,
    Model,
    ModelConfig,
    Outcome,
    ReferentialAction,
    RegionId,
    RelatedValues,
    Result,
    Row,
    StorageType,
    TaskId,
    TransactionOps,
    ValidationError,
    Value,
};

pub use orchard_query::{
    BinaryOp, CoalesceQuery, DictQuery, Expr, OrderDir, Prefetch, QuerySet, UnaryOp, ValuesQuery,
    fetch_related_many, fetch_related_one,
};

pub use orchard_schema::{
    ColumnDef, ModelSchema, SchemaRegistry, TableDef, build_all, create_all_sql, create_table_sql,
    drop_all_sql, junction_table_name, resolve_all,
};

mod database;
mod runtime;

pub use database::{Database, DatabaseBuilder};

/// Unwrap a `Result` inside a function returning `Outcome`.
macro_rules! try_res {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return ::asupersync::Outcome::Err(e),
        }
    };
}
pub(crate) use try_res;
