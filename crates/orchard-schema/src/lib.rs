//! Schema resolution and materialization for the Orchard ORM.
//!
//! This crate provides:
//! - The shared [`SchemaRegistry`] of declared models
//! - Relationship resolution (the pairing pass)
//! - Column/table materialization, including shared junction tables
//! - DDL generation for the materialized schema

pub mod build;
pub mod ddl;
pub mod registry;
pub mod resolve;
pub mod table;

#[cfg(any(test, feature = "fixtures"))]
pub mod testing;

pub use build::{build_all, build_columns, build_table, junction_table_name};
pub use ddl::{create_all_sql, create_index_sql, create_table_sql, drop_all_sql, drop_table_sql, sql_type};
pub use registry::{Attr, ModelSchema, SchemaRegistry};
pub use resolve::{resolve_all, resolve_model};
pub use table::{ColumnDef, ForeignRef, IndexDef, TableDef};
