//! Physical table and column records produced by materialization.
//!
//! These objects are stable for the lifetime of the registry: once a model
//! has been materialized, re-materializing it returns the identical
//! `Arc<TableDef>` rather than a duplicate.

use orchard_core::{ReferentialAction, StorageType, Value};
use serde::Serialize;

/// A foreign-key constraint on one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignRef {
    /// Target table name
    pub table: String,
    /// Target column name
    pub column: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

/// One physical column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub storage: StorageType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub index: bool,
    pub default: Option<Value>,
    pub references: Option<ForeignRef>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, storage: StorageType) -> Self {
        Self {
            name: name.into(),
            storage,
            nullable: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            index: false,
            default: None,
            references: None,
        }
    }
}

/// A named table-level index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One physical table: a model's table or a many-to-many junction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key column names, in column order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}
