//! The `Model` trait: the contract between user-defined types and the
//! resolver, query builder, and hydrator.
//!
//! A model is a plain struct plus a declared field list. Declaration is
//! explicit: `fields()` returns the ordered descriptor records, and nothing
//! happens until the model is registered and the registry resolved. The
//! struct carries its scalar values, its loaded related objects, and a
//! [`RelatedValues`] cache holding raw foreign-key scalars for
//! relationships whose target object has not been fetched.

use crate::Result;
use crate::error::Error;
use crate::field::FieldDescriptor;
use crate::row::Row;
use crate::value::Value;
use std::collections::HashMap;

/// Model-level declaration metadata beyond the field list.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Abstract models cannot be materialized into tables
    pub abstract_model: bool,
    /// Composite indexes over several columns
    pub indexes: Vec<CompositeIndex>,
}

/// A named index over several columns.
///
/// Entries may name relationship fields; the schema builder resolves those
/// to the synthetic foreign-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndex {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

/// Raw foreign-key scalars cached on an instance.
///
/// When a row is parsed, any column matching a synthetic foreign-key name is
/// diverted here instead of being assigned as a regular attribute: the
/// model's public attribute for that relationship is typed as the related
/// model, not the raw key. Relationship fetch reads the key back out of this
/// cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedValues {
    values: HashMap<&'static str, Value>,
}

impl RelatedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the raw key for a relationship field.
    pub fn set(&mut self, field: &'static str, value: Value) {
        self.values.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The cached key for `field`, or the error hydration raises when a
    /// relationship is fetched before the owning row has a known key.
    pub fn require(&self, model: &str, field: &str) -> Result<&Value> {
        self.get(field).ok_or_else(|| Error::MissingRelatedValue {
            model: model.to_string(),
            field: field.to_string(),
        })
    }
}

/// A declared entity type mapped to one relational table.
pub trait Model: Sized + Send + Sync + 'static {
    /// Registered model name (used in relationship declarations)
    const MODEL_NAME: &'static str;
    /// Table name
    const TABLE_NAME: &'static str;

    /// Ordered field descriptors. Declaration order drives pairing.
    fn fields() -> Vec<FieldDescriptor>;

    /// Model-level configuration.
    fn config() -> ModelConfig {
        ModelConfig::default()
    }

    /// Extract storable column values: scalar fields plus, for each foreign
    /// key, the raw target-key value under the synthetic column name.
    ///
    /// Implementations resolve relationship attributes down to raw values:
    /// a loaded related instance contributes its target-key value, an
    /// unloaded one contributes the cached raw key, and a non-nullable
    /// relationship with neither fails with
    /// [`Error::MissingForeignKey`].
    fn to_row(&self) -> Result<Vec<(&'static str, Value)>>;

    /// Build an instance from a result row.
    ///
    /// Scalar columns are parsed into their declared types; synthetic
    /// foreign-key columns must be diverted into [`RelatedValues`] rather
    /// than assigned as regular attributes.
    fn from_row(row: &Row) -> Result<Self>;

    /// Primary key column names, in declaration order.
    fn primary_key_columns() -> Vec<&'static str> {
        Self::fields()
            .iter()
            .filter(|f| f.as_scalar().is_some_and(|s| s.primary_key))
            .map(|f| f.name)
            .collect()
    }

    /// Current primary key values, `Value::Null` where unset.
    fn primary_key_value(&self) -> Vec<Value>;

    /// Store a backend-generated key after insert.
    fn set_primary_key(&mut self, value: Value);

    /// The raw foreign-key cache.
    fn related_values(&self) -> &RelatedValues;
    fn related_values_mut(&mut self) -> &mut RelatedValues;

    /// Attach fetched related rows for `field`.
    ///
    /// The hydrator has already applied cardinality and nullability rules;
    /// implementations convert the rows via the target model's `from_row`
    /// and store them (single, optional, or list).
    fn attach_related(&mut self, field: &str, rows: Vec<Row>) -> Result<()>;

    /// Whether this instance has a complete, non-null primary key.
    fn has_primary_key(&self) -> bool {
        let pk = self.primary_key_value();
        !pk.is_empty() && pk.iter().all(|v| !v.is_null())
    }
}

/// Convert fetched rows into typed instances of `M`.
///
/// Helper for `attach_related` implementations.
pub fn rows_into<M: Model>(rows: Vec<Row>) -> Result<Vec<M>> {
    rows.iter().map(M::from_row).collect()
}
