//! The process-wide schema registry.
//!
//! Models are registered before any resolution or query traffic starts;
//! after initialization the registry is append-only. Resolution and
//! materialization mutate the per-model [`ModelSchema`] records in place,
//! so the registry is the single owner of all derived relationship state.

use crate::table::TableDef;
use orchard_core::{
    CompositeIndex, Error, FieldDescriptor, FieldKind, Model, ModelConfig, Result,
};
use std::collections::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The resolved per-model schema record.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub model_name: &'static str,
    pub table_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
    pub abstract_model: bool,
    pub indexes: Vec<CompositeIndex>,
    /// Set once the pairing pass has run for this model
    pub resolved: bool,
    /// Cached materialized table; presence makes re-materialization a no-op
    pub table: Option<Arc<TableDef>>,
}

impl ModelSchema {
    fn from_model<M: Model>() -> Self {
        let config: ModelConfig = M::config();
        Self {
            model_name: M::MODEL_NAME,
            table_name: M::TABLE_NAME,
            fields: M::fields(),
            abstract_model: config.abstract_model,
            indexes: config.indexes,
            resolved: false,
            table: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldDescriptor> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// The sole primary key field name, or the errors the defaulting step
    /// raises when the key is absent or composite.
    pub fn sole_primary_key(&self) -> Result<&FieldDescriptor> {
        let mut keys = self
            .fields
            .iter()
            .filter(|f| f.as_scalar().is_some_and(|s| s.primary_key));
        let first = keys.next().ok_or_else(|| Error::MissingPrimaryKey {
            model: self.model_name.to_string(),
        })?;
        if keys.next().is_some() {
            return Err(Error::CompositePrimaryKey {
                model: self.model_name.to_string(),
            });
        }
        Ok(first)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::ForeignKey(_)))
    }

    pub fn reverse_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::ReverseRelation(_)))
    }

    pub fn many_to_many_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::ManyToMany(_)))
    }

    /// All relationship fields, in declaration order.
    pub fn relationship_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_relationship())
    }

    /// The synthetic foreign-key column names known for this model.
    pub fn synthetic_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter_map(|f| f.as_foreign_key())
            .filter_map(|fk| fk.column_name.as_deref())
            .collect()
    }

    /// Resolve a field name to its physical attribute.
    ///
    /// Scalar fields map to their own column; foreign keys map to their
    /// synthetic column; reverse and many-to-many fields have no local
    /// column and come back as relationship proxies.
    pub fn attr(&self, name: &str) -> Option<Attr<'_>> {
        let field = self.field(name)?;
        match &field.kind {
            FieldKind::Scalar(_) => Some(Attr::Column {
                field,
                column: field.name,
            }),
            FieldKind::ForeignKey(fk) => fk.column_name.as_deref().map(|column| Attr::Column {
                field,
                column,
            }),
            FieldKind::ReverseRelation(_) | FieldKind::ManyToMany(_) => {
                Some(Attr::Related { field })
            }
        }
    }

    /// The physical column name a predicate on `name` should target, if
    /// the field has one.
    pub fn column_for(&self, name: &str) -> Option<&str> {
        match self.attr(name)? {
            Attr::Column { column, .. } => Some(column),
            Attr::Related { .. } => None,
        }
    }
}

/// A field name resolved to its physical meaning.
#[derive(Debug, Clone, Copy)]
pub enum Attr<'a> {
    /// A real column on the model's table
    Column {
        field: &'a FieldDescriptor,
        column: &'a str,
    },
    /// A relationship with no local column
    Related { field: &'a FieldDescriptor },
}

/// Registry of all declared models and shared junction tables.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<&'static str, ModelSchema>,
    /// Registration order; drives deterministic create/drop sequences
    order: Vec<&'static str>,
    /// Junction tables keyed by name; BTreeMap keeps DDL output ordered
    junctions: BTreeMap<String, Arc<TableDef>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Registering the same model twice is a no-op.
    pub fn register<M: Model>(&mut self) {
        if self.models.contains_key(M::MODEL_NAME) {
            return;
        }
        tracing::debug!(model = M::MODEL_NAME, table = M::TABLE_NAME, "registered");
        self.order.push(M::MODEL_NAME);
        self.models.insert(M::MODEL_NAME, ModelSchema::from_model::<M>());
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn get(&self, model: &str) -> Result<&ModelSchema> {
        self.models
            .get(model)
            .ok_or_else(|| Error::UnregisteredModel {
                name: model.to_string(),
            })
    }

    pub fn get_mut(&mut self, model: &str) -> Result<&mut ModelSchema> {
        self.models
            .get_mut(model)
            .ok_or_else(|| Error::UnregisteredModel {
                name: model.to_string(),
            })
    }

    /// Look up a model by its table name.
    pub fn by_table(&self, table: &str) -> Option<&ModelSchema> {
        self.models.values().find(|m| m.table_name == table)
    }

    /// Registered model names, in registration order.
    pub fn model_names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn junction(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.junctions.get(name)
    }

    pub(crate) fn insert_junction(&mut self, table: Arc<TableDef>) {
        self.junctions.insert(table.name.clone(), table);
    }

    /// All junction tables, ordered by name.
    pub fn junctions(&self) -> impl Iterator<Item = &Arc<TableDef>> {
        self.junctions.values()
    }
}
