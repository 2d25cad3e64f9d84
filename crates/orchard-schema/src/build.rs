//! Table materialization: resolved fields to physical tables.
//!
//! Materialization is idempotent per model: a cached table handle makes a
//! repeat call return the identical `Arc<TableDef>`. Junction tables are
//! built exactly once per unordered model pair, shared by both sides, and
//! named by joining the two table names in lexicographic order so the name
//! is independent of which side triggers creation.

use crate::registry::SchemaRegistry;
use crate::resolve::resolve_model;
use crate::table::{ColumnDef, ForeignRef, IndexDef, TableDef};
use orchard_core::{
    Error, FieldDescriptor, FieldKind, ReferentialAction, Result, StorageType,
};
use std::sync::Arc;

/// Resolve and materialize every registered model.
pub fn build_all(registry: &mut SchemaRegistry) -> Result<()> {
    let names: Vec<&'static str> = registry.model_names().to_vec();
    for name in names {
        if registry.get(name)?.abstract_model {
            continue;
        }
        build_table(registry, name)?;
    }
    Ok(())
}

/// Materialize one model's table, building any junction tables its
/// many-to-many fields need. Returns the cached handle on repeat calls.
pub fn build_table(registry: &mut SchemaRegistry, model: &str) -> Result<Arc<TableDef>> {
    if let Some(table) = &registry.get(model)?.table {
        return Ok(Arc::clone(table));
    }
    if registry.get(model)?.abstract_model {
        return Err(Error::AbstractModel {
            model: model.to_string(),
        });
    }
    resolve_model(registry, model)?;
    tracing::debug!(model, "materializing table");

    let columns = build_columns(registry, model)?;
    let indexes = build_indexes(registry, model)?;

    let schema = registry.get(model)?;
    let table = Arc::new(TableDef {
        name: schema.table_name.to_string(),
        columns,
        indexes,
    });
    registry.get_mut(model)?.table = Some(Arc::clone(&table));

    // Junction tables for every many-to-many side declared here.
    let m2m_fields: Vec<&'static str> = registry
        .get(model)?
        .many_to_many_fields()
        .map(|f| f.name)
        .collect();
    for field in m2m_fields {
        build_junction(registry, model, field)?;
    }

    Ok(table)
}

/// Convert one model's resolved fields into column records.
pub fn build_columns(registry: &mut SchemaRegistry, model: &str) -> Result<Vec<ColumnDef>> {
    resolve_model(registry, model)?;
    let schema = registry.get(model)?;
    let mut columns = Vec::new();

    for field in &schema.fields {
        match &field.kind {
            FieldKind::Scalar(scalar) => {
                let storage = mapped_storage(model, field.name, &scalar.storage)?;
                let mut column = ColumnDef::new(field.name, storage);
                column.nullable = field.nullable;
                column.primary_key = scalar.primary_key;
                column.autoincrement = scalar.autoincrement;
                column.unique = scalar.unique;
                column.index = scalar.index;
                column.default = scalar.default.clone();
                columns.push(column);
            }
            FieldKind::ForeignKey(fk) => {
                let related = registry.get(fk.related_model)?;
                let name = fk
                    .column_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", related.table_name));
                let storage = fk.storage.clone().unwrap_or(StorageType::BigInt);
                let paired = fk
                    .related_field_name
                    .and_then(|n| related.field(n))
                    .map(FieldDescriptor::actions);
                let (on_update, on_delete) = effective_actions(field, paired);
                let mut column = ColumnDef::new(name, mapped_storage(model, field.name, &storage)?);
                column.nullable = field.nullable;
                column.references = Some(ForeignRef {
                    table: related.table_name.to_string(),
                    column: fk.target_column.unwrap_or("id").to_string(),
                    on_update,
                    on_delete,
                });
                columns.push(column);
            }
            FieldKind::ReverseRelation(_) | FieldKind::ManyToMany(_) => {}
        }
    }

    Ok(columns)
}

/// Resolve declared composite indexes against physical column names.
fn build_indexes(registry: &SchemaRegistry, model: &str) -> Result<Vec<IndexDef>> {
    let schema = registry.get(model)?;
    let mut indexes = Vec::new();

    for index in &schema.indexes {
        let mut columns = Vec::new();
        let mut unknown = Vec::new();
        for entry in index.columns {
            match schema.column_for(entry) {
                Some(column) => columns.push(column.to_string()),
                None => unknown.push((*entry).to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::UnknownFields {
                model: model.to_string(),
                fields: unknown,
            });
        }
        indexes.push(IndexDef {
            name: index.name.to_string(),
            columns,
            unique: index.unique,
        });
    }

    Ok(indexes)
}

/// The deterministic junction table name for two tables.
pub fn junction_table_name(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_and_{b}")
    } else {
        format!("{b}_and_{a}")
    }
}

/// Build (or fetch) the shared junction table for one many-to-many field.
fn build_junction(registry: &mut SchemaRegistry, model: &str, field: &str) -> Result<()> {
    let (own_table, own_field) = {
        let schema = registry.get(model)?;
        let own_field = schema
            .field(field)
            .cloned()
            .ok_or_else(|| Error::UnknownFields {
                model: model.to_string(),
                fields: vec![field.to_string()],
            })?;
        (schema.table_name, own_field)
    };
    let Some(m2m) = own_field.as_many_to_many() else {
        return Ok(());
    };
    let related_model = m2m.related_model;
    let counterpart_name = m2m.related_field_name.ok_or_else(|| {
        Error::resolve(
            orchard_core::ResolveErrorKind::Unpaired,
            model,
            field,
            "junction requires a paired many-to-many counterpart",
        )
    })?;

    let (related_table, counterpart_field) = {
        let related = registry.get(related_model)?;
        let counterpart = related.field(counterpart_name).cloned().ok_or_else(|| {
            Error::resolve(
                orchard_core::ResolveErrorKind::Unpaired,
                model,
                field,
                format!("'{related_model}' has no field '{counterpart_name}'"),
            )
        })?;
        (related.table_name, counterpart)
    };

    let name = junction_table_name(own_table, related_table);
    if registry.junction(&name).is_none() {
        let own_side = junction_column(&own_field, own_table, counterpart_field.actions())?;
        let other_side = junction_column(&counterpart_field, related_table, own_field.actions())?;
        // Column order follows the name order, so declaration side is
        // irrelevant to the produced table.
        let mut columns = vec![own_side, other_side];
        columns.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::debug!(table = %name, "built junction table");
        registry.insert_junction(Arc::new(TableDef {
            name: name.clone(),
            columns,
            indexes: Vec::new(),
        }));
    }

    // Record the shared table name on both sides.
    if let Some(m2m) = registry
        .get_mut(model)?
        .field_mut(field)
        .and_then(FieldDescriptor::as_many_to_many_mut)
    {
        m2m.junction_table = Some(name.clone());
    }
    if let Some(m2m) = registry
        .get_mut(related_model)?
        .field_mut(counterpart_name)
        .and_then(FieldDescriptor::as_many_to_many_mut)
    {
        m2m.junction_table = Some(name);
    }

    Ok(())
}

/// One side's junction column: `{table}_{join_key}`, typed like the join
/// key, referencing it, with the precedence-resolved actions.
fn junction_column(
    field: &FieldDescriptor,
    table: &str,
    paired_actions: (Option<ReferentialAction>, Option<ReferentialAction>),
) -> Result<ColumnDef> {
    let m2m = field.as_many_to_many().ok_or_else(|| Error::Custom(
        format!("'{}' is not a many-to-many field", field.name),
    ))?;
    let join_key = m2m.join_key.unwrap_or("id");
    let storage = m2m.storage.clone().unwrap_or(StorageType::BigInt);
    let (local_update, local_delete) = field.actions();
    let (paired_update, paired_delete) = paired_actions;

    let mut column = ColumnDef::new(format!("{table}_{join_key}"), storage);
    column.references = Some(ForeignRef {
        table: table.to_string(),
        column: join_key.to_string(),
        on_update: local_update.or(paired_update).unwrap_or_default(),
        on_delete: local_delete.or(paired_delete).unwrap_or_default(),
    });
    Ok(column)
}

/// Referential actions for a foreign-key column: explicit local action,
/// else the paired field's explicit action, else NO ACTION.
fn effective_actions(
    field: &FieldDescriptor,
    paired: Option<(Option<ReferentialAction>, Option<ReferentialAction>)>,
) -> (ReferentialAction, ReferentialAction) {
    let (local_update, local_delete) = field.actions();
    let (paired_update, paired_delete) = paired.unwrap_or((None, None));
    (
        local_update.or(paired_update).unwrap_or_default(),
        local_delete.or(paired_delete).unwrap_or_default(),
    )
}

fn mapped_storage(model: &str, field: &str, storage: &StorageType) -> Result<StorageType> {
    if !storage.is_mapped() {
        return Err(Error::NoStorageType {
            model: model.to_string(),
            field: field.to_string(),
            declared: storage.declared_name(),
        });
    }
    Ok(storage.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AuditBase, Post, School, Student, Tag};
    use orchard_core::{CompositeIndex, Model, ModelConfig, RelatedValues, Row, Value};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        registry.register::<Tag>();
        registry.register::<Post>();
        registry
    }

    #[test]
    fn materialization_is_idempotent() {
        let mut registry = registry();
        let first = build_table(&mut registry, "School").unwrap();
        let second = build_table(&mut registry, "School").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn foreign_key_column_shape() {
        let mut registry = registry();
        let table = build_table(&mut registry, "Student").unwrap();

        let column = table.column("schools_id").unwrap();
        assert_eq!(column.storage, StorageType::BigInt);
        assert!(!column.nullable);
        let fk = column.references.as_ref().unwrap();
        assert_eq!(fk.table, "schools");
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete, ReferentialAction::NoAction);
    }

    #[test]
    fn junction_is_shared_and_lexicographic() {
        // Build from the Tag side first.
        let mut registry = registry();
        build_table(&mut registry, "Tag").unwrap();
        let from_tag = Arc::clone(registry.junction("posts_and_tags").unwrap());

        build_table(&mut registry, "Post").unwrap();
        let from_post = Arc::clone(registry.junction("posts_and_tags").unwrap());

        assert!(Arc::ptr_eq(&from_tag, &from_post));
        assert_eq!(
            from_tag.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["posts_id", "tags_id"]
        );

        // Declaration order never leaks into the name.
        let mut reversed = SchemaRegistry::new();
        reversed.register::<Post>();
        reversed.register::<Tag>();
        build_all(&mut reversed).unwrap();
        assert!(reversed.junction("posts_and_tags").is_some());
    }

    #[test]
    fn junction_name_recorded_on_both_sides() {
        let mut registry = registry();
        build_all(&mut registry).unwrap();

        for (model, field) in [("Tag", "posts"), ("Post", "tags")] {
            let m2m = registry
                .get(model)
                .unwrap()
                .field(field)
                .unwrap()
                .as_many_to_many()
                .unwrap()
                .clone();
            assert_eq!(m2m.junction_table.as_deref(), Some("posts_and_tags"));
        }
    }

    #[test]
    fn abstract_model_cannot_be_materialized() {
        let mut registry = SchemaRegistry::new();
        registry.register::<AuditBase>();
        let err = build_table(&mut registry, "AuditBase").unwrap_err();
        assert!(matches!(err, Error::AbstractModel { .. }));

        // build_all skips abstract models instead of failing
        build_all(&mut registry).unwrap();
        assert!(registry.get("AuditBase").unwrap().table.is_none());
    }

    #[derive(Debug, Clone, Default)]
    struct Sensor {
        related: RelatedValues,
    }

    impl Model for Sensor {
        const MODEL_NAME: &'static str = "Sensor";
        const TABLE_NAME: &'static str = "sensors";
        fn fields() -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::scalar("id", StorageType::BigInt).primary_key(),
                FieldDescriptor::scalar("address", StorageType::Unmapped("ipaddr")),
            ]
        }
        fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
            Ok(Vec::new())
        }
        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Self::default())
        }
        fn primary_key_value(&self) -> Vec<Value> {
            Vec::new()
        }
        fn set_primary_key(&mut self, _value: Value) {}
        fn related_values(&self) -> &RelatedValues {
            &self.related
        }
        fn related_values_mut(&mut self) -> &mut RelatedValues {
            &mut self.related
        }
        fn attach_related(&mut self, _field: &str, _rows: Vec<Row>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unmapped_type_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Sensor>();
        let err = build_table(&mut registry, "Sensor").unwrap_err();
        match err {
            Error::NoStorageType { field, declared, .. } => {
                assert_eq!(field, "address");
                assert_eq!(declared, "ipaddr");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Enrollment {
        related: RelatedValues,
    }

    impl Model for Enrollment {
        const MODEL_NAME: &'static str = "Enrollment";
        const TABLE_NAME: &'static str = "enrollments";
        fn fields() -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::scalar("id", StorageType::BigInt).primary_key(),
                FieldDescriptor::scalar("year", StorageType::Int),
                FieldDescriptor::foreign_key("school", "School")
                    .on_delete(ReferentialAction::Cascade),
            ]
        }
        fn config() -> ModelConfig {
            ModelConfig {
                abstract_model: false,
                indexes: vec![CompositeIndex {
                    name: "ix_enrollments_school_year",
                    columns: &["school", "year"],
                    unique: true,
                }],
            }
        }
        fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
            Ok(Vec::new())
        }
        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Self::default())
        }
        fn primary_key_value(&self) -> Vec<Value> {
            Vec::new()
        }
        fn set_primary_key(&mut self, _value: Value) {}
        fn related_values(&self) -> &RelatedValues {
            &self.related
        }
        fn related_values_mut(&mut self) -> &mut RelatedValues {
            &mut self.related
        }
        fn attach_related(&mut self, _field: &str, _rows: Vec<Row>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn composite_index_resolves_relationship_names() {
        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        registry.register::<Enrollment>();
        let table = build_table(&mut registry, "Enrollment").unwrap();

        assert_eq!(table.indexes.len(), 1);
        let index = &table.indexes[0];
        // The relationship field name lowers to its synthetic column.
        assert_eq!(index.columns, vec!["schools_id", "year"]);
        assert!(index.unique);
    }

    #[test]
    fn local_referential_action_wins() {
        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        registry.register::<Enrollment>();
        let table = build_table(&mut registry, "Enrollment").unwrap();

        let fk = table.column("schools_id").unwrap().references.as_ref().unwrap();
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::NoAction);
    }
}
