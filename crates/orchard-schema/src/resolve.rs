//! Relationship resolution: the pairing pass over registered models.
//!
//! Resolution runs per model, at first materialization, and is idempotent.
//! Two passes: a local pass validating that every relationship field points
//! at a registered model (forward references must be registered by now),
//! then a pairing pass matching each relationship field to its structural
//! counterpart on the related model. Pairing writes the counterpart name on
//! BOTH sides, so resolving model A may partially annotate model B; B's own
//! resolution then finds those names already pointing back.
//!
//! Mutations are collected first and applied afterwards: pairing needs to
//! read the related model while deciding updates for the current one, and
//! a model may relate to itself.

use crate::registry::SchemaRegistry;
use orchard_core::{
    Error, FieldDescriptor, FieldKind, ResolveErrorKind, Result, StorageType,
};

/// Resolve every registered model, in registration order.
pub fn resolve_all(registry: &mut SchemaRegistry) -> Result<()> {
    let names: Vec<&'static str> = registry.model_names().to_vec();
    for name in names {
        resolve_model(registry, name)?;
    }
    Ok(())
}

/// Resolve one model's relationship fields. A no-op when already resolved.
pub fn resolve_model(registry: &mut SchemaRegistry, model: &str) -> Result<()> {
    if registry.get(model)?.resolved {
        return Ok(());
    }
    tracing::debug!(model, "resolving relationships");

    local_pass(registry, model)?;
    let updates = pairing_pass(registry, model)?;
    apply(registry, updates)?;

    registry.get_mut(model)?.resolved = true;
    Ok(())
}

/// Validate relationship targets and reject ambiguous duplicate relations.
fn local_pass(registry: &SchemaRegistry, model: &str) -> Result<()> {
    let schema = registry.get(model)?;

    for field in schema.relationship_fields() {
        let target = field
            .related_model()
            .unwrap_or_default();
        if !registry.contains(target) {
            return Err(Error::resolve(
                ResolveErrorKind::NotAModel,
                model,
                field.name,
                format!("'{target}' is not a registered model"),
            ));
        }
    }

    // Two relationship fields of the same kind targeting the same model
    // are ambiguous unless every one of them names its counterpart.
    for field in schema.relationship_fields() {
        if field.related_field_name().is_some() {
            continue;
        }
        let twins = schema
            .relationship_fields()
            .filter(|other| {
                other.name != field.name
                    && std::mem::discriminant(&other.kind) == std::mem::discriminant(&field.kind)
                    && other.related_model() == field.related_model()
            })
            .count();
        if twins > 0 {
            return Err(Error::resolve(
                ResolveErrorKind::Duplicate,
                model,
                field.name,
                format!(
                    "several {} fields target '{}'; name each counterpart explicitly",
                    field.kind_name(),
                    field.related_model().unwrap_or_default()
                ),
            ));
        }
    }

    Ok(())
}

/// A derived attribute write, collected during pairing.
enum Update {
    /// Set `related_field_name` on `model.field`
    Counterpart {
        model: &'static str,
        field: &'static str,
        counterpart: &'static str,
    },
    /// Derived foreign-key attributes
    ForeignKey {
        model: &'static str,
        field: &'static str,
        target_column: &'static str,
        column_name: String,
        storage: StorageType,
    },
    /// Derived many-to-many attributes for one side
    ManyToMany {
        model: &'static str,
        field: &'static str,
        join_key: &'static str,
        junction_column: String,
        storage: StorageType,
    },
}

fn pairing_pass(registry: &SchemaRegistry, model: &str) -> Result<Vec<Update>> {
    let schema = registry.get(model)?;
    let own_name = schema.model_name;
    let own_table = schema.table_name;
    let mut updates = Vec::new();

    for field in schema.relationship_fields() {
        let related_name = field.related_model().unwrap_or_default();
        let related = registry.get(related_name)?;

        // A foreign key may stand alone; the reverse and many-to-many
        // kinds cannot work without their counterpart.
        let counterpart = find_counterpart(registry, model, field)?;
        match counterpart {
            Some(counterpart) => {
                updates.push(Update::Counterpart {
                    model: own_name,
                    field: field.name,
                    counterpart,
                });
                updates.push(Update::Counterpart {
                    model: related.model_name,
                    field: counterpart,
                    counterpart: field.name,
                });
            }
            None if matches!(field.kind, FieldKind::ForeignKey(_)) => {}
            None => {
                return Err(Error::resolve(
                    ResolveErrorKind::Unpaired,
                    own_name,
                    field.name,
                    format!(
                        "no {} counterpart on '{}'",
                        field.kind_name(),
                        related.model_name
                    ),
                ));
            }
        }

        match &field.kind {
            FieldKind::ForeignKey(fk) => {
                let target_column = match fk.target_column {
                    Some(column) => column,
                    None => related.sole_primary_key()?.name,
                };
                let target_field =
                    related.field(target_column).ok_or_else(|| {
                        Error::resolve(
                            ResolveErrorKind::WrongShape,
                            own_name,
                            field.name,
                            format!(
                                "target column '{target_column}' does not exist on '{}'",
                                related.model_name
                            ),
                        )
                    })?;
                let storage = scalar_storage(own_name, target_field)?;
                updates.push(Update::ForeignKey {
                    model: own_name,
                    field: field.name,
                    target_column,
                    column_name: format!("{}_{target_column}", related.table_name),
                    storage,
                });
            }
            FieldKind::ManyToMany(m2m) => {
                let join_key = match m2m.join_key {
                    Some(column) => column,
                    None => schema.sole_primary_key()?.name,
                };
                let join_field = schema.field(join_key).ok_or_else(|| {
                    Error::resolve(
                        ResolveErrorKind::WrongShape,
                        own_name,
                        field.name,
                        format!("join key '{join_key}' does not exist on '{own_name}'"),
                    )
                })?;
                let storage = scalar_storage(own_name, join_field)?;
                updates.push(Update::ManyToMany {
                    model: own_name,
                    field: field.name,
                    join_key,
                    junction_column: format!("{own_table}_{join_key}"),
                    storage,
                });
            }
            FieldKind::ReverseRelation(_) | FieldKind::Scalar(_) => {}
        }
    }

    Ok(updates)
}

/// Find the counterpart field name on the related model, if one exists.
///
/// An explicit `related_field` name wins and must exist with a compatible
/// shape; otherwise the first structurally compatible field, in declaration
/// order, whose own counterpart name is unset or already points back at us.
fn find_counterpart(
    registry: &SchemaRegistry,
    model: &str,
    field: &FieldDescriptor,
) -> Result<Option<&'static str>> {
    let schema = registry.get(model)?;
    let related = registry.get(field.related_model().unwrap_or_default())?;

    if let Some(named) = field.related_field_name() {
        let candidate = related.field(named).ok_or_else(|| {
            Error::resolve(
                ResolveErrorKind::Unpaired,
                schema.model_name,
                field.name,
                format!("'{}' has no field '{named}'", related.model_name),
            )
        })?;
        if !compatible(field, candidate, schema.model_name) {
            return Err(Error::resolve(
                ResolveErrorKind::WrongShape,
                schema.model_name,
                field.name,
                format!(
                    "'{}.{named}' is not a {} counterpart",
                    related.model_name,
                    field.kind_name()
                ),
            ));
        }
        return Ok(Some(candidate.name));
    }

    Ok(related
        .relationship_fields()
        .find(|candidate| {
            compatible(field, candidate, schema.model_name)
                && candidate
                    .related_field_name()
                    .is_none_or(|name| name == field.name)
        })
        .map(|candidate| candidate.name))
}

/// Structural compatibility: ForeignKey pairs with ReverseRelation and
/// vice versa; ManyToMany pairs with ManyToMany. The candidate must also
/// point back at the requesting model.
fn compatible(field: &FieldDescriptor, candidate: &FieldDescriptor, own_model: &str) -> bool {
    if candidate.related_model() != Some(own_model) {
        return false;
    }
    matches!(
        (&field.kind, &candidate.kind),
        (FieldKind::ForeignKey(_), FieldKind::ReverseRelation(_))
            | (FieldKind::ReverseRelation(_), FieldKind::ForeignKey(_))
            | (FieldKind::ManyToMany(_), FieldKind::ManyToMany(_))
    )
}

fn scalar_storage(model: &str, field: &FieldDescriptor) -> Result<StorageType> {
    let scalar = field.as_scalar().ok_or_else(|| {
        Error::resolve(
            ResolveErrorKind::WrongShape,
            model,
            field.name,
            "key columns must be scalar fields",
        )
    })?;
    Ok(scalar.storage.clone())
}

fn apply(registry: &mut SchemaRegistry, updates: Vec<Update>) -> Result<()> {
    for update in updates {
        match update {
            Update::Counterpart {
                model,
                field,
                counterpart,
            } => {
                if let Some(f) = registry.get_mut(model)?.field_mut(field) {
                    f.set_related_field_name(counterpart);
                }
            }
            Update::ForeignKey {
                model,
                field,
                target_column,
                column_name,
                storage,
            } => {
                if let Some(fk) = registry
                    .get_mut(model)?
                    .field_mut(field)
                    .and_then(FieldDescriptor::as_foreign_key_mut)
                {
                    fk.target_column = Some(target_column);
                    fk.column_name = Some(column_name);
                    fk.storage = Some(storage);
                }
            }
            Update::ManyToMany {
                model,
                field,
                join_key,
                junction_column,
                storage,
            } => {
                if let Some(m2m) = registry
                    .get_mut(model)?
                    .field_mut(field)
                    .and_then(FieldDescriptor::as_many_to_many_mut)
                {
                    m2m.join_key = Some(join_key);
                    m2m.junction_column = Some(junction_column);
                    m2m.storage = Some(storage);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Post, School, Student, Tag};
    use orchard_core::Model;

    fn school_registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        registry
    }

    #[test]
    fn pairing_is_symmetric() {
        let mut registry = school_registry();
        resolve_all(&mut registry).unwrap();

        let school = registry.get("School").unwrap();
        let student = registry.get("Student").unwrap();
        assert_eq!(
            school.field("students").unwrap().related_field_name(),
            Some("school")
        );
        assert_eq!(
            student.field("school").unwrap().related_field_name(),
            Some("students")
        );
    }

    #[test]
    fn foreign_key_naming_is_deterministic() {
        let mut registry = school_registry();
        resolve_all(&mut registry).unwrap();

        let fk = registry
            .get("Student")
            .unwrap()
            .field("school")
            .unwrap()
            .as_foreign_key()
            .unwrap()
            .clone();
        assert_eq!(fk.target_column, Some("id"));
        assert_eq!(fk.column_name.as_deref(), Some("schools_id"));
        assert_eq!(fk.storage, Some(StorageType::BigInt));
    }

    #[test]
    fn resolution_order_does_not_matter() {
        // Resolving the reverse side first must annotate the owning side
        // identically.
        let mut registry = school_registry();
        resolve_model(&mut registry, "School").unwrap();
        resolve_model(&mut registry, "Student").unwrap();

        let mut reversed = school_registry();
        resolve_model(&mut reversed, "Student").unwrap();
        resolve_model(&mut reversed, "School").unwrap();

        let a = registry.get("Student").unwrap().field("school").unwrap().clone();
        let b = reversed.get("Student").unwrap().field("school").unwrap().clone();
        assert_eq!(a, b);
    }

    #[test]
    fn many_to_many_pairing_and_join_keys() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Tag>();
        registry.register::<Post>();
        resolve_all(&mut registry).unwrap();

        let tag_side = registry
            .get("Tag")
            .unwrap()
            .field("posts")
            .unwrap()
            .as_many_to_many()
            .unwrap()
            .clone();
        assert_eq!(tag_side.related_field_name, Some("tags"));
        assert_eq!(tag_side.join_key, Some("id"));
        assert_eq!(tag_side.junction_column.as_deref(), Some("tags_id"));
    }

    #[test]
    fn unregistered_target_fails() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Student>();
        let err = resolve_model(&mut registry, "Student").unwrap_err();
        match err {
            Error::Resolve(e) => assert_eq!(e.kind, ResolveErrorKind::NotAModel),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_counterpart_fails() {
        #[derive(Debug, Clone, Default)]
        struct Annex {
            related: orchard_core::RelatedValues,
        }
        impl Model for Annex {
            const MODEL_NAME: &'static str = "Annex";
            const TABLE_NAME: &'static str = "annexes";
            fn fields() -> Vec<FieldDescriptor> {
                vec![
                    FieldDescriptor::scalar("id", StorageType::BigInt).primary_key(),
                    // Student has no foreign key back to Annex
                    FieldDescriptor::reverse_list("students", "Student"),
                ]
            }
            fn to_row(&self) -> orchard_core::Result<Vec<(&'static str, orchard_core::Value)>> {
                Ok(Vec::new())
            }
            fn from_row(_row: &orchard_core::Row) -> orchard_core::Result<Self> {
                Ok(Self::default())
            }
            fn primary_key_value(&self) -> Vec<orchard_core::Value> {
                Vec::new()
            }
            fn set_primary_key(&mut self, _value: orchard_core::Value) {}
            fn related_values(&self) -> &orchard_core::RelatedValues {
                &self.related
            }
            fn related_values_mut(&mut self) -> &mut orchard_core::RelatedValues {
                &mut self.related
            }
            fn attach_related(
                &mut self,
                _field: &str,
                _rows: Vec<orchard_core::Row>,
            ) -> orchard_core::Result<()> {
                Ok(())
            }
        }

        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        registry.register::<Annex>();
        let err = resolve_model(&mut registry, "Annex").unwrap_err();
        match err {
            Error::Resolve(e) => assert_eq!(e.kind, ResolveErrorKind::Unpaired),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_unnamed_relations_rejected() {
        #[derive(Debug, Clone, Default)]
        struct Rivalry {
            related: orchard_core::RelatedValues,
        }
        impl Model for Rivalry {
            const MODEL_NAME: &'static str = "Rivalry";
            const TABLE_NAME: &'static str = "rivalries";
            fn fields() -> Vec<FieldDescriptor> {
                vec![
                    FieldDescriptor::scalar("id", StorageType::BigInt).primary_key(),
                    FieldDescriptor::foreign_key("home", "School"),
                    FieldDescriptor::foreign_key("away", "School"),
                ]
            }
            fn to_row(&self) -> orchard_core::Result<Vec<(&'static str, orchard_core::Value)>> {
                Ok(Vec::new())
            }
            fn from_row(_row: &orchard_core::Row) -> orchard_core::Result<Self> {
                Ok(Self::default())
            }
            fn primary_key_value(&self) -> Vec<orchard_core::Value> {
                Vec::new()
            }
            fn set_primary_key(&mut self, _value: orchard_core::Value) {}
            fn related_values(&self) -> &orchard_core::RelatedValues {
                &self.related
            }
            fn related_values_mut(&mut self) -> &mut orchard_core::RelatedValues {
                &mut self.related
            }
            fn attach_related(
                &mut self,
                _field: &str,
                _rows: Vec<orchard_core::Row>,
            ) -> orchard_core::Result<()> {
                Ok(())
            }
        }

        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Rivalry>();
        let err = resolve_model(&mut registry, "Rivalry").unwrap_err();
        match err {
            Error::Resolve(e) => assert_eq!(e.kind, ResolveErrorKind::Duplicate),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut registry = school_registry();
        resolve_all(&mut registry).unwrap();
        let before = registry.get("Student").unwrap().fields.clone();
        resolve_all(&mut registry).unwrap();
        assert_eq!(registry.get("Student").unwrap().fields, before);
    }
}
