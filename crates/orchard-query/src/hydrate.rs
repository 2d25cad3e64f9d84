//! Relationship hydration: loading related objects after a fetch.
//!
//! The single-instance path issues one query per selected relationship
//! field. The batch path issues one `IN` query per relationship field for
//! the whole fetched set and redistributes the rows by key, so hydrating N
//! instances costs the same number of round trips as hydrating one.
//!
//! Cardinality and nullability are enforced here: a missing single,
//! non-nullable relation is an error, a missing optional one attaches
//! empty, and list relations attach whatever matched.

use crate::queryset::Prefetch;
use crate::try_res;
use asupersync::{Cx, Outcome};
use orchard_core::{
    Connection, DatabaseScope, Error, FieldDescriptor, Model, Result, Row, Value, quote_ident,
    try_outcome,
};
use orchard_schema::{ModelSchema, SchemaRegistry};
use std::collections::HashMap;

/// Load the selected relationship fields of one instance.
#[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME))]
pub async fn fetch_related_one<M: Model, C: Connection>(
    cx: &Cx,
    scope: &DatabaseScope<C>,
    registry: &SchemaRegistry,
    model: &mut M,
    prefetch: &Prefetch,
) -> Outcome<(), Error> {
    let schema = try_res!(registry.get(M::MODEL_NAME));
    for field in schema.relationship_fields() {
        let related = try_res!(registry.get(field.related_model().unwrap_or_default()));
        if !prefetch.selects(related.table_name, related.model_name, field.name) {
            continue;
        }
        let plan = try_res!(HydrationPlan::for_field(schema, related, field));

        let key = match &plan.key_source {
            KeySource::Cache => model
                .related_values()
                .get(field.name)
                .cloned()
                .unwrap_or(Value::Null),
            KeySource::Column(column) => try_res!(column_value(model, column)),
        };
        if key.is_null() {
            if plan.single && !field.nullable {
                return Outcome::Err(Error::MissingRelatedValue {
                    model: M::MODEL_NAME.to_string(),
                    field: field.name.to_string(),
                });
            }
            try_res!(model.attach_related(field.name, Vec::new()));
            continue;
        }

        let sql = format!("{} WHERE {} = $1", plan.select, plan.key_column);
        let rows = try_outcome!(scope.query(cx, &sql, &[key]).await);
        if rows.is_empty() && plan.single && !field.nullable {
            return Outcome::Err(Error::NoMatchingRow {
                model: field.related_model().unwrap_or_default().to_string(),
            });
        }
        try_res!(model.attach_related(field.name, rows));
    }
    Outcome::Ok(())
}

/// Load the selected relationship fields of a fetched batch, one query per
/// relationship field.
#[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME, batch = models.len()))]
pub async fn fetch_related_many<M: Model, C: Connection>(
    cx: &Cx,
    scope: &DatabaseScope<C>,
    registry: &SchemaRegistry,
    models: &mut [M],
    prefetch: &Prefetch,
) -> Outcome<(), Error> {
    if models.is_empty() {
        return Outcome::Ok(());
    }
    let schema = try_res!(registry.get(M::MODEL_NAME));
    for field in schema.relationship_fields() {
        let related = try_res!(registry.get(field.related_model().unwrap_or_default()));
        if !prefetch.selects(related.table_name, related.model_name, field.name) {
            continue;
        }
        let plan = try_res!(HydrationPlan::for_field(schema, related, field));

        // One key per instance, deduplicated for the IN list.
        let mut keys = Vec::with_capacity(models.len());
        let mut distinct: Vec<Value> = Vec::new();
        for model in models.iter() {
            let key = match &plan.key_source {
                KeySource::Cache => model
                    .related_values()
                    .get(field.name)
                    .cloned()
                    .unwrap_or(Value::Null),
                KeySource::Column(column) => try_res!(column_value(model, column)),
            };
            if !key.is_null() && !distinct.iter().any(|k| k.group_key() == key.group_key()) {
                distinct.push(key.clone());
            }
            keys.push(key);
        }

        let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
        if !distinct.is_empty() {
            let placeholders = (1..=distinct.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("{} WHERE {} IN ({placeholders})", plan.select, plan.key_column);
            let rows = try_outcome!(scope.query(cx, &sql, &distinct).await);
            for row in rows {
                let group = row
                    .get_by_name(&plan.group_column)
                    .map(Value::group_key)
                    .unwrap_or_default();
                grouped.entry(group).or_default().push(row);
            }
        }

        for (model, key) in models.iter_mut().zip(&keys) {
            let rows = if key.is_null() {
                Vec::new()
            } else {
                grouped.get(&key.group_key()).cloned().unwrap_or_default()
            };
            if rows.is_empty() && plan.single && !field.nullable {
                return Outcome::Err(if key.is_null() {
                    Error::MissingRelatedValue {
                        model: M::MODEL_NAME.to_string(),
                        field: field.name.to_string(),
                    }
                } else {
                    Error::NoMatchingRow {
                        model: field.related_model().unwrap_or_default().to_string(),
                    }
                });
            }
            try_res!(model.attach_related(field.name, rows));
        }
    }
    Outcome::Ok(())
}

/// Where the local key for a relationship lives on the instance.
enum KeySource {
    /// The raw-key cache populated by `from_row` (foreign keys)
    Cache,
    /// A concrete column of the instance's own row
    Column(String),
}

/// A compiled per-field hydration strategy shared by the single and batch
/// paths.
struct HydrationPlan {
    /// SELECT ... FROM ... [JOIN ...] without the WHERE clause
    select: String,
    /// Ready SQL fragment the WHERE/IN predicate applies to, quoted and
    /// qualified where the SELECT involves a join
    key_column: String,
    /// Column of the result rows used to redistribute a batch
    group_column: String,
    key_source: KeySource,
    /// Single/optional cardinality (lists attach whatever matched)
    single: bool,
}

impl HydrationPlan {
    fn for_field(
        schema: &ModelSchema,
        related: &ModelSchema,
        field: &FieldDescriptor,
    ) -> Result<Self> {
        let unresolved = || Error::Clause {
            message: format!("relationship '{}' is not resolved", field.name),
        };

        if let Some(fk) = field.as_foreign_key() {
            let target = fk.target_column.ok_or_else(unresolved)?;
            return Ok(Self {
                select: format!("SELECT * FROM {}", quote_ident(related.table_name)),
                key_column: quote_ident(target),
                group_column: target.to_string(),
                key_source: KeySource::Cache,
                single: true,
            });
        }

        if let Some(reverse) = field.as_reverse() {
            let paired = reverse.related_field_name.ok_or_else(unresolved)?;
            let fk = related
                .field(paired)
                .and_then(|f| f.as_foreign_key())
                .ok_or_else(unresolved)?;
            let column = fk.column_name.clone().ok_or_else(unresolved)?;
            let target = fk.target_column.ok_or_else(unresolved)?;
            return Ok(Self {
                select: format!("SELECT * FROM {}", quote_ident(related.table_name)),
                key_column: quote_ident(&column),
                group_column: column,
                key_source: KeySource::Column(target.to_string()),
                single: !reverse.is_list,
            });
        }

        if let Some(m2m) = field.as_many_to_many() {
            let junction = m2m.junction_table.clone().ok_or_else(unresolved)?;
            let own_key = m2m.join_key.ok_or_else(unresolved)?;
            let own_column = m2m.junction_column.clone().ok_or_else(unresolved)?;
            let their = related
                .field(m2m.related_field_name.ok_or_else(unresolved)?)
                .and_then(|f| f.as_many_to_many())
                .ok_or_else(unresolved)?;
            let their_key = their.join_key.ok_or_else(unresolved)?;
            let their_column = their.junction_column.clone().ok_or_else(unresolved)?;

            let rel = quote_ident(related.table_name);
            let junc = quote_ident(&junction);
            return Ok(Self {
                // The origin key rides along so a batch can be regrouped;
                // `from_row` ignores columns it does not declare.
                select: format!(
                    "SELECT {rel}.*, {junc}.{oc} AS \"__origin\" FROM {rel} \
                     INNER JOIN {junc} ON {rel}.{tk} = {junc}.{tc}",
                    oc = quote_ident(&own_column),
                    tk = quote_ident(their_key),
                    tc = quote_ident(&their_column),
                ),
                key_column: format!("{junc}.{}", quote_ident(&own_column)),
                group_column: "__origin".to_string(),
                key_source: KeySource::Column(own_key.to_string()),
                single: false,
            });
        }

        Err(unresolved())
    }
}

fn column_value<M: Model>(model: &M, column: &str) -> Result<Value> {
    let row = model.to_row()?;
    Ok(row
        .into_iter()
        .find(|(name, _)| *name == column)
        .map(|(_, value)| value)
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, fixture_registry, statements};
    use asupersync::runtime::RuntimeBuilder;
    use orchard_core::RelatedValues;
    use orchard_schema::testing::{Post, School, Student};

    fn student(id: i64, school: i64) -> Student {
        let mut related = RelatedValues::new();
        related.set("school", Value::BigInt(school));
        Student {
            id: Some(id),
            name: format!("student {id}"),
            age: 18,
            school: None,
            related,
        }
    }

    fn school_row(id: i64, name: &str) -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::BigInt(id), Value::Text(name.to_string())],
        )
    }

    #[test]
    fn test_foreign_key_loads_the_owning_row() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![school_row(7, "Hogwarts")]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let mut loaded = student(1, 7);
            let outcome =
                fetch_related_one(&cx, &scope, &registry, &mut loaded, &Prefetch::All).await;
            assert!(matches!(outcome, Outcome::Ok(())));

            let issued = statements(&log);
            assert_eq!(issued.len(), 1);
            assert_eq!(issued[0].0, "SELECT * FROM \"schools\" WHERE \"id\" = $1");
            assert_eq!(issued[0].1, vec![Value::BigInt(7)]);
            assert_eq!(loaded.school.as_ref().map(|s| s.name.as_str()), Some("Hogwarts"));
        });
    }

    #[test]
    fn test_reverse_relation_queries_the_synthetic_column() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec![
                    "id".to_string(),
                    "name".to_string(),
                    "age".to_string(),
                    "schools_id".to_string(),
                ],
                vec![
                    Value::BigInt(1),
                    Value::Text("student 1".to_string()),
                    Value::Int(18),
                    Value::BigInt(7),
                ],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let mut school = School {
                id: Some(7),
                name: "Hogwarts".to_string(),
                ..School::default()
            };
            let outcome =
                fetch_related_one(&cx, &scope, &registry, &mut school, &Prefetch::All).await;
            assert!(matches!(outcome, Outcome::Ok(())));

            let issued = statements(&log);
            assert_eq!(
                issued[0].0,
                "SELECT * FROM \"students\" WHERE \"schools_id\" = $1"
            );
            assert_eq!(issued[0].1, vec![Value::BigInt(7)]);
            assert_eq!(school.students.as_ref().map(Vec::len), Some(1));
        });
    }

    #[test]
    fn test_batch_hydration_issues_one_query_per_relationship() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![school_row(1, "first"), school_row(2, "second")]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let mut students = vec![student(1, 1), student(2, 1), student(3, 2)];
            let outcome =
                fetch_related_many(&cx, &scope, &registry, &mut students, &Prefetch::All).await;
            assert!(matches!(outcome, Outcome::Ok(())));

            let issued = statements(&log);
            assert_eq!(issued.len(), 1);
            assert_eq!(
                issued[0].0,
                "SELECT * FROM \"schools\" WHERE \"id\" IN ($1, $2)"
            );
            assert_eq!(issued[0].1, vec![Value::BigInt(1), Value::BigInt(2)]);

            let names: Vec<_> = students
                .iter()
                .map(|s| s.school.as_ref().map(|school| school.name.clone()))
                .collect();
            assert_eq!(
                names,
                vec![
                    Some("first".to_string()),
                    Some("first".to_string()),
                    Some("second".to_string()),
                ]
            );
        });
    }

    #[test]
    fn test_batch_hydration_matches_keys_across_integer_widths() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![school_row(4, "narrow")]);
            let scope = DatabaseScope::new(conn);

            // Cached key narrower than the backend's BIGINT key column.
            let mut related = RelatedValues::new();
            related.set("school", Value::Int(4));
            let mut students = vec![Student {
                id: Some(1),
                name: "student 1".to_string(),
                age: 18,
                school: None,
                related,
            }];
            let outcome =
                fetch_related_many(&cx, &scope, &registry, &mut students, &Prefetch::All).await;
            assert!(matches!(outcome, Outcome::Ok(())));
            assert_eq!(
                students[0].school.as_ref().map(|school| school.name.clone()),
                Some("narrow".to_string())
            );
        });
    }

    #[test]
    fn test_many_to_many_hydration_goes_through_the_junction() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec![
                    "id".to_string(),
                    "name".to_string(),
                    "__origin".to_string(),
                ],
                vec![
                    Value::BigInt(3),
                    Value::Text("rust".to_string()),
                    Value::BigInt(5),
                ],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let mut post = Post {
                id: Some(5),
                title: "borrow checker".to_string(),
                ..Post::default()
            };
            let outcome =
                fetch_related_one(&cx, &scope, &registry, &mut post, &Prefetch::All).await;
            assert!(matches!(outcome, Outcome::Ok(())));

            let issued = statements(&log);
            assert_eq!(
                issued[0].0,
                "SELECT \"tags\".*, \"posts_and_tags\".\"posts_id\" AS \"__origin\" \
                 FROM \"tags\" INNER JOIN \"posts_and_tags\" \
                 ON \"tags\".\"id\" = \"posts_and_tags\".\"tags_id\" \
                 WHERE \"posts_and_tags\".\"posts_id\" = $1"
            );
            assert_eq!(issued[0].1, vec![Value::BigInt(5)]);
            assert_eq!(
                post.tags.as_ref().map(|tags| tags[0].name.clone()),
                Some("rust".to_string())
            );
        });
    }

    #[test]
    fn test_missing_required_key_is_an_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let scope = DatabaseScope::new(MockConnection::new());

            // No raw key cached and the relationship is non-nullable.
            let mut orphan = Student {
                id: Some(1),
                name: "orphan".to_string(),
                age: 18,
                school: None,
                related: RelatedValues::new(),
            };
            let outcome =
                fetch_related_one(&cx, &scope, &registry, &mut orphan, &Prefetch::All).await;
            assert!(matches!(
                outcome,
                Outcome::Err(Error::MissingRelatedValue { model, field })
                    if model == "Student" && field == "school"
            ));
        });
    }

    #[test]
    fn test_prefetch_none_issues_no_queries() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let mut loaded = student(1, 7);
            let outcome =
                fetch_related_one(&cx, &scope, &registry, &mut loaded, &Prefetch::None).await;
            assert!(matches!(outcome, Outcome::Ok(())));
            assert!(statements(&log).is_empty());
            assert!(loaded.school.is_none());
        });
    }
}
