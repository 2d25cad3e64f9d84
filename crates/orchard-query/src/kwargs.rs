//! Keyword-style predicates: `field__operator` names paired with values.
//!
//! The name is split on its last `__`; a recognized suffix selects the
//! operator, anything else means the whole name is a field filtered with
//! equality. Field names are checked against the model schema, and a
//! foreign-key field lowers to its synthetic column, so `school=3` filters
//! on `schools_id`.

use crate::expr::Expr;
use orchard_core::{Error, Result, Value};
use orchard_schema::ModelSchema;

/// A recognized `field__operator` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Is,
    IsNot,
    Like,
    NotLike,
    Ilike,
    NotIlike,
    In,
    NotIn,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    IContains,
    Regex,
    NotRegex,
    Between,
    DistinctFrom,
    NotDistinctFrom,
}

fn lookup(suffix: &str) -> Option<Op> {
    Some(match suffix {
        "eq" => Op::Eq,
        "ne" | "not" => Op::Ne,
        "gt" => Op::Gt,
        "ge" | "gte" => Op::Ge,
        "lt" => Op::Lt,
        "le" | "lte" => Op::Le,
        "is" => Op::Is,
        "is_not" => Op::IsNot,
        "like" => Op::Like,
        "not_like" => Op::NotLike,
        "ilike" => Op::Ilike,
        "not_ilike" => Op::NotIlike,
        "in" => Op::In,
        "not_in" => Op::NotIn,
        "startswith" => Op::StartsWith,
        "istartswith" => Op::IStartsWith,
        "endswith" => Op::EndsWith,
        "iendswith" => Op::IEndsWith,
        "contains" => Op::Contains,
        "icontains" => Op::IContains,
        "regex" => Op::Regex,
        "not_regex" => Op::NotRegex,
        "between" => Op::Between,
        "distinct_from" => Op::DistinctFrom,
        "not_distinct_from" => Op::NotDistinctFrom,
        _ => return None,
    })
}

/// Compile one keyword predicate against a model schema.
pub fn parse(schema: &ModelSchema, name: &str, value: Value) -> Result<Expr> {
    let (field, op) = match name.rsplit_once("__") {
        Some((field, suffix)) => match lookup(suffix) {
            Some(op) => (field, op),
            // Unknown suffix: the whole name is the field, equality applies
            None => (name, Op::Eq),
        },
        None => (name, Op::Eq),
    };

    let column = schema.column_for(field).ok_or_else(|| Error::UnknownFields {
        model: schema.model_name.to_string(),
        fields: vec![field.to_string()],
    })?;
    let column = Expr::col(column);

    Ok(match op {
        Op::Eq => column.eq(value),
        Op::Ne => column.ne(value),
        Op::Gt => column.gt(value),
        Op::Ge => column.ge(value),
        Op::Lt => column.lt(value),
        Op::Le => column.le(value),
        Op::Is => column.is(value),
        Op::IsNot => column.is_not(value),
        Op::DistinctFrom => column.is_not(value),
        Op::NotDistinctFrom => column.is(value),
        Op::Like => column.like(text_operand(field, "like", value)?),
        Op::NotLike => column.not_like(text_operand(field, "not_like", value)?),
        Op::Ilike => column.ilike(text_operand(field, "ilike", value)?),
        Op::NotIlike => column.not_ilike(text_operand(field, "not_ilike", value)?),
        Op::StartsWith => column.starts_with(&text_operand(field, "startswith", value)?),
        Op::IStartsWith => {
            let prefix = text_operand(field, "istartswith", value)?;
            column.ilike(format!("{}%", escape(&prefix)))
        }
        Op::EndsWith => column.ends_with(&text_operand(field, "endswith", value)?),
        Op::IEndsWith => {
            let suffix = text_operand(field, "iendswith", value)?;
            column.ilike(format!("%{}", escape(&suffix)))
        }
        Op::Contains => column.contains(&text_operand(field, "contains", value)?),
        Op::IContains => {
            let needle = text_operand(field, "icontains", value)?;
            column.ilike(format!("%{}%", escape(&needle)))
        }
        Op::Regex => column.regex(text_operand(field, "regex", value)?),
        Op::NotRegex => column.not_regex(text_operand(field, "not_regex", value)?),
        Op::In => column.in_values(array_operand(field, "in", value)?),
        Op::NotIn => column.not_in_values(array_operand(field, "not_in", value)?),
        Op::Between => {
            let mut bounds = array_operand(field, "between", value)?;
            if bounds.len() != 2 {
                return Err(Error::Clause {
                    message: format!(
                        "{field}__between takes exactly two values, got {}",
                        bounds.len()
                    ),
                });
            }
            let high = bounds.pop().unwrap_or_else(Expr::null);
            let low = bounds.pop().unwrap_or_else(Expr::null);
            column.between(low, high)
        }
    })
}

fn text_operand(field: &str, op: &str, value: Value) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(Error::Clause {
            message: format!(
                "{field}__{op} needs a text value, got {}",
                other.type_name()
            ),
        }),
    }
}

fn array_operand(field: &str, op: &str, value: Value) -> Result<Vec<Expr>> {
    match value {
        Value::Array(values) => Ok(values.into_iter().map(Expr::Literal).collect()),
        other => Err(Error::Clause {
            message: format!(
                "{field}__{op} needs a list of values, got {}",
                other.type_name()
            ),
        }),
    }
}

fn escape(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_schema::testing::{School, Student};
    use orchard_schema::{SchemaRegistry, resolve_all};

    fn student_schema() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register::<School>();
        registry.register::<Student>();
        resolve_all(&mut registry).unwrap();
        registry
    }

    fn build(expr: &Expr) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = expr.build(&mut params, 0);
        (sql, params)
    }

    #[test]
    fn bare_name_defaults_to_equality() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let expr = parse(schema, "age", Value::Int(18)).unwrap();
        let (sql, params) = build(&expr);
        assert_eq!(sql, "\"age\" = $1");
        assert_eq!(params, vec![Value::Int(18)]);
    }

    #[test]
    fn suffix_selects_operator() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let expr = parse(schema, "age__ge", Value::Int(18)).unwrap();
        let (sql, _) = build(&expr);
        assert_eq!(sql, "\"age\" >= $1");

        // Alias spellings
        let expr = parse(schema, "age__gte", Value::Int(18)).unwrap();
        let (sql, _) = build(&expr);
        assert_eq!(sql, "\"age\" >= $1");
    }

    #[test]
    fn unknown_suffix_is_part_of_the_name() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let err = parse(schema, "age__wobble", Value::Int(1)).unwrap_err();
        match err {
            Error::UnknownFields { fields, .. } => {
                assert_eq!(fields, vec!["age__wobble".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn foreign_key_field_lowers_to_synthetic_column() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let expr = parse(schema, "school", Value::BigInt(3)).unwrap();
        let (sql, params) = build(&expr);
        assert_eq!(sql, "\"schools_id\" = $1");
        assert_eq!(params, vec![Value::BigInt(3)]);
    }

    #[test]
    fn in_requires_a_list() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let expr = parse(
            schema,
            "age__in",
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
        )
        .unwrap();
        let (sql, _) = build(&expr);
        assert_eq!(sql, "\"age\" IN ($1, $2)");

        let err = parse(schema, "age__in", Value::Int(1)).unwrap_err();
        assert!(matches!(err, Error::Clause { .. }));
    }

    #[test]
    fn between_needs_two_bounds() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let expr = parse(
            schema,
            "age__between",
            Value::Array(vec![Value::Int(18), Value::Int(30)]),
        )
        .unwrap();
        let (sql, params) = build(&expr);
        assert_eq!(sql, "\"age\" BETWEEN $1 AND $2");
        assert_eq!(params, vec![Value::Int(18), Value::Int(30)]);

        let err = parse(schema, "age__between", Value::Array(vec![Value::Int(18)])).unwrap_err();
        assert!(matches!(err, Error::Clause { .. }));
    }

    #[test]
    fn like_needs_text() {
        let registry = student_schema();
        let schema = registry.get("Student").unwrap();

        let err = parse(schema, "name__like", Value::Int(3)).unwrap_err();
        assert!(matches!(err, Error::Clause { .. }));

        let expr = parse(
            schema,
            "name__icontains",
            Value::Text("ann".to_string()),
        )
        .unwrap();
        let (sql, params) = build(&expr);
        assert_eq!(sql, "\"name\" ILIKE $1");
        assert_eq!(params, vec![Value::Text("%ann%".to_string())]);
    }
}
