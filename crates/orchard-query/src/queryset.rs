//! The QuerySet builder: accumulated filter/order/limit/offset/prefetch
//! state against one model, compiled and executed on demand.
//!
//! Chaining calls consume and return the builder; terminal calls execute.
//! After the predicate is assembled, the builder walks it for join
//! inference: any table referenced by a plain column operand of a top-level
//! conjunction or binary comparison is joined automatically. The walk does
//! not recurse into OR or parenthesized branches, so joins needed only
//! inside those must be expressed as kwarg filters on the base table
//! instead (documented limitation).

use crate::expr::{BinaryOp, Expr};
use crate::hydrate::{fetch_related_many, fetch_related_one};
use crate::kwargs;
use crate::try_res;
use asupersync::{Cx, Outcome};
use orchard_core::{
    Connection, DatabaseScope, Error, Model, Result, Row, Value, quote_ident, rows_into,
    try_outcome, validate_values,
};
use orchard_schema::{ModelSchema, SchemaRegistry};
use std::marker::PhantomData;

/// Sort direction for an ORDER BY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

impl OrderDir {
    pub const fn as_sql(self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }
}

/// Which relationship fields a fetch should hydrate.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Prefetch {
    /// No related objects are loaded
    #[default]
    None,
    /// Every relationship field is loaded
    All,
    /// Only relationships whose related table is listed
    Tables(Vec<String>),
}

impl Prefetch {
    /// Whether a relationship pointing at `table` is selected. Allowlist
    /// entries may name the related table, the related model, or the
    /// relationship field itself.
    pub fn selects(&self, table: &str, model: &str, field: &str) -> bool {
        match self {
            Prefetch::None => false,
            Prefetch::All => true,
            Prefetch::Tables(names) => names
                .iter()
                .any(|n| n == table || n == model || n == field),
        }
    }
}

/// A deferred query against one model.
pub struct QuerySet<'a, M: Model, C: Connection> {
    scope: &'a DatabaseScope<C>,
    registry: &'a SchemaRegistry,
    filter: Option<Expr>,
    order_by: Vec<(String, OrderDir)>,
    limit: Option<u64>,
    offset: Option<u64>,
    prefetch: Prefetch,
    _marker: PhantomData<M>,
}

impl<'a, M: Model, C: Connection> QuerySet<'a, M, C> {
    pub fn new(scope: &'a DatabaseScope<C>, registry: &'a SchemaRegistry) -> Self {
        Self {
            scope,
            registry,
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            prefetch: Prefetch::None,
            _marker: PhantomData,
        }
    }

    fn schema(&self) -> Result<&'a ModelSchema> {
        self.registry.get(M::MODEL_NAME)
    }

    // ==================== Chaining ====================

    /// AND an expression into the predicate.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// AND a `field__operator` keyword predicate into the predicate.
    pub fn filter_kw(self, name: &str, value: impl Into<Value>) -> Result<Self> {
        let expr = kwargs::parse(self.schema()?, name, value.into())?;
        Ok(self.filter(expr))
    }

    /// Filter a relationship field by a related instance: the synthetic
    /// foreign-key column is compared to the instance's target-key value.
    pub fn filter_related<R: Model>(self, field: &str, instance: &R) -> Result<Self> {
        let schema = self.schema()?;
        let descriptor = schema.field(field).ok_or_else(|| Error::UnknownFields {
            model: M::MODEL_NAME.to_string(),
            fields: vec![field.to_string()],
        })?;

        if let Some(fk) = descriptor.as_foreign_key() {
            let column = fk.column_name.clone().ok_or_else(|| Error::Clause {
                message: format!("relationship '{field}' is not resolved"),
            })?;
            let target = fk.target_column.unwrap_or("id");
            let key = related_key(instance, target)?;
            return Ok(self.filter(Expr::col(column).eq(key)));
        }

        if let Some(reverse) = descriptor.as_reverse() {
            // Compare our key column to the raw key the instance carries
            // for its paired foreign-key field.
            let paired = reverse.related_field_name.ok_or_else(|| Error::Clause {
                message: format!("relationship '{field}' is not resolved"),
            })?;
            let related = self.registry.get(reverse.related_model)?;
            let fk = related
                .field(paired)
                .and_then(|f| f.as_foreign_key())
                .ok_or_else(|| Error::Clause {
                    message: format!("'{paired}' is not a foreign key on '{}'", reverse.related_model),
                })?;
            let target = fk.target_column.unwrap_or("id");
            let key = instance
                .related_values()
                .require(R::MODEL_NAME, paired)?
                .clone();
            return Ok(self.filter(Expr::col(target).eq(key)));
        }

        Err(Error::Clause {
            message: format!("'{field}' cannot be compared to an instance"),
        })
    }

    /// Append an ORDER BY entry. Field names resolve at compile time.
    pub fn order_by(mut self, field: &str, dir: OrderDir) -> Self {
        self.order_by.push((field.to_string(), dir));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Select relationship fields to hydrate after the fetch. An empty
    /// table list selects every relationship field.
    pub fn prefetch_related(mut self, tables: &[&str]) -> Self {
        self.prefetch = if tables.is_empty() {
            Prefetch::All
        } else {
            Prefetch::Tables(tables.iter().map(|t| (*t).to_string()).collect())
        };
        self
    }

    // ==================== Compilation ====================

    /// Compile the accumulated state into SQL and parameters.
    pub fn build_select(&self) -> Result<(String, Vec<Value>)> {
        self.build_projection("*")
    }

    fn build_projection(&self, projection: &str) -> Result<(String, Vec<Value>)> {
        let schema = self.schema()?;
        let table = schema.table_name;
        let joins = self.inferred_joins(schema)?;

        let mut sql = String::from("SELECT ");
        if joins.is_empty() || projection != "*" {
            sql.push_str(projection);
        } else {
            sql.push_str(&format!("{}.*", quote_ident(table)));
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(table));
        for join in &joins {
            sql.push_str(join);
        }

        let mut params = Vec::new();
        if let Some(filter) = &self.filter {
            let where_sql = filter.build(&mut params, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.order_by.is_empty() {
            let mut entries = Vec::new();
            for (field, dir) in &self.order_by {
                if let Some(column) = schema.column_for(field) {
                    entries.push(format!("{} {}", quote_ident(column), dir.as_sql()));
                } else if field.contains('(') {
                    // Raw ordering expression, e.g. RANDOM()
                    entries.push(format!("{field} {}", dir.as_sql()));
                } else {
                    return Err(Error::UnknownFields {
                        model: M::MODEL_NAME.to_string(),
                        fields: vec![field.clone()],
                    });
                }
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&entries.join(", "));
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }

        Ok((sql, params))
    }

    /// Collect foreign tables referenced by the predicate and map each to
    /// a join clause through this model's relationships.
    fn inferred_joins(&self, schema: &ModelSchema) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        if let Some(filter) = &self.filter {
            collect_foreign_tables(filter, schema.table_name, &mut tables);
        }

        let mut joins = Vec::new();
        for table in tables {
            joins.extend(self.join_path(schema, &table)?);
        }
        Ok(joins)
    }

    fn join_path(&self, schema: &ModelSchema, table: &str) -> Result<Vec<String>> {
        let own_table = schema.table_name;

        for field in schema.relationship_fields() {
            let related = self.registry.get(field.related_model().unwrap_or_default())?;
            if related.table_name != table {
                continue;
            }

            if let Some(fk) = field.as_foreign_key() {
                let column = fk.column_name.as_deref().unwrap_or_default();
                let target = fk.target_column.unwrap_or("id");
                return Ok(vec![format!(
                    " INNER JOIN {} ON {}.{} = {}.{}",
                    quote_ident(table),
                    quote_ident(own_table),
                    quote_ident(column),
                    quote_ident(table),
                    quote_ident(target),
                )]);
            }

            if let Some(reverse) = field.as_reverse() {
                let paired = reverse.related_field_name.unwrap_or_default();
                let fk = related
                    .field(paired)
                    .and_then(|f| f.as_foreign_key())
                    .ok_or_else(|| Error::Clause {
                        message: format!("relationship '{}' is not resolved", field.name),
                    })?;
                let column = fk.column_name.as_deref().unwrap_or_default();
                let target = fk.target_column.unwrap_or("id");
                return Ok(vec![format!(
                    " INNER JOIN {} ON {}.{} = {}.{}",
                    quote_ident(table),
                    quote_ident(table),
                    quote_ident(column),
                    quote_ident(own_table),
                    quote_ident(target),
                )]);
            }

            if let Some(m2m) = field.as_many_to_many() {
                let junction = m2m.junction_table.clone().ok_or_else(|| Error::Clause {
                    message: format!("relationship '{}' is not materialized", field.name),
                })?;
                let own_key = m2m.join_key.unwrap_or("id");
                let own_column = m2m.junction_column.clone().unwrap_or_default();
                let their = related
                    .field(m2m.related_field_name.unwrap_or_default())
                    .and_then(|f| f.as_many_to_many())
                    .ok_or_else(|| Error::Clause {
                        message: format!("relationship '{}' is not resolved", field.name),
                    })?;
                let their_key = their.join_key.unwrap_or("id");
                let their_column = their.junction_column.clone().unwrap_or_default();
                return Ok(vec![
                    format!(
                        " INNER JOIN {} ON {}.{} = {}.{}",
                        quote_ident(&junction),
                        quote_ident(&junction),
                        quote_ident(&own_column),
                        quote_ident(own_table),
                        quote_ident(own_key),
                    ),
                    format!(
                        " INNER JOIN {} ON {}.{} = {}.{}",
                        quote_ident(table),
                        quote_ident(table),
                        quote_ident(their_key),
                        quote_ident(&junction),
                        quote_ident(&their_column),
                    ),
                ]);
            }
        }

        Err(Error::Clause {
            message: format!(
                "cannot infer a join from {own_table} to {table}; no relationship field targets it"
            ),
        })
    }

    // ==================== Terminal operations ====================

    /// Fetch all matching rows.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn all(self, cx: &Cx) -> Outcome<Vec<M>, Error> {
        let (sql, params) = try_res!(self.build_select());
        let rows = try_outcome!(self.scope.query(cx, &sql, &params).await);
        let mut models = try_res!(rows_into::<M>(rows));
        if self.prefetch != Prefetch::None {
            try_outcome!(
                fetch_related_many(cx, self.scope, self.registry, &mut models, &self.prefetch)
                    .await
            );
        }
        Outcome::Ok(models)
    }

    /// Fetch the first matching row, if any.
    pub async fn first(self, cx: &Cx) -> Outcome<Option<M>, Error> {
        let prefetch = self.prefetch.clone();
        let scope = self.scope;
        let registry = self.registry;
        let query = self.limit(1);
        let (sql, params) = try_res!(query.build_select());
        let row = try_outcome!(scope.query_one(cx, &sql, &params).await);
        match row {
            Some(row) => {
                let mut model = try_res!(M::from_row(&row));
                if prefetch != Prefetch::None {
                    try_outcome!(
                        fetch_related_one(cx, scope, registry, &mut model, &prefetch).await
                    );
                }
                Outcome::Ok(Some(model))
            }
            None => Outcome::Ok(None),
        }
    }

    /// Fetch exactly one matching row. Zero rows and several rows are both
    /// errors; the error for several reports how many matched.
    pub async fn get(self, cx: &Cx) -> Outcome<M, Error> {
        let prefetch = self.prefetch.clone();
        let scope = self.scope;
        let registry = self.registry;
        let (sql, params) = try_res!(self.build_select());
        let rows = try_outcome!(scope.query(cx, &sql, &params).await);
        match rows.len() {
            0 => Outcome::Err(Error::NoMatchingRow {
                model: M::MODEL_NAME.to_string(),
            }),
            1 => {
                let mut model = try_res!(M::from_row(&rows[0]));
                if prefetch != Prefetch::None {
                    try_outcome!(
                        fetch_related_one(cx, scope, registry, &mut model, &prefetch).await
                    );
                }
                Outcome::Ok(model)
            }
            found => Outcome::Err(Error::MultipleRows {
                model: M::MODEL_NAME.to_string(),
                found,
            }),
        }
    }

    /// Fetch one row in backend-native random order.
    pub async fn random_one(self, cx: &Cx) -> Outcome<Option<M>, Error> {
        let query = Self {
            order_by: vec![("RANDOM()".to_string(), OrderDir::Asc)],
            ..self
        };
        query.first(cx).await
    }

    /// Fetch one page. Page numbering starts at 1; non-positive arguments
    /// are rejected.
    pub async fn paginate(self, cx: &Cx, page: u64, page_size: u64) -> Outcome<Vec<M>, Error> {
        if page == 0 || page_size == 0 {
            return Outcome::Err(Error::Paginate { page, page_size });
        }
        self.limit(page_size).offset((page - 1) * page_size).all(cx).await
    }

    /// Count matching rows.
    pub async fn count(self, cx: &Cx) -> Outcome<u64, Error> {
        let query = Self {
            order_by: Vec::new(),
            limit: None,
            offset: None,
            ..self
        };
        let (sql, params) = try_res!(query.build_projection("COUNT(*) AS count"));
        let row = try_outcome!(query.scope.query_one(cx, &sql, &params).await);
        match row {
            Some(row) => match row.get_named::<i64>("count") {
                Ok(count) => Outcome::Ok(count.max(0) as u64),
                Err(e) => Outcome::Err(e),
            },
            None => Outcome::Ok(0),
        }
    }

    /// Whether any row matches.
    pub async fn exists(self, cx: &Cx) -> Outcome<bool, Error> {
        let query = Self {
            order_by: Vec::new(),
            offset: None,
            ..self
        }
        .limit(1);
        let (sql, params) = try_res!(query.build_projection("1"));
        let row = try_outcome!(query.scope.query_one(cx, &sql, &params).await);
        Outcome::Ok(row.is_some())
    }

    async fn aggregate(self, cx: &Cx, func: &str, field: &str) -> Outcome<Option<Value>, Error> {
        let schema = try_res!(self.schema());
        let column = match schema.column_for(field) {
            Some(column) => column.to_string(),
            None => {
                return Outcome::Err(Error::UnknownFields {
                    model: M::MODEL_NAME.to_string(),
                    fields: vec![field.to_string()],
                });
            }
        };
        let query = Self {
            order_by: Vec::new(),
            limit: None,
            offset: None,
            ..self
        };
        let projection = format!("{func}({}) AS agg", quote_ident(&column));
        let (sql, params) = try_res!(query.build_projection(&projection));
        let row = try_outcome!(query.scope.query_one(cx, &sql, &params).await);
        match row {
            Some(row) => match row.get_by_name("agg") {
                Some(Value::Null) | None => Outcome::Ok(None),
                Some(value) => Outcome::Ok(Some(value.clone())),
            },
            None => Outcome::Ok(None),
        }
    }

    /// MAX of a column over the matching rows, None when no rows match.
    pub async fn max_(self, cx: &Cx, field: &str) -> Outcome<Option<Value>, Error> {
        self.aggregate(cx, "MAX", field).await
    }

    /// MIN of a column over the matching rows.
    pub async fn min_(self, cx: &Cx, field: &str) -> Outcome<Option<Value>, Error> {
        self.aggregate(cx, "MIN", field).await
    }

    /// AVG of a column over the matching rows.
    pub async fn avg_(self, cx: &Cx, field: &str) -> Outcome<Option<Value>, Error> {
        self.aggregate(cx, "AVG", field).await
    }

    /// SUM of a column over the matching rows.
    pub async fn sum_(self, cx: &Cx, field: &str) -> Outcome<Option<Value>, Error> {
        self.aggregate(cx, "SUM", field).await
    }

    /// Bulk update: apply the accumulated predicate directly. Values are
    /// checked against the declared fields before any SQL is issued.
    #[tracing::instrument(level = "debug", skip(self, cx, changes))]
    pub async fn update(self, cx: &Cx, changes: &[(&str, Value)]) -> Outcome<u64, Error> {
        let schema = try_res!(self.schema());
        try_res!(validate_values(M::MODEL_NAME, &schema.fields, changes));

        let mut params: Vec<Value> = Vec::new();
        let mut assignments = Vec::new();
        for (field, value) in changes {
            let column = match schema.column_for(field) {
                Some(column) => column,
                None => {
                    return Outcome::Err(Error::UnknownFields {
                        model: M::MODEL_NAME.to_string(),
                        fields: vec![(*field).to_string()],
                    });
                }
            };
            params.push(value.clone());
            assignments.push(format!("{} = ${}", quote_ident(column), params.len()));
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_ident(schema.table_name),
            assignments.join(", ")
        );
        if let Some(filter) = &self.filter {
            let offset = params.len();
            let mut where_params = Vec::new();
            let where_sql = filter.build(&mut where_params, offset);
            params.extend(where_params);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        self.scope.execute(cx, &sql, &params).await
    }

    /// Bulk delete: apply the accumulated predicate directly.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn delete(self, cx: &Cx) -> Outcome<u64, Error> {
        let schema = try_res!(self.schema());
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_ident(schema.table_name));
        if let Some(filter) = &self.filter {
            let where_sql = filter.build(&mut params, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        self.scope.execute(cx, &sql, &params).await
    }

    // ==================== Projections ====================

    /// Project to per-row value tuples instead of model instances.
    pub fn values(self, fields: &[&str]) -> ValuesQuery<'a, M, C> {
        ValuesQuery {
            query: self,
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Project to per-row column maps. No fields means all columns.
    pub fn value_dict(self, fields: &[&str]) -> DictQuery<'a, M, C> {
        DictQuery {
            query: self,
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Project to the first non-null of the given columns per row.
    pub fn coalesce(self, fields: &[&str]) -> CoalesceQuery<'a, M, C> {
        CoalesceQuery {
            query: self,
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn resolve_columns(&self, fields: &[String]) -> Result<Vec<String>> {
        let schema = self.schema()?;
        let mut columns = Vec::new();
        let mut unknown = Vec::new();
        for field in fields {
            match schema.column_for(field) {
                Some(column) => columns.push(column.to_string()),
                None => unknown.push(field.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::UnknownFields {
                model: M::MODEL_NAME.to_string(),
                fields: unknown,
            });
        }
        Ok(columns)
    }

    async fn fetch_projected(self, cx: &Cx, projection: String) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = try_res!(self.build_projection(&projection));
        self.scope.query(cx, &sql, &params).await
    }
}

/// Tuple projection of a QuerySet.
pub struct ValuesQuery<'a, M: Model, C: Connection> {
    query: QuerySet<'a, M, C>,
    fields: Vec<String>,
}

impl<'a, M: Model, C: Connection> ValuesQuery<'a, M, C> {
    fn projection(&self) -> Result<String> {
        let columns = self.query.resolve_columns(&self.fields)?;
        Ok(columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "))
    }

    fn tuple(row: &Row) -> Vec<Value> {
        row.values().cloned().collect()
    }

    /// Fetch all rows as value tuples in the projected column order.
    pub async fn all(self, cx: &Cx) -> Outcome<Vec<Vec<Value>>, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        Outcome::Ok(rows.iter().map(Self::tuple).collect())
    }

    /// The first matching tuple, if any.
    pub async fn first(self, cx: &Cx) -> Outcome<Option<Vec<Value>>, Error> {
        let projection = try_res!(self.projection());
        let query = QuerySet {
            limit: Some(1),
            ..self.query
        };
        let rows = try_outcome!(query.fetch_projected(cx, projection).await);
        Outcome::Ok(rows.first().map(Self::tuple))
    }

    /// Exactly one matching tuple. Zero rows and several rows are both
    /// errors.
    pub async fn get(self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        match rows.len() {
            0 => Outcome::Err(Error::NoMatchingRow {
                model: M::MODEL_NAME.to_string(),
            }),
            1 => Outcome::Ok(Self::tuple(&rows[0])),
            found => Outcome::Err(Error::MultipleRows {
                model: M::MODEL_NAME.to_string(),
                found,
            }),
        }
    }

    /// One page of tuples; both arguments must be at least 1.
    pub async fn paginate(
        self,
        cx: &Cx,
        page: u64,
        page_size: u64,
    ) -> Outcome<Vec<Vec<Value>>, Error> {
        if page == 0 || page_size == 0 {
            return Outcome::Err(Error::Paginate { page, page_size });
        }
        let Self { query, fields } = self;
        ValuesQuery {
            query: query.limit(page_size).offset((page - 1) * page_size),
            fields,
        }
        .all(cx)
        .await
    }

    /// Fetch all rows as bare scalars; the projection must be exactly one
    /// column.
    pub async fn all_flat(self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        if self.fields.len() != 1 {
            return Outcome::Err(Error::Clause {
                message: format!(
                    "flattened values need exactly one column, got {}",
                    self.fields.len()
                ),
            });
        }
        let rows = try_outcome!(self.all(cx).await);
        Outcome::Ok(
            rows.into_iter()
                .filter_map(|mut tuple| (!tuple.is_empty()).then(|| tuple.remove(0)))
                .collect(),
        )
    }
}

/// Map projection of a QuerySet.
pub struct DictQuery<'a, M: Model, C: Connection> {
    query: QuerySet<'a, M, C>,
    fields: Vec<String>,
}

impl<'a, M: Model, C: Connection> DictQuery<'a, M, C> {
    fn projection(&self) -> Result<String> {
        if self.fields.is_empty() {
            return Ok("*".to_string());
        }
        let columns = self.query.resolve_columns(&self.fields)?;
        Ok(columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "))
    }

    /// Fetch all rows as column-name maps.
    pub async fn all(
        self,
        cx: &Cx,
    ) -> Outcome<Vec<std::collections::HashMap<String, Value>>, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        Outcome::Ok(rows.iter().map(Row::to_map).collect())
    }

    /// The first matching map, if any.
    pub async fn first(
        self,
        cx: &Cx,
    ) -> Outcome<Option<std::collections::HashMap<String, Value>>, Error> {
        let projection = try_res!(self.projection());
        let query = QuerySet {
            limit: Some(1),
            ..self.query
        };
        let rows = try_outcome!(query.fetch_projected(cx, projection).await);
        Outcome::Ok(rows.first().map(Row::to_map))
    }

    /// Exactly one matching map. Zero rows and several rows are both
    /// errors.
    pub async fn get(self, cx: &Cx) -> Outcome<std::collections::HashMap<String, Value>, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        match rows.len() {
            0 => Outcome::Err(Error::NoMatchingRow {
                model: M::MODEL_NAME.to_string(),
            }),
            1 => Outcome::Ok(rows[0].to_map()),
            found => Outcome::Err(Error::MultipleRows {
                model: M::MODEL_NAME.to_string(),
                found,
            }),
        }
    }

    /// One page of maps; both arguments must be at least 1.
    pub async fn paginate(
        self,
        cx: &Cx,
        page: u64,
        page_size: u64,
    ) -> Outcome<Vec<std::collections::HashMap<String, Value>>, Error> {
        if page == 0 || page_size == 0 {
            return Outcome::Err(Error::Paginate { page, page_size });
        }
        let Self { query, fields } = self;
        DictQuery {
            query: query.limit(page_size).offset((page - 1) * page_size),
            fields,
        }
        .all(cx)
        .await
    }
}

/// COALESCE projection of a QuerySet.
pub struct CoalesceQuery<'a, M: Model, C: Connection> {
    query: QuerySet<'a, M, C>,
    fields: Vec<String>,
}

impl<M: Model, C: Connection> CoalesceQuery<'_, M, C> {
    fn projection(&self) -> Result<String> {
        let columns = self.query.resolve_columns(&self.fields)?;
        if columns.is_empty() {
            return Err(Error::Clause {
                message: "coalesce needs at least one column".to_string(),
            });
        }
        let args = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("COALESCE({args}) AS coalesced"))
    }

    /// The first non-null value per row, for all matching rows.
    pub async fn all(self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        Outcome::Ok(
            rows.iter()
                .map(|row| row.get_by_name("coalesced").cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// The first non-null value of the first matching row.
    pub async fn first(self, cx: &Cx) -> Outcome<Option<Value>, Error> {
        let projection = try_res!(self.projection());
        let query = QuerySet {
            limit: Some(1),
            ..self.query
        };
        let rows = try_outcome!(query.fetch_projected(cx, projection).await);
        Outcome::Ok(
            rows.first()
                .and_then(|row| row.get_by_name("coalesced").cloned()),
        )
    }

    /// The first non-null value of exactly one matching row. Zero rows and
    /// several rows are both errors.
    pub async fn get(self, cx: &Cx) -> Outcome<Value, Error> {
        let projection = try_res!(self.projection());
        let rows = try_outcome!(self.query.fetch_projected(cx, projection).await);
        match rows.len() {
            0 => Outcome::Err(Error::NoMatchingRow {
                model: M::MODEL_NAME.to_string(),
            }),
            1 => Outcome::Ok(
                rows[0]
                    .get_by_name("coalesced")
                    .cloned()
                    .unwrap_or(Value::Null),
            ),
            found => Outcome::Err(Error::MultipleRows {
                model: M::MODEL_NAME.to_string(),
                found,
            }),
        }
    }

    /// One page of coalesced values; both arguments must be at least 1.
    pub async fn paginate(
        self,
        cx: &Cx,
        page: u64,
        page_size: u64,
    ) -> Outcome<Vec<Value>, Error> {
        if page == 0 || page_size == 0 {
            return Outcome::Err(Error::Paginate { page, page_size });
        }
        let Self { query, fields } = self;
        CoalesceQuery {
            query: query.limit(page_size).offset((page - 1) * page_size),
            fields,
        }
        .all(cx)
        .await
    }
}

/// The join-inference walk: top-level AND chains and binary comparisons
/// only. Column operands qualified with a table other than `own` are
/// collected; OR and parenthesized branches are deliberately skipped.
fn collect_foreign_tables(expr: &Expr, own: &str, out: &mut Vec<String>) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            collect_foreign_tables(left, own, out);
            collect_foreign_tables(right, own, out);
        }
        Expr::Binary { left, op, right } if op.is_comparison() => {
            note_column_table(left, own, out);
            note_column_table(right, own, out);
        }
        Expr::In { expr, .. } | Expr::Between { expr, .. } | Expr::IsNull { expr, .. } => {
            note_column_table(expr, own, out);
        }
        Expr::Like { expr, .. } => note_column_table(expr, own, out),
        Expr::IsDistinctFrom { left, right, .. } => {
            note_column_table(left, own, out);
            note_column_table(right, own, out);
        }
        _ => {}
    }
}

fn note_column_table(expr: &Expr, own: &str, out: &mut Vec<String>) {
    if let Expr::Column {
        table: Some(table), ..
    } = expr
        && table != own
        && !out.iter().any(|t| t == table)
    {
        out.push(table.clone());
    }
}

fn related_key<R: Model>(instance: &R, target: &str) -> Result<Value> {
    let row = instance.to_row()?;
    row.into_iter()
        .find(|(name, _)| *name == target)
        .map(|(_, value)| value)
        .filter(|value| !value.is_null())
        .ok_or_else(|| Error::MissingPrimaryKey {
            model: R::MODEL_NAME.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, Scripted, fixture_registry};
    use asupersync::runtime::RuntimeBuilder;
    use orchard_core::Row;
    use orchard_schema::testing::{School, Student};

    fn student_row(id: i64, name: &str, age: i32, school: i64) -> Row {
        Row::new(
            vec![
                "id".to_string(),
                "name".to_string(),
                "age".to_string(),
                "schools_id".to_string(),
            ],
            vec![
                Value::BigInt(id),
                Value::Text(name.to_string()),
                Value::Int(age),
                Value::BigInt(school),
            ],
        )
    }

    #[test]
    fn test_select_compiles_filters_order_and_paging() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let query = QuerySet::<Student, _>::new(&scope, &registry)
            .filter_kw("age__gte", Value::Int(18))
            .expect("known field")
            .order_by("name", OrderDir::Asc)
            .limit(5)
            .offset(2);
        let (sql, params) = query.build_select().expect("compiles");
        assert_eq!(
            sql,
            "SELECT * FROM \"students\" WHERE \"age\" >= $1 ORDER BY \"name\" ASC LIMIT 5 OFFSET 2"
        );
        assert_eq!(params, vec![Value::Int(18)]);
    }

    #[test]
    fn test_foreign_table_predicate_infers_join() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let query = QuerySet::<Student, _>::new(&scope, &registry)
            .filter(Expr::qualified("schools", "name").eq("Hogwarts"));
        let (sql, params) = query.build_select().expect("compiles");
        assert_eq!(
            sql,
            "SELECT \"students\".* FROM \"students\" \
             INNER JOIN \"schools\" ON \"students\".\"schools_id\" = \"schools\".\"id\" \
             WHERE \"schools\".\"name\" = $1"
        );
        assert_eq!(params, vec![Value::Text("Hogwarts".to_string())]);
    }

    #[test]
    fn test_junction_tables_join_in_pairs() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let query = QuerySet::<orchard_schema::testing::Post, _>::new(&scope, &registry)
            .filter(Expr::qualified("tags", "name").eq("rust"));
        let (sql, _) = query.build_select().expect("compiles");
        assert_eq!(
            sql,
            "SELECT \"posts\".* FROM \"posts\" \
             INNER JOIN \"posts_and_tags\" ON \"posts_and_tags\".\"posts_id\" = \"posts\".\"id\" \
             INNER JOIN \"tags\" ON \"tags\".\"id\" = \"posts_and_tags\".\"tags_id\" \
             WHERE \"tags\".\"name\" = $1"
        );
    }

    #[test]
    fn test_unknown_join_target_is_rejected() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let query = QuerySet::<Student, _>::new(&scope, &registry)
            .filter(Expr::qualified("tags", "name").eq("rust"));
        match query.build_select() {
            Err(Error::Clause { message }) => assert!(message.contains("cannot infer")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_get_distinguishes_zero_one_and_many() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();

            let conn = MockConnection::new();
            conn.script_rows(Vec::new());
            let scope = DatabaseScope::new(conn);
            let missing = QuerySet::<Student, _>::new(&scope, &registry).get(&cx).await;
            assert!(matches!(
                missing,
                Outcome::Err(Error::NoMatchingRow { model }) if model == "Student"
            ));

            let conn = MockConnection::new();
            conn.script_rows(vec![
                student_row(1, "student 1", 18, 1),
                student_row(2, "student 2", 19, 1),
            ]);
            let scope = DatabaseScope::new(conn);
            let several = QuerySet::<Student, _>::new(&scope, &registry).get(&cx).await;
            assert!(matches!(
                several,
                Outcome::Err(Error::MultipleRows { found: 2, .. })
            ));

            let conn = MockConnection::new();
            conn.script_rows(vec![student_row(1, "student 1", 18, 1)]);
            let scope = DatabaseScope::new(conn);
            let one = QuerySet::<Student, _>::new(&scope, &registry).get(&cx).await;
            match one {
                Outcome::Ok(student) => assert_eq!(student.name, "student 1"),
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }

    #[test]
    fn test_count_strips_ordering_and_paging() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec!["count".to_string()],
                vec![Value::BigInt(3)],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let counted = QuerySet::<Student, _>::new(&scope, &registry)
                .order_by("name", OrderDir::Desc)
                .limit(1)
                .count(&cx)
                .await;
            assert!(matches!(counted, Outcome::Ok(3)));
            let statements = crate::testing::statements(&log);
            assert_eq!(
                statements[0].0,
                "SELECT COUNT(*) AS count FROM \"students\""
            );
        });
    }

    #[test]
    fn test_paginate_rejects_non_positive_arguments() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let scope = DatabaseScope::new(MockConnection::new());

            let zero_page = QuerySet::<Student, _>::new(&scope, &registry)
                .paginate(&cx, 0, 10)
                .await;
            assert!(matches!(
                zero_page,
                Outcome::Err(Error::Paginate { page: 0, page_size: 10 })
            ));

            let zero_size = QuerySet::<Student, _>::new(&scope, &registry)
                .paginate(&cx, 1, 0)
                .await;
            assert!(matches!(
                zero_size,
                Outcome::Err(Error::Paginate { page: 1, page_size: 0 })
            ));

            let conn = MockConnection::new();
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let page = QuerySet::<Student, _>::new(&scope, &registry)
                .paginate(&cx, 2, 3)
                .await;
            assert!(matches!(page, Outcome::Ok(rows) if rows.is_empty()));
            let statements = crate::testing::statements(&log);
            assert_eq!(
                statements[0].0,
                "SELECT * FROM \"students\" LIMIT 3 OFFSET 3"
            );
        });
    }

    #[test]
    fn test_bulk_update_compiles_assignments_before_predicate() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script(Scripted::Affected(2));
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let affected = QuerySet::<Student, _>::new(&scope, &registry)
                .filter_kw("age__lt", Value::Int(18))
                .expect("known field")
                .update(&cx, &[("name", Value::Text("anon".to_string()))])
                .await;
            assert!(matches!(affected, Outcome::Ok(2)));
            let statements = crate::testing::statements(&log);
            assert_eq!(
                statements[0].0,
                "UPDATE \"students\" SET \"name\" = $1 WHERE \"age\" < $2"
            );
            assert_eq!(
                statements[0].1,
                vec![Value::Text("anon".to_string()), Value::Int(18)]
            );
        });
    }

    #[test]
    fn test_bulk_update_rejects_unknown_fields() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let outcome = QuerySet::<Student, _>::new(&scope, &registry)
                .update(&cx, &[("height", Value::Int(180))])
                .await;
            assert!(matches!(
                outcome,
                Outcome::Err(Error::UnknownFields { fields, .. }) if fields == ["height"]
            ));
            assert!(crate::testing::statements(&log).is_empty());
        });
    }

    #[test]
    fn test_values_projection_flattens_single_column() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![
                Row::new(vec!["name".to_string()], vec![Value::Text("a".to_string())]),
                Row::new(vec!["name".to_string()], vec![Value::Text("b".to_string())]),
            ]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let names = QuerySet::<Student, _>::new(&scope, &registry)
                .values(&["name"])
                .all_flat(&cx)
                .await;
            match names {
                Outcome::Ok(values) => assert_eq!(
                    values,
                    vec![
                        Value::Text("a".to_string()),
                        Value::Text("b".to_string()),
                    ]
                ),
                other => panic!("unexpected outcome: {other:?}"),
            }
            let statements = crate::testing::statements(&log);
            assert_eq!(statements[0].0, "SELECT \"name\" FROM \"students\"");
        });
    }

    #[test]
    fn test_coalesce_projection_aliases_result() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let projection = QuerySet::<Student, _>::new(&scope, &registry)
            .coalesce(&["name", "age"])
            .projection()
            .expect("compiles");
        assert_eq!(projection, "COALESCE(\"name\", \"age\") AS coalesced");
    }

    #[test]
    fn test_values_first_limits_to_one_row() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec!["name".to_string()],
                vec![Value::Text("a".to_string())],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let first = QuerySet::<Student, _>::new(&scope, &registry)
                .values(&["name"])
                .first(&cx)
                .await;
            match first {
                Outcome::Ok(tuple) => {
                    assert_eq!(tuple, Some(vec![Value::Text("a".to_string())]));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            let statements = crate::testing::statements(&log);
            assert_eq!(statements[0].0, "SELECT \"name\" FROM \"students\" LIMIT 1");
        });
    }

    #[test]
    fn test_projection_get_distinguishes_zero_one_and_many() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(Vec::new());
            conn.script_rows(vec![Row::new(
                vec!["coalesced".to_string()],
                vec![Value::Int(30)],
            )]);
            conn.script_rows(vec![
                Row::new(vec!["age".to_string()], vec![Value::Int(1)]),
                Row::new(vec!["age".to_string()], vec![Value::Int(2)]),
            ]);
            let scope = DatabaseScope::new(conn);

            let missing = QuerySet::<Student, _>::new(&scope, &registry)
                .coalesce(&["age"])
                .get(&cx)
                .await;
            match missing {
                Outcome::Err(Error::NoMatchingRow { model }) => assert_eq!(model, "Student"),
                other => panic!("unexpected outcome: {other:?}"),
            }

            let single = QuerySet::<Student, _>::new(&scope, &registry)
                .coalesce(&["age"])
                .get(&cx)
                .await;
            match single {
                Outcome::Ok(value) => assert_eq!(value, Value::Int(30)),
                other => panic!("unexpected outcome: {other:?}"),
            }

            let several = QuerySet::<Student, _>::new(&scope, &registry)
                .values(&["age"])
                .get(&cx)
                .await;
            match several {
                Outcome::Err(Error::MultipleRows { model, found }) => {
                    assert_eq!(model, "Student");
                    assert_eq!(found, 2);
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }

    #[test]
    fn test_projection_paginate_windows_and_validates() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec!["name".to_string(), "age".to_string()],
                vec![Value::Text("d".to_string()), Value::Int(19)],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);

            let page = QuerySet::<Student, _>::new(&scope, &registry)
                .value_dict(&["name", "age"])
                .paginate(&cx, 2, 3)
                .await;
            match page {
                Outcome::Ok(maps) => assert_eq!(maps.len(), 1),
                other => panic!("unexpected outcome: {other:?}"),
            }
            let statements = crate::testing::statements(&log);
            assert_eq!(
                statements[0].0,
                "SELECT \"name\", \"age\" FROM \"students\" LIMIT 3 OFFSET 3"
            );

            let bad = QuerySet::<Student, _>::new(&scope, &registry)
                .values(&["name"])
                .paginate(&cx, 0, 5)
                .await;
            match bad {
                Outcome::Err(Error::Paginate { page, page_size }) => {
                    assert_eq!((page, page_size), (0, 5));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }

    #[test]
    fn test_value_dict_projects_named_columns_as_maps() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![Row::new(
                vec!["name".to_string(), "age".to_string()],
                vec![Value::Text("a".to_string()), Value::Int(17)],
            )]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let maps = QuerySet::<Student, _>::new(&scope, &registry)
                .value_dict(&["name", "age"])
                .all(&cx)
                .await;
            match maps {
                Outcome::Ok(maps) => {
                    assert_eq!(maps.len(), 1);
                    assert_eq!(maps[0].get("name"), Some(&Value::Text("a".to_string())));
                    assert_eq!(maps[0].get("age"), Some(&Value::Int(17)));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            let statements = crate::testing::statements(&log);
            assert_eq!(statements[0].0, "SELECT \"name\", \"age\" FROM \"students\"");
        });
    }

    #[test]
    fn test_value_dict_defaults_to_all_columns() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async move {
            let registry = fixture_registry();
            let conn = MockConnection::new();
            conn.script_rows(vec![student_row(1, "a", 17, 3)]);
            let log = conn.log_handle();
            let scope = DatabaseScope::new(conn);
            let maps = QuerySet::<Student, _>::new(&scope, &registry)
                .value_dict(&[])
                .all(&cx)
                .await;
            match maps {
                Outcome::Ok(maps) => {
                    assert_eq!(maps[0].get("schools_id"), Some(&Value::BigInt(3)));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            let statements = crate::testing::statements(&log);
            assert_eq!(statements[0].0, "SELECT * FROM \"students\"");
        });
    }

    #[test]
    fn test_filter_by_related_instance_uses_synthetic_column() {
        let registry = fixture_registry();
        let scope = DatabaseScope::new(MockConnection::new());
        let school = School {
            id: Some(7),
            name: "Hogwarts".to_string(),
            ..School::default()
        };
        let query = QuerySet::<Student, _>::new(&scope, &registry)
            .filter_related("school", &school)
            .expect("resolved relationship");
        let (sql, params) = query.build_select().expect("compiles");
        assert_eq!(sql, "SELECT * FROM \"students\" WHERE \"schools_id\" = $1");
        assert_eq!(params, vec![Value::BigInt(7)]);
    }
}
