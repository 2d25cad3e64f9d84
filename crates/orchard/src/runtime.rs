//! Per-instance persistence: insert, update, save, fetch, delete, the
//! batched variants, and many-to-many link management.
//!
//! Single-statement operations run directly on the shared scope.
//! Multi-statement operations (`insert_many`, `save_many`,
//! `update_or_create`) acquire the scope first so they commit or roll back
//! as one transaction.

use crate::database::Database;
use crate::try_res;
use asupersync::{Cx, Outcome};
use orchard_core::{
    Connection, Error, FieldDescriptor, Model, Result, Row, Value, quote_ident, try_outcome,
    validate_values,
};
use orchard_query::{Prefetch, fetch_related_one};
use orchard_schema::ModelSchema;

impl<C: Connection> Database<C> {
    /// Insert one instance. A backend-generated primary key is written back
    /// into the instance.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME))]
    pub async fn insert<M: Model>(&self, cx: &Cx, model: &mut M) -> Outcome<(), Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, autoincrement) = try_res!(pk_spec(schema));
        let pairs = try_res!(model.to_row());
        try_res!(validate_scalars(schema, &pairs));

        let generate = autoincrement && !model.has_primary_key();
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (name, value) in pairs {
            if generate && name == pk_column {
                continue;
            }
            columns.push(quote_ident(name));
            params.push(value);
        }
        let placeholders = (1..=params.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(schema.table_name),
            columns.join(", "),
        );
        let key = try_outcome!(self.scope.insert(cx, &sql, &params).await);
        if generate {
            model.set_primary_key(Value::BigInt(key));
        }
        Outcome::Ok(())
    }

    /// Update one instance by primary key. The key must be present.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME))]
    pub async fn update<M: Model>(&self, cx: &Cx, model: &M) -> Outcome<u64, Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, _) = try_res!(pk_spec(schema));
        if !model.has_primary_key() {
            return Outcome::Err(Error::MissingPrimaryKey {
                model: M::MODEL_NAME.to_string(),
            });
        }
        let pairs = try_res!(model.to_row());
        try_res!(validate_scalars(schema, &pairs));

        let mut params = Vec::new();
        let mut assignments = Vec::new();
        let mut key = Value::Null;
        for (name, value) in pairs {
            if name == pk_column {
                key = value;
                continue;
            }
            params.push(value);
            assignments.push(format!("{} = ${}", quote_ident(name), params.len()));
        }
        if assignments.is_empty() {
            return Outcome::Ok(0);
        }
        params.push(key);
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            quote_ident(schema.table_name),
            assignments.join(", "),
            quote_ident(pk_column),
            params.len(),
        );
        self.scope.execute(cx, &sql, &params).await
    }

    /// Update when a row with this key exists, insert otherwise.
    pub async fn save<M: Model>(&self, cx: &Cx, model: &mut M) -> Outcome<(), Error> {
        if model.has_primary_key() {
            let schema = try_res!(self.registry.get(M::MODEL_NAME));
            let (pk_column, _) = try_res!(pk_spec(schema));
            let sql = format!(
                "SELECT 1 FROM {} WHERE {} = $1 LIMIT 1",
                quote_ident(schema.table_name),
                quote_ident(pk_column),
            );
            let key = model.primary_key_value().into_iter().next().unwrap_or(Value::Null);
            let existing = try_outcome!(self.scope.query_one(cx, &sql, &[key]).await);
            if existing.is_some() {
                try_outcome!(self.update(cx, model).await);
                return Outcome::Ok(());
            }
        }
        self.insert(cx, model).await
    }

    /// Reload the instance's columns by primary key.
    pub async fn fetch<M: Model>(&self, cx: &Cx, model: &mut M) -> Outcome<(), Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, _) = try_res!(pk_spec(schema));
        if !model.has_primary_key() {
            return Outcome::Err(Error::MissingPrimaryKey {
                model: M::MODEL_NAME.to_string(),
            });
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            quote_ident(schema.table_name),
            quote_ident(pk_column),
        );
        let key = model.primary_key_value().into_iter().next().unwrap_or(Value::Null);
        let row = try_outcome!(self.scope.query_one(cx, &sql, &[key]).await);
        match row {
            Some(row) => {
                *model = try_res!(M::from_row(&row));
                Outcome::Ok(())
            }
            None => Outcome::Err(Error::NoMatchingRow {
                model: M::MODEL_NAME.to_string(),
            }),
        }
    }

    /// Load related objects onto a fetched instance. An empty allowlist
    /// loads every relationship field; entries may name tables, models, or
    /// relationship fields.
    pub async fn fetch_related<M: Model>(
        &self,
        cx: &Cx,
        model: &mut M,
        names: &[&str],
    ) -> Outcome<(), Error> {
        let prefetch = if names.is_empty() {
            Prefetch::All
        } else {
            Prefetch::Tables(names.iter().map(|n| (*n).to_string()).collect())
        };
        fetch_related_one(cx, &self.scope, &self.registry, model, &prefetch).await
    }

    /// Delete one instance by primary key.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME))]
    pub async fn delete<M: Model>(&self, cx: &Cx, model: &M) -> Outcome<u64, Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, _) = try_res!(pk_spec(schema));
        if !model.has_primary_key() {
            return Outcome::Err(Error::MissingPrimaryKey {
                model: M::MODEL_NAME.to_string(),
            });
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(schema.table_name),
            quote_ident(pk_column),
        );
        let key = model.primary_key_value().into_iter().next().unwrap_or(Value::Null);
        self.scope.execute(cx, &sql, &[key]).await
    }

    /// Insert a batch inside one transaction. When no row needs a
    /// generated key the rows go through the connection's batch path in a
    /// single statement; otherwise they are inserted one by one so each
    /// generated key can be written back.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME, batch = models.len()))]
    pub async fn insert_many<M: Model>(&self, cx: &Cx, models: &mut [M]) -> Outcome<u64, Error> {
        if models.is_empty() {
            return Outcome::Err(Error::EmptyBatch {
                operation: "insert_many",
            });
        }
        try_outcome!(self.scope.acquire(cx).await);
        let result = self.insert_many_inner(cx, models).await;
        let ok = matches!(result, Outcome::Ok(_));
        try_outcome!(self.scope.release(cx, ok).await);
        result
    }

    async fn insert_many_inner<M: Model>(&self, cx: &Cx, models: &mut [M]) -> Outcome<u64, Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (_, autoincrement) = try_res!(pk_spec(schema));
        let generate = autoincrement && models.iter().any(|m| !m.has_primary_key());
        if generate {
            for model in models.iter_mut() {
                try_outcome!(self.insert(cx, model).await);
            }
            return Outcome::Ok(models.len() as u64);
        }

        // Fixed key-order batch; every row yields the same columns.
        let first = try_res!(models[0].to_row());
        let columns: Vec<&'static str> = first.iter().map(|(name, _)| *name).collect();
        let mut param_rows = Vec::with_capacity(models.len());
        for model in models.iter() {
            let pairs = try_res!(model.to_row());
            try_res!(validate_scalars(schema, &pairs));
            let mut row = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = pairs
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null);
                row.push(value);
            }
            param_rows.push(row);
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(schema.table_name),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        self.scope.batch(cx, &sql, &param_rows).await
    }

    /// Save a batch inside one transaction.
    pub async fn save_many<M: Model>(&self, cx: &Cx, models: &mut [M]) -> Outcome<(), Error> {
        if models.is_empty() {
            return Outcome::Err(Error::EmptyBatch {
                operation: "save_many",
            });
        }
        try_outcome!(self.scope.acquire(cx).await);
        let mut result = Outcome::Ok(());
        for model in models.iter_mut() {
            match self.save(cx, model).await {
                Outcome::Ok(()) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        let ok = matches!(result, Outcome::Ok(()));
        try_outcome!(self.scope.release(cx, ok).await);
        result
    }

    /// Delete a batch by primary key in one statement.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::MODEL_NAME, batch = models.len()))]
    pub async fn delete_many<M: Model>(&self, cx: &Cx, models: &[M]) -> Outcome<u64, Error> {
        if models.is_empty() {
            return Outcome::Err(Error::EmptyBatch {
                operation: "delete_many",
            });
        }
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, _) = try_res!(pk_spec(schema));
        let mut param_rows = Vec::with_capacity(models.len());
        for model in models {
            if !model.has_primary_key() {
                return Outcome::Err(Error::MissingPrimaryKey {
                    model: M::MODEL_NAME.to_string(),
                });
            }
            let key = model.primary_key_value().into_iter().next().unwrap_or(Value::Null);
            param_rows.push(vec![key]);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(schema.table_name),
            quote_ident(pk_column),
        );
        self.scope.batch(cx, &sql, &param_rows).await
    }

    /// `get`, with the no-match case folded to `None`.
    pub async fn get_or_none<M: Model>(
        &self,
        cx: &Cx,
        filters: &[(&str, Value)],
    ) -> Outcome<Option<M>, Error> {
        let mut query = self.query::<M>();
        for (name, value) in filters {
            query = try_res!(query.filter_kw(name, value.clone()));
        }
        match query.get(cx).await {
            Outcome::Ok(model) => Outcome::Ok(Some(model)),
            Outcome::Err(Error::NoMatchingRow { .. }) => Outcome::Ok(None),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Fetch the instance matching `filters`, inserting one built from
    /// `filters` plus `defaults` when none exists. Returns the instance and
    /// whether it was created.
    pub async fn get_or_create<M: Model>(
        &self,
        cx: &Cx,
        filters: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Outcome<(M, bool), Error> {
        if let Some(found) = try_outcome!(self.get_or_none::<M>(cx, filters).await) {
            return Outcome::Ok((found, false));
        }
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let mut model: M = try_res!(synthesize(schema, &[filters, defaults]));
        try_outcome!(self.insert(cx, &mut model).await);
        Outcome::Ok((model, true))
    }

    /// Like [`get_or_create`](Self::get_or_create), but an existing match
    /// is updated with `defaults` and reloaded.
    pub async fn update_or_create<M: Model>(
        &self,
        cx: &Cx,
        filters: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Outcome<(M, bool), Error> {
        match try_outcome!(self.get_or_none::<M>(cx, filters).await) {
            Some(mut found) => {
                if !defaults.is_empty() {
                    try_outcome!(self.scope.acquire(cx).await);
                    let result = self.apply_defaults(cx, &mut found, defaults).await;
                    let ok = matches!(result, Outcome::Ok(()));
                    try_outcome!(self.scope.release(cx, ok).await);
                    try_outcome!(result);
                }
                Outcome::Ok((found, false))
            }
            None => {
                let schema = try_res!(self.registry.get(M::MODEL_NAME));
                let mut model: M = try_res!(synthesize(schema, &[filters, defaults]));
                try_outcome!(self.insert(cx, &mut model).await);
                Outcome::Ok((model, true))
            }
        }
    }

    async fn apply_defaults<M: Model>(
        &self,
        cx: &Cx,
        model: &mut M,
        defaults: &[(&str, Value)],
    ) -> Outcome<(), Error> {
        let schema = try_res!(self.registry.get(M::MODEL_NAME));
        let (pk_column, _) = try_res!(pk_spec(schema));
        let key = model.primary_key_value().into_iter().next().unwrap_or(Value::Null);
        let touched = try_outcome!(
            self.query::<M>()
                .filter(orchard_query::Expr::col(pk_column).eq(key))
                .update(cx, defaults)
                .await
        );
        tracing::debug!(model = M::MODEL_NAME, touched, "applied defaults");
        self.fetch(cx, model).await
    }

    /// Insert a junction row linking `owner` to `related` through a
    /// many-to-many field.
    pub async fn link<M: Model, R: Model>(
        &self,
        cx: &Cx,
        owner: &M,
        field: &str,
        related: &R,
    ) -> Outcome<(), Error> {
        let (sql, params) = try_res!(self.junction_statement::<M, R>(field, owner, related, true));
        try_outcome!(self.scope.execute(cx, &sql, &params).await);
        Outcome::Ok(())
    }

    /// Delete the junction row linking `owner` to `related`.
    pub async fn unlink<M: Model, R: Model>(
        &self,
        cx: &Cx,
        owner: &M,
        field: &str,
        related: &R,
    ) -> Outcome<(), Error> {
        let (sql, params) = try_res!(self.junction_statement::<M, R>(field, owner, related, false));
        try_outcome!(self.scope.execute(cx, &sql, &params).await);
        Outcome::Ok(())
    }

    fn junction_statement<M: Model, R: Model>(
        &self,
        field: &str,
        owner: &M,
        related: &R,
        insert: bool,
    ) -> Result<(String, Vec<Value>)> {
        let schema = self.registry.get(M::MODEL_NAME)?;
        let descriptor = schema.field(field).ok_or_else(|| Error::UnknownFields {
            model: M::MODEL_NAME.to_string(),
            fields: vec![field.to_string()],
        })?;
        let m2m = descriptor.as_many_to_many().ok_or_else(|| Error::Clause {
            message: format!("'{field}' is not a many-to-many field"),
        })?;
        let unresolved = || Error::Clause {
            message: format!("relationship '{field}' is not materialized"),
        };
        let junction = m2m.junction_table.clone().ok_or_else(unresolved)?;
        let own_column = m2m.junction_column.clone().ok_or_else(unresolved)?;
        let own_key = m2m.join_key.ok_or_else(unresolved)?;
        let related_schema = self.registry.get(m2m.related_model)?;
        let their = related_schema
            .field(m2m.related_field_name.ok_or_else(unresolved)?)
            .and_then(FieldDescriptor::as_many_to_many)
            .ok_or_else(unresolved)?;
        let their_column = their.junction_column.clone().ok_or_else(unresolved)?;
        let their_key = their.join_key.ok_or_else(unresolved)?;

        let own_value = row_value(owner, own_key)?.ok_or_else(|| Error::MissingPrimaryKey {
            model: M::MODEL_NAME.to_string(),
        })?;
        let their_value = row_value(related, their_key)?.ok_or_else(|| Error::MissingPrimaryKey {
            model: R::MODEL_NAME.to_string(),
        })?;

        let sql = if insert {
            format!(
                "INSERT INTO {} ({}, {}) VALUES ($1, $2)",
                quote_ident(&junction),
                quote_ident(&own_column),
                quote_ident(&their_column),
            )
        } else {
            format!(
                "DELETE FROM {} WHERE {} = $1 AND {} = $2",
                quote_ident(&junction),
                quote_ident(&own_column),
                quote_ident(&their_column),
            )
        };
        Ok((sql, vec![own_value, their_value]))
    }
}

/// The sole primary-key column and whether the backend generates it.
fn pk_spec(schema: &ModelSchema) -> Result<(&'static str, bool)> {
    let field = schema.sole_primary_key()?;
    let autoincrement = field.as_scalar().is_some_and(|s| s.autoincrement);
    Ok((field.name, autoincrement))
}

/// Check scalar columns of a serialized row against their declared
/// constraints. Synthetic foreign-key columns have no field of their own
/// and are skipped.
fn validate_scalars(schema: &ModelSchema, pairs: &[(&'static str, Value)]) -> Result<()> {
    let checkable: Vec<(&str, Value)> = pairs
        .iter()
        .filter(|(name, _)| schema.field(name).is_some_and(FieldDescriptor::is_scalar))
        .map(|(name, value)| (*name, value.clone()))
        .collect();
    validate_values(schema.model_name, &schema.fields, &checkable)
}

fn row_value<M: Model>(model: &M, column: &str) -> Result<Option<Value>> {
    let row = model.to_row()?;
    Ok(row
        .into_iter()
        .find(|(name, _)| *name == column)
        .map(|(_, value)| value)
        .filter(|value| !value.is_null()))
}

/// Build an instance from filter and default values: known columns are
/// laid into a synthetic row and handed to the model's own `from_row`.
/// Required columns the caller did not supply surface as that method's
/// validation errors.
fn synthesize<M: Model>(schema: &ModelSchema, sources: &[&[(&str, Value)]]) -> Result<M> {
    let mut unknown = Vec::new();
    for source in sources {
        for (name, _) in source.iter() {
            if schema.field(name).is_none() {
                unknown.push((*name).to_string());
            }
        }
    }
    if !unknown.is_empty() {
        return Err(Error::UnknownFields {
            model: M::MODEL_NAME.to_string(),
            fields: unknown,
        });
    }

    let mut names = Vec::new();
    let mut values = Vec::new();
    for field in &schema.fields {
        let Some(column) = schema.column_for(field.name) else {
            continue;
        };
        let provided = sources
            .iter()
            .find_map(|source| source.iter().find(|(name, _)| *name == field.name))
            .map(|(_, value)| value.clone());
        match provided {
            Some(value) => {
                names.push(column.to_string());
                values.push(value);
            }
            None if field.is_scalar() => {
                names.push(column.to_string());
                values.push(Value::Null);
            }
            // Foreign keys without a value stay out of the row; the
            // model's raw-key cache simply stays empty.
            None => {}
        }
    }
    M::from_row(&Row::new(names, values))
}
