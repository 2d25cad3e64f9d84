//! The database handle: registered models, resolved schemas, and a shared
//! connection scope.
//!
//! A [`DatabaseBuilder`] collects model registrations, then `connect`
//! resolves relationships and materializes tables in one pass, so a
//! [`Database`] never hands out an unresolved schema. The handle is cheap
//! to clone; clones share the connection scope and the registry.

use asupersync::{Cx, Outcome};
use orchard_core::{Connection, DatabaseScope, Error, Model, Result, Row, Value, try_outcome};
use orchard_query::QuerySet;
use orchard_schema::{SchemaRegistry, build_all, create_all_sql, drop_all_sql, resolve_all};
use std::sync::Arc;

/// Collects model registrations before the first connection.
#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    registry: SchemaRegistry,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Registration is idempotent and order-independent.
    pub fn register<M: Model>(mut self) -> Self {
        self.registry.register::<M>();
        self
    }

    /// Resolve every registered relationship, materialize every table, and
    /// wrap the connection. Definition errors surface here, before any SQL
    /// is issued.
    pub fn connect<C: Connection>(mut self, connection: C) -> Result<Database<C>> {
        resolve_all(&mut self.registry)?;
        build_all(&mut self.registry)?;
        tracing::debug!(
            models = self.registry.model_names().len(),
            "schema registry resolved"
        );
        Ok(Database {
            scope: DatabaseScope::new(connection),
            registry: Arc::new(self.registry),
        })
    }
}

/// A connected database with a fully resolved schema registry.
pub struct Database<C: Connection> {
    pub(crate) scope: DatabaseScope<C>,
    pub(crate) registry: Arc<SchemaRegistry>,
}

impl<C: Connection> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<C: Connection> Database<C> {
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The shared connection scope, for explicit transaction blocks.
    pub fn scope(&self) -> &DatabaseScope<C> {
        &self.scope
    }

    /// Start a query against one model.
    pub fn query<M: Model>(&self) -> QuerySet<'_, M, C> {
        QuerySet::new(&self.scope, &self.registry)
    }

    /// One-call setup for a fresh database: materialize every registered
    /// table. Schemas were already resolved and built at connect time, so
    /// this only issues the DDL.
    pub async fn init(&self, cx: &Cx) -> Outcome<(), Error> {
        self.create_all(cx).await
    }

    /// Issue CREATE TABLE / CREATE INDEX statements for every registered
    /// model and junction, in registration order.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn create_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let statements = match create_all_sql(&self.registry) {
            Ok(statements) => statements,
            Err(e) => return Outcome::Err(e),
        };
        for sql in &statements {
            try_outcome!(self.scope.execute(cx, sql, &[]).await);
        }
        Outcome::Ok(())
    }

    /// Drop every registered table, junctions first.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn drop_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let statements = match drop_all_sql(&self.registry) {
            Ok(statements) => statements,
            Err(e) => return Outcome::Err(e),
        };
        for sql in &statements {
            try_outcome!(self.scope.execute(cx, sql, &[]).await);
        }
        Outcome::Ok(())
    }

    /// Run a raw statement and return the affected row count.
    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        self.scope.execute(cx, sql, params).await
    }

    /// Run a raw query and return the result rows.
    pub async fn fetch_rows(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        self.scope.query(cx, sql, params).await
    }
}
