//! Shared, reference-counted connection scope.
//!
//! A [`DatabaseScope`] wraps one backend connection in
//! `Arc<asupersync::sync::Mutex<..>>`. Logical units of work bracket their
//! backend calls with `acquire`/`release`: the first acquire opens a
//! transaction, the last release commits it — or rolls back if any release
//! reported failure. Every counter transition happens under the one mutex,
//! so concurrent acquire/release sequences on the same handle cannot race
//! on the counter or on the open/close edge.

use crate::connection::Connection;
use crate::error::{ConnectionError, ConnectionErrorKind, Error};
use crate::row::Row;
use crate::value::Value;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use std::sync::Arc;

struct ScopeState<C: Connection> {
    conn: C,
    /// Nested acquire depth; transaction control runs only on 0 <-> 1 edges
    depth: usize,
    /// Set when a release reports failure; forces rollback at depth 0
    failed: bool,
}

/// A cloneable handle to one shared backend connection.
pub struct DatabaseScope<C: Connection> {
    inner: Arc<Mutex<ScopeState<C>>>,
}

impl<C: Connection> Clone for DatabaseScope<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> std::fmt::Debug for DatabaseScope<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseScope")
            .field("inner", &"Arc<Mutex<ScopeState>>")
            .finish()
    }
}

fn lock_error() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Lock,
        message: "Failed to acquire connection lock".to_string(),
        source: None,
    })
}

impl<C: Connection> DatabaseScope<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScopeState {
                conn,
                depth: 0,
                failed: false,
            })),
        }
    }

    /// Enter the scope. The 0 -> 1 transition begins a transaction.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<(), Error> {
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        if guard.depth == 0 {
            guard.failed = false;
            match guard.conn.execute(cx, "BEGIN", &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        guard.depth += 1;
        tracing::trace!(depth = guard.depth, "scope acquired");
        Outcome::Ok(())
    }

    /// Leave the scope. The 1 -> 0 transition commits, or rolls back if any
    /// release in this scope reported `ok = false`.
    pub async fn release(&self, cx: &Cx, ok: bool) -> Outcome<(), Error> {
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        if guard.depth == 0 {
            return Outcome::Err(Error::Transaction(crate::error::TransactionError {
                kind: crate::error::TransactionErrorKind::NotAcquired,
                message: "release without a matching acquire".to_string(),
            }));
        }
        if !ok {
            guard.failed = true;
        }
        guard.depth -= 1;
        if guard.depth == 0 {
            let stmt = if guard.failed { "ROLLBACK" } else { "COMMIT" };
            tracing::debug!(statement = stmt, "closing connection scope");
            match guard.conn.execute(cx, stmt, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            guard.failed = false;
        }
        Outcome::Ok(())
    }

    /// Execute a query and return all result rows.
    pub async fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        tracing::debug!(sql, params = params.len(), "query");
        guard.conn.query(cx, sql, params).await
    }

    /// Execute a query and return at most one row.
    pub async fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        tracing::debug!(sql, params = params.len(), "query_one");
        guard.conn.query_one(cx, sql, params).await
    }

    /// Execute a statement and return the affected row count.
    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        tracing::debug!(sql, params = params.len(), "execute");
        guard.conn.execute(cx, sql, params).await
    }

    /// Execute an INSERT and return the backend-generated primary key.
    pub async fn insert(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        tracing::debug!(sql, params = params.len(), "insert");
        guard.conn.insert(cx, sql, params).await
    }

    /// Execute one statement per parameter row.
    pub async fn batch(
        &self,
        cx: &Cx,
        sql: &str,
        param_rows: &[Vec<Value>],
    ) -> Outcome<u64, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        tracing::debug!(sql, rows = param_rows.len(), "batch");
        guard.conn.batch(cx, sql, param_rows).await
    }

    /// Current acquire depth.
    pub async fn depth(&self, cx: &Cx) -> Outcome<usize, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        Outcome::Ok(guard.depth)
    }
}
