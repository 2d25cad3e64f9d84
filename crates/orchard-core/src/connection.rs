//! The relational backend abstraction.
//!
//! The ORM core treats the backend as an opaque collaborator: everything it
//! needs is expressed by the [`Connection`] trait. Every method is a
//! suspension point taking the asupersync [`Cx`] capability and returning an
//! [`Outcome`], so cancellation propagates unchanged through the core — no
//! operation is retried or suppressed.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Operations available on an active transaction.
pub trait TransactionOps: Send {
    /// Commit the transaction.
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the transaction.
    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// A connection to a relational backend.
pub trait Connection: Send + Sync {
    /// The transaction handle type for this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// Execute a query and return all result rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return at most one row.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement and return the affected row count.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the backend-generated primary key.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Execute one statement for each parameter row, returning the total
    /// affected row count.
    fn batch(
        &self,
        cx: &Cx,
        sql: &str,
        param_rows: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Begin a transaction.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send;

    /// Check that the connection is alive.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the connection.
    fn close(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}
