//! Scripted connection and registry fixtures for query tests.

use asupersync::{Cx, Outcome};
use orchard_core::{Connection, Error, Row, TransactionOps, Value};
use orchard_schema::{SchemaRegistry, build_all, resolve_all, testing};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(Vec<Row>),
    Affected(u64),
    Key(i64),
}

/// Shared view of the statements a [`MockConnection`] received. Cloned
/// out of the connection before it moves into a scope.
pub type StatementLog = Arc<StdMutex<Vec<(String, Vec<Value>)>>>;

/// A connection that replays scripted responses and records every
/// statement it receives.
#[derive(Debug, Default)]
pub struct MockConnection {
    results: Arc<StdMutex<VecDeque<Scripted>>>,
    log: StatementLog,
}

pub fn statements(log: &StatementLog) -> Vec<(String, Vec<Value>)> {
    log.lock().expect("log lock poisoned").clone()
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_handle(&self) -> StatementLog {
        Arc::clone(&self.log)
    }

    pub fn script(&self, result: Scripted) {
        self.results
            .lock()
            .expect("script lock poisoned")
            .push_back(result);
    }

    pub fn script_rows(&self, rows: Vec<Row>) {
        self.script(Scripted::Rows(rows));
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.log
            .lock()
            .expect("log lock poisoned")
            .push((sql.to_string(), params.to_vec()));
    }

    fn next(&self) -> Option<Scripted> {
        self.results
            .lock()
            .expect("script lock poisoned")
            .pop_front()
    }
}

pub struct NoTx;

impl TransactionOps for NoTx {
    async fn commit(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    async fn rollback(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }
}

impl Connection for MockConnection {
    type Tx<'conn> = NoTx;

    async fn query(&self, _cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        self.record(sql, params);
        match self.next() {
            Some(Scripted::Rows(rows)) => Outcome::Ok(rows),
            _ => Outcome::Ok(Vec::new()),
        }
    }

    async fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        self.record(sql, params);
        match self.next() {
            Some(Scripted::Rows(rows)) => Outcome::Ok(rows.into_iter().next()),
            _ => Outcome::Ok(None),
        }
    }

    async fn execute(&self, _cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        self.record(sql, params);
        match self.next() {
            Some(Scripted::Affected(n)) => Outcome::Ok(n),
            _ => Outcome::Ok(0),
        }
    }

    async fn insert(&self, _cx: &Cx, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
        self.record(sql, params);
        match self.next() {
            Some(Scripted::Key(key)) => Outcome::Ok(key),
            _ => Outcome::Ok(1),
        }
    }

    async fn batch(&self, _cx: &Cx, sql: &str, param_rows: &[Vec<Value>]) -> Outcome<u64, Error> {
        let n = param_rows.len() as u64;
        for params in param_rows {
            self.record(sql, params);
        }
        Outcome::Ok(n)
    }

    async fn begin(&self, _cx: &Cx) -> Outcome<Self::Tx<'_>, Error> {
        Outcome::Ok(NoTx)
    }

    async fn ping(&self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    async fn close(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }
}

/// A registry with the shared fixture models registered, resolved and
/// materialized.
pub fn fixture_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register::<testing::School>();
    registry.register::<testing::Student>();
    registry.register::<testing::Tag>();
    registry.register::<testing::Post>();
    resolve_all(&mut registry).expect("fixture models resolve");
    build_all(&mut registry).expect("fixture tables build");
    registry
}
