//! Scripted connection shared by the integration tests.

#![allow(dead_code)]

use orchard::{Connection, Cx, Error, Outcome, Row, TransactionOps, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(Vec<Row>),
    Affected(u64),
    Key(i64),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub results: VecDeque<Scripted>,
    pub statements: Vec<(String, Vec<Value>)>,
}

/// Replays scripted responses and records every statement.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<StdMutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<StdMutex<MockState>> {
        Arc::clone(&self.state)
    }

    pub fn script(&self, result: Scripted) {
        self.state
            .lock()
            .expect("mock state poisoned")
            .results
            .push_back(result);
    }

    pub fn script_rows(&self, rows: Vec<Row>) {
        self.script(Scripted::Rows(rows));
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.state
            .lock()
            .expect("mock state poisoned")
            .statements
            .push((sql.to_string(), params.to_vec()));
    }

    fn next(&self) -> Option<Scripted> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .results
            .pop_front()
    }
}

/// Every recorded SQL string, in order.
pub fn issued_sql(state: &Arc<StdMutex<MockState>>) -> Vec<String> {
    state
        .lock()
        .expect("mock state poisoned")
        .statements
        .iter()
        .map(|(sql, _)| sql.clone())
        .collect()
}

/// Every recorded statement with its parameters.
pub fn issued(state: &Arc<StdMutex<MockState>>) -> Vec<(String, Vec<Value>)> {
    state.lock().expect("mock state poisoned").statements.clone()
}

pub struct MockTransaction;

impl TransactionOps for MockTransaction {
    async fn commit(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    async fn rollback(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }
}

impl Connection for MockConnection {
    type Tx<'conn> = MockTransaction;

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
        Outcome::Ok(MockTransaction)
    }

    async fn ping(&self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }

    async fn close(self, _cx: &Cx) -> Outcome<(), Error> {
        Outcome::Ok(())
    }
}

/// Fail the test with the error unless the outcome is `Ok`.
pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(value) => value,
        other => panic!("expected success, got {other:?}"),
    }
}
