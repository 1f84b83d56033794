#![allow(dead_code)]

use async_trait::async_trait;
use relschema::sql::QueryBuf;
use relschema::{AppError, Builder, Client, Entity, Executor, Transaction};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct Recorder {
    /// (ran inside a transaction, statement)
    pub statements: Vec<(bool, QueryBuf)>,
    pub rows: VecDeque<Vec<Entity>>,
    pub affected: VecDeque<u64>,
    pub events: Vec<&'static str>,
    pub fail_on: Option<String>,
    pub fail_commit: bool,
    pub fail_rollback: bool,
}

/// Records every statement and answers from queued results. Queries without a queued
/// result return no rows; execs without one report a single affected row.
#[derive(Clone, Default)]
pub struct MockExecutor {
    pub state: Arc<Mutex<Recorder>>,
    in_tx: bool,
}

impl MockExecutor {
    pub fn new() -> Self {
        MockExecutor::default()
    }

    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| Entity::from_value(v).unwrap())
            .collect();
        self.state.lock().unwrap().rows.push_back(rows);
    }

    pub fn push_affected(&self, n: u64) {
        self.state.lock().unwrap().affected.push_back(n);
    }

    pub fn fail_on(&self, sql_fragment: &str) {
        self.state.lock().unwrap().fail_on = Some(sql_fragment.to_string());
    }

    pub fn statements(&self) -> Vec<QueryBuf> {
        self.state.lock().unwrap().statements.iter().map(|(_, q)| q.clone()).collect()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|q| q.sql).collect()
    }

    pub fn in_tx_flags(&self) -> Vec<bool> {
        self.state.lock().unwrap().statements.iter().map(|(t, _)| *t).collect()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().events.clone()
    }

    fn record(&self, q: &QueryBuf) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push((self.in_tx, q.clone()));
        match &state.fail_on {
            Some(fragment) if q.sql.contains(fragment.as_str()) => Err(AppError::Tx("boom".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn query(&self, q: &QueryBuf) -> Result<Vec<Entity>, AppError> {
        self.record(q)?;
        Ok(self.state.lock().unwrap().rows.pop_front().unwrap_or_default())
    }

    async fn exec(&self, q: &QueryBuf) -> Result<u64, AppError> {
        self.record(q)?;
        Ok(self.state.lock().unwrap().affected.pop_front().unwrap_or(1))
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, AppError> {
        if self.in_tx {
            return Err(AppError::Tx("cannot start a transaction within a transaction".into()));
        }
        self.state.lock().unwrap().events.push("begin");
        Ok(Arc::new(MockExecutor {
            state: self.state.clone(),
            in_tx: true,
        }))
    }

    fn is_tx(&self) -> bool {
        self.in_tx
    }
}

#[async_trait]
impl Transaction for MockExecutor {
    async fn commit(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("commit");
        if state.fail_commit {
            return Err(AppError::Tx("commit failed".into()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("rollback");
        if state.fail_rollback {
            return Err(AppError::Tx("rollback failed".into()));
        }
        Ok(())
    }

    fn executor(self: Arc<Self>) -> Arc<dyn Executor> {
        self
    }
}

pub const USER: &str = r#"{
    "name": "user",
    "fields": [
        {"name": "name", "type": "string", "sortable": true},
        {"name": "age", "type": "uint", "optional": true},
        {"name": "deleted", "type": "bool"},
        {"name": "posts", "type": "relation", "relation": {"schema": "post", "field": "author", "type": "o2m", "owner": true}},
        {"name": "groups", "type": "relation", "relation": {"schema": "group", "field": "users", "type": "m2m"}},
        {"name": "friends", "type": "relation", "relation": {"schema": "user", "field": "friends", "type": "m2m"}},
        {"name": "card", "type": "relation", "relation": {"schema": "card", "field": "owner", "type": "o2o", "owner": true, "optional": true}}
    ]
}"#;

pub const POST: &str = r#"{
    "name": "post",
    "fields": [
        {"name": "title", "type": "string"},
        {"name": "author", "type": "relation", "relation": {"schema": "user", "field": "posts", "type": "o2m", "optional": true}}
    ]
}"#;

pub const GROUP: &str = r#"{
    "name": "group",
    "disable_timestamp": true,
    "fields": [
        {"name": "name", "type": "string"},
        {"name": "users", "type": "relation", "relation": {"schema": "user", "field": "groups", "type": "m2m"}}
    ]
}"#;

pub const CARD: &str = r#"{
    "name": "card",
    "disable_timestamp": true,
    "fields": [
        {"name": "number", "type": "string", "unique": true},
        {"name": "owner", "type": "relation", "relation": {"schema": "user", "field": "card", "type": "o2o", "optional": true}}
    ]
}"#;

pub fn blog() -> Builder {
    Builder::from_json(&[USER, POST, GROUP, CARD]).unwrap()
}

pub fn client() -> (Client, MockExecutor) {
    let mock = MockExecutor::new();
    let client = Client::new(Arc::new(mock.clone()), blog()).unwrap();
    (client, mock)
}
