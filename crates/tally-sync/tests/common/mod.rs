#![allow(dead_code)]

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{DataType, Row, RowStore, TenantScope};
use tally_store::InMemoryStore;
use tally_sync::{ClientError, TallyResponse, TallySource};
use uuid::Uuid;

/// Answers export requests by collection id; unknown collections get an
/// empty envelope, listed ones can be made to fail.
#[derive(Default)]
pub struct ScriptedTally {
    responses: HashMap<&'static str, String>,
    failing: Vec<&'static str>,
    pub requests: Mutex<Vec<String>>,
}

impl ScriptedTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, data_type: DataType, body: impl Into<String>) -> Self {
        self.responses.insert(data_type.collection_id(), body.into());
        self
    }

    pub fn fail(mut self, data_type: DataType) -> Self {
        self.failing.push(data_type.collection_id());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TallySource for ScriptedTally {
    async fn send(&self, body: &str) -> Result<TallyResponse, ClientError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(body.to_string());
        }

        if self.failing.iter().any(|id| body.contains(&format!("<ID>{id}</ID>"))) {
            return Err(ClientError::Transport("connection refused".to_string()));
        }

        let body = self
            .responses
            .iter()
            .find(|(id, _)| body.contains(&format!("<ID>{id}</ID>")))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| envelope(""));
        Ok(TallyResponse { status: 200, body })
    }
}

pub fn envelope(records: &str) -> String {
    format!(
        "<ENVELOPE><HEADER><STATUS>1</STATUS></HEADER><BODY><DATA><TALLYMESSAGE>{records}</TALLYMESSAGE></DATA></BODY></ENVELOPE>"
    )
}

pub fn scope() -> TenantScope {
    TenantScope::new(Uuid::new_v4(), Uuid::new_v4())
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub async fn seed(store: &InMemoryStore, scope: &TenantScope, table: &str, values: Vec<Value>) {
    let rows: Vec<Row> = values
        .into_iter()
        .map(|value| {
            let mut row = row(value);
            scope.stamp(&mut row);
            row
        })
        .collect();
    store
        .insert(table, &rows)
        .await
        .expect("seeding the in-memory store");
}

pub async fn tenant_rows(store: &InMemoryStore, scope: &TenantScope, table: &str) -> Vec<Row> {
    store
        .rows(table)
        .await
        .into_iter()
        .filter(|row| scope.owns(row))
        .collect()
}
