#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use doclist_api::middleware::{encode_token, Claims};
use doclist_api::AppState;
use doclist_core::domain::*;
use doclist_core::traits::{Database, PermissionChecker, Transaction};
use doclist_core::Result;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const SECRET: &str = "test-secret";

pub fn note() -> Doctype {
    Doctype::new("Note").unwrap()
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

pub fn token(user: &str, roles: &[&str]) -> String {
    let claims = Claims::new(
        user,
        roles.iter().map(|r| r.to_string()).collect(),
        Duration::hours(1),
    );
    encode_token(&claims, SECRET).unwrap()
}

/// Grants every permission or none, counting the checks it answers.
#[derive(Default)]
pub struct CountingChecker {
    pub allowed: Vec<PermissionType>,
    pub calls: AtomicUsize,
}

impl CountingChecker {
    pub fn allowing(allowed: &[PermissionType]) -> Self {
        Self {
            allowed: allowed.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionChecker for CountingChecker {
    async fn has_permission(
        &self,
        _user: &SessionUser,
        _doctype: &Doctype,
        ptype: PermissionType,
        _parent: Option<&Doctype>,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.allowed.contains(&ptype))
    }
}

/// Records every list query it is asked to run and returns no rows.
#[derive(Default, Clone)]
pub struct RecordingDatabase {
    pub executed: Arc<Mutex<Vec<ListQuery>>>,
}

impl RecordingDatabase {
    pub fn executed(&self) -> Vec<ListQuery> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(RecordingTransaction {
            executed: Arc::clone(&self.executed),
        }))
    }
}

pub struct RecordingTransaction {
    executed: Arc<Mutex<Vec<ListQuery>>>,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn savepoint(&mut self, _name: &SavepointName) -> Result<()> {
        Ok(())
    }

    async fn release_savepoint(&mut self, _name: &SavepointName) -> Result<()> {
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, _name: &SavepointName) -> Result<()> {
        Ok(())
    }

    async fn fetch_list(&mut self, query: &ListQuery, _debug: bool) -> Result<Vec<Row>> {
        self.executed.lock().unwrap().push(query.clone());
        Ok(Vec::new())
    }

    async fn insert_doc(&mut self, _doctype: &Doctype, doc: Row) -> Result<Row> {
        Ok(doc)
    }

    async fn update_doc(&mut self, _doctype: &Doctype, _name: &str, values: Row) -> Result<Row> {
        Ok(values)
    }

    async fn delete_doc(&mut self, _doctype: &Doctype, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub fn state(
    db: Arc<dyn Database>,
    permissions: Arc<dyn PermissionChecker>,
    doctypes: DoctypeRegistry,
) -> AppState {
    AppState::new(db, permissions, doctypes, SECRET)
}

/// Calls `cmd` with a JSON body, optionally as the bearer of `token`.
pub async fn call(
    app: &Router,
    cmd: &str,
    body: Value,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .uri(format!("/method/{}", cmd))
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = request
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    send(app, request).await
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}
