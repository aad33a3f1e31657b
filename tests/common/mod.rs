//! In-process CouchDB stand-in for integration tests.
//!
//! Implements the handful of endpoints the client talks to, with CouchDB's
//! revision rules and status codes.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use docsync::StorageConfig;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "admin";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Doc {
    generation: u64,
    body: Map<String, Value>,
}

impl Doc {
    fn rev(&self) -> String {
        format!("{}-mock", self.generation)
    }
}

#[derive(Default)]
struct Inner {
    dbs: BTreeMap<String, BTreeMap<String, Doc>>,
    page_requests: usize,
    forced_conflicts: usize,
}

#[derive(Clone, Default)]
pub struct MockCouch {
    inner: Arc<Mutex<Inner>>,
}

impl MockCouch {
    pub fn with_db(db: &str) -> Self {
        let mock = Self::default();
        mock.inner
            .lock()
            .unwrap()
            .dbs
            .insert(db.to_string(), BTreeMap::new());
        mock
    }

    pub fn insert(&self, db: &str, key: &str, body: Value) {
        let Value::Object(body) = body else {
            panic!("documents must be objects");
        };
        let mut inner = self.inner.lock().unwrap();
        let docs = inner.dbs.entry(db.to_string()).or_default();
        let generation = docs.get(key).map_or(1, |doc| doc.generation + 1);
        docs.insert(key.to_string(), Doc { generation, body });
    }

    pub fn doc(&self, db: &str, key: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .dbs
            .get(db)?
            .get(key)
            .map(|doc| Value::Object(doc.body.clone()))
    }

    pub fn drop_db(&self, db: &str) {
        self.inner.lock().unwrap().dbs.remove(db);
    }

    pub fn page_requests(&self) -> usize {
        self.inner.lock().unwrap().page_requests
    }

    /// Makes the next `n` writes fail with 409 regardless of revision.
    pub fn force_conflicts(&self, n: usize) {
        self.inner.lock().unwrap().forced_conflicts = n;
    }

    pub async fn serve(self) -> SocketAddr {
        let app = Router::new()
            .route("/{db}", get(get_db).post(post_doc))
            .route("/{db}/_all_docs", get(all_docs))
            .route("/{db}/{key}", get(get_doc).put(put_doc))
            .with_state(self);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// Starts a mock holding database `db` and returns a config pointing at it.
pub async fn start(db: &str) -> (MockCouch, StorageConfig) {
    init_tracing();
    let mock = MockCouch::with_db(db);
    let addr = mock.clone().serve().await;
    let config = StorageConfig::new(db)
        .with_host(addr.ip().to_string())
        .with_port(addr.port())
        .with_credentials(USER, PASSWORD);
    (mock, config)
}

/// A server that accepts connections but holds every answer for `delay`.
pub async fn stalled(db: &str, delay: Duration) -> StorageConfig {
    init_tracing();
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        reply(StatusCode::OK, json!({ "db_name": "late" }))
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    StorageConfig::new(db)
        .with_host(addr.ip().to_string())
        .with_port(addr.port())
        .with_credentials(USER, PASSWORD)
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn missing_db() -> Response {
    reply(
        StatusCode::NOT_FOUND,
        json!({ "error": "not_found", "reason": "Database does not exist." }),
    )
}

fn conflict() -> Response {
    reply(
        StatusCode::CONFLICT,
        json!({ "error": "conflict", "reason": "Document update conflict." }),
    )
}

fn check_auth(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("{USER}:{PASSWORD}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .is_some_and(|decoded| decoded == expected.as_bytes());
    if authorized {
        Ok(())
    } else {
        Err(reply(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "unauthorized", "reason": "Name or password is incorrect." }),
        ))
    }
}

async fn get_db(
    State(mock): State<MockCouch>,
    Path(db): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    let inner = mock.inner.lock().unwrap();
    match inner.dbs.get(&db) {
        Some(docs) => reply(
            StatusCode::OK,
            json!({ "db_name": db, "doc_count": docs.len() }),
        ),
        None => missing_db(),
    }
}

#[derive(Deserialize)]
struct AllDocsParams {
    limit: Option<usize>,
    startkey: Option<String>,
    skip: Option<usize>,
}

async fn all_docs(
    State(mock): State<MockCouch>,
    Path(db): Path<String>,
    Query(params): Query<AllDocsParams>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    let mut inner = mock.inner.lock().unwrap();
    inner.page_requests += 1;
    let Some(docs) = inner.dbs.get(&db) else {
        return missing_db();
    };
    let start: Option<String> = match params.startkey.as_deref().map(serde_json::from_str) {
        Some(Ok(start)) => Some(start),
        Some(Err(_)) => {
            return reply(
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "reason": "Invalid JSON startkey" }),
            );
        }
        None => None,
    };
    let rows: Vec<Value> = docs
        .iter()
        .filter(|(key, _)| start.as_ref().is_none_or(|start| *key >= start))
        .skip(params.skip.unwrap_or(0))
        .take(params.limit.unwrap_or(usize::MAX))
        .map(|(key, doc)| json!({ "id": key, "key": key, "value": { "rev": doc.rev() } }))
        .collect();
    reply(
        StatusCode::OK,
        json!({ "total_rows": docs.len(), "offset": 0, "rows": rows }),
    )
}

async fn get_doc(
    State(mock): State<MockCouch>,
    Path((db, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    let inner = mock.inner.lock().unwrap();
    let Some(docs) = inner.dbs.get(&db) else {
        return missing_db();
    };
    match docs.get(&key) {
        Some(doc) => {
            let mut body = doc.body.clone();
            body.insert("_id".to_string(), json!(key));
            body.insert("_rev".to_string(), json!(doc.rev()));
            reply(StatusCode::OK, Value::Object(body))
        }
        None => reply(
            StatusCode::NOT_FOUND,
            json!({ "error": "not_found", "reason": "missing" }),
        ),
    }
}

fn write_doc(mock: &MockCouch, db: &str, key: &str, mut body: Map<String, Value>) -> Response {
    let mut inner = mock.inner.lock().unwrap();
    if inner.forced_conflicts > 0 {
        inner.forced_conflicts -= 1;
        return conflict();
    }
    let Some(docs) = inner.dbs.get_mut(db) else {
        return missing_db();
    };
    let given_rev = body.remove("_rev");
    body.remove("_id");
    let current_rev = docs.get(key).map(Doc::rev);
    if given_rev.as_ref().and_then(Value::as_str) != current_rev.as_deref() {
        return conflict();
    }
    let generation = docs.get(key).map_or(1, |doc| doc.generation + 1);
    let doc = Doc { generation, body };
    let rev = doc.rev();
    docs.insert(key.to_string(), doc);
    reply(
        StatusCode::CREATED,
        json!({ "ok": true, "id": key, "rev": rev }),
    )
}

async fn put_doc(
    State(mock): State<MockCouch>,
    Path((db, key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    write_doc(&mock, &db, &key, body)
}

async fn post_doc(
    State(mock): State<MockCouch>,
    Path(db): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    let Some(key) = body.get("_id").and_then(Value::as_str).map(str::to_string) else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "error": "bad_request", "reason": "missing _id" }),
        );
    };
    write_doc(&mock, &db, &key, body)
}
