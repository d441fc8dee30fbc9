//! Shared helpers for integration tests.
//!
//! `FakeServer` is an axum router on an ephemeral localhost port. Every
//! request lands in one fallback handler that records it and answers with
//! whatever the test's closure returns. The server runs on its own thread
//! and runtime so both sync and `#[tokio::test]` tests can use it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;

/// A request seen by the fake server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// Decoded value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

type Handler = dyn Fn(&Recorded) -> (u16, String) + Send + Sync;

#[derive(Clone)]
struct Shared {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

pub struct FakeServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeServer {
    /// Start serving on an ephemeral localhost port.
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let shared = Shared { handler: Arc::new(handler), requests: Arc::clone(&requests) };
        let app = Router::new().fallback(respond).with_state(shared);

        thread::spawn(move || {
            let runtime =
                tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        Self { addr, requests }
    }

    /// Base URL, e.g. `http://127.0.0.1:40123`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.requests().iter().filter(|r| r.path.contains(needle)).count()
    }
}

async fn respond(
    State(shared): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    let request = Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let (status, payload) = (shared.handler)(&request);
    shared.requests.lock().unwrap().push(request);

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], payload)
}

/// Wrap results in a WSAPI `QueryResult` envelope.
pub fn query_result(results: &[serde_json::Value], total: usize) -> String {
    serde_json::json!({
        "QueryResult": {
            "TotalResultCount": total,
            "StartIndex": 1,
            "PageSize": results.len(),
            "Results": results,
            "Errors": [],
            "Warnings": []
        }
    })
    .to_string()
}

/// A raw WSAPI user story.
pub fn story(base: &str, oid: u64, formatted_id: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "_ref": format!("{}/slm/webservice/v2.0/hierarchicalrequirement/{}", base, oid),
        "FormattedID": formatted_id,
        "Name": name,
        "Description": format!("<p>{} description</p>", name),
        "ScheduleState": "Defined"
    })
}

/// A raw WSAPI dependency link.
pub fn link(predecessor_ref: &str, successor_ref: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "Predecessor": { "_ref": predecessor_ref },
        "Successor": { "_ref": successor_ref },
        "Description": description
    })
}
