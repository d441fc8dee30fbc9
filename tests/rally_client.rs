//! Rally client tests against a fake WSAPI server.

mod common;

use common::{link, query_result, story, FakeServer, Recorded};
use serde_json::json;
use storyforge::integrations::{RallyClient, RallyError};
use storyforge::workflow::{DependencyClient, WorkflowError};

const REFS: &str = "https://rally.example";

fn item_ref(oid: u64) -> String {
    format!("{}/slm/webservice/v2.0/hierarchicalrequirement/{}", REFS, oid)
}

/// US1 (oid 100) waits on 200 and an unresolvable 999; 300..=302 wait on US1.
fn wsapi(request: &Recorded) -> (u16, String) {
    let path = request.path.as_str();
    let query = request.param("query").unwrap_or_default();

    if path == "/slm/webservice/v2.0/hierarchicalrequirement" {
        return if query.contains("\"US1\"") {
            (200, query_result(&[story(REFS, 100, "US1", "Checkout")], 1))
        } else {
            (200, query_result(&[], 0))
        };
    }

    if let Some(rest) = path.strip_prefix("/slm/webservice/v2.0/hierarchicalrequirement/") {
        let oid: u64 = rest.parse().unwrap_or(0);
        return match oid {
            200 | 300..=302 => {
                let body = json!({
                    "HierarchicalRequirement": story(REFS, oid, &format!("US{}", oid), "Related")
                });
                (200, body.to_string())
            }
            _ => (404, "{}".to_string()),
        };
    }

    if path == "/slm/webservice/v2.0/dependency" {
        if query.starts_with("(Successor =") {
            let links = [
                link(&item_ref(200), &item_ref(100), "payment API"),
                link(&item_ref(999), &item_ref(100), "deleted story"),
            ];
            return (200, query_result(&links, 2));
        }
        if query.starts_with("(Predecessor =") {
            let all = [
                link(&item_ref(100), &item_ref(300), ""),
                link(&item_ref(100), &item_ref(301), ""),
                link(&item_ref(100), &item_ref(302), ""),
            ];
            let start: usize = request.param("start").and_then(|s| s.parse().ok()).unwrap_or(1);
            let size: usize =
                request.param("pagesize").and_then(|s| s.parse().ok()).unwrap_or(200);
            let page: Vec<_> = all.iter().skip(start - 1).take(size).cloned().collect();
            return (200, query_result(&page, all.len()));
        }
    }

    (500, "{}".to_string())
}

fn client(server: &FakeServer) -> RallyClient {
    RallyClient::new(server.url(), "secret-key", "/workspace/1").with_page_size(2)
}

#[tokio::test]
async fn test_fetch_dependency_graph() {
    let server = FakeServer::start(wsapi);

    let graph = client(&server).fetch_dependency_graph("US1").await.unwrap();

    assert_eq!(graph.item.id, "US1");
    assert_eq!(graph.item.name, "Checkout");
    assert_eq!(graph.item.state, "Defined");
    assert_eq!(graph.item.details["FormattedID"], "US1");

    assert_eq!(graph.blocked_by.len(), 2);
    assert_eq!(graph.blocked_by[0].item.as_ref().map(|i| i.id.as_str()), Some("US200"));
    assert_eq!(graph.blocked_by[0].description, "payment API");
    assert!(graph.blocked_by[1].is_reference_only());
    assert_eq!(graph.blocked_by[1].predecessor_ref, item_ref(999));

    let blocking: Vec<_> =
        graph.blocking.iter().filter_map(|e| e.item.as_ref()).map(|i| i.id.clone()).collect();
    assert_eq!(blocking, vec!["US300", "US301", "US302"]);
    assert_eq!(graph.unresolved_count(), 1);
}

#[tokio::test]
async fn test_successor_query_is_paginated() {
    let server = FakeServer::start(wsapi);

    client(&server).fetch_dependency_graph("US1").await.unwrap();

    let pages: Vec<String> = server
        .requests()
        .iter()
        .filter(|r| r.param("query").is_some_and(|q| q.starts_with("(Predecessor =")))
        .filter_map(|r| r.param("start").map(str::to_string))
        .collect();
    assert_eq!(pages, vec!["1", "3"]);
}

#[tokio::test]
async fn test_requests_are_authenticated_and_scoped() {
    let server = FakeServer::start(wsapi);

    client(&server).find_work_item("US1").await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].header("ZSESSIONID"), Some("secret-key"));
    assert_eq!(requests[0].param("workspace"), Some("/workspace/1"));
    assert_eq!(requests[0].param("query"), Some("(FormattedID = \"US1\")"));
}

#[tokio::test]
async fn test_unknown_story_is_not_found() {
    let server = FakeServer::start(wsapi);
    let client = client(&server);

    let err = client.find_work_item("US404").await.unwrap_err();
    assert!(matches!(err, RallyError::NotFound(ref id) if id == "US404"));

    let err = client.fetch("US404").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
    assert_eq!(server.count("dependency"), 0);
}

#[tokio::test]
async fn test_unauthorized_is_transport_error() {
    let server = FakeServer::start(|_| (401, "{}".to_string()));

    let err = client(&server).fetch("US1").await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_wsapi_errors_surface() {
    let server = FakeServer::start(|_| {
        let body = json!({
            "QueryResult": { "TotalResultCount": 0, "Results": [], "Errors": ["Could not parse query"] }
        });
        (200, body.to_string())
    });

    let err = client(&server).find_work_item("US1").await.unwrap_err();
    assert!(matches!(err, RallyError::Api { ref message, .. } if message.contains("Could not parse")));
}

#[tokio::test]
async fn test_failed_edge_query_yields_empty_side() {
    let server = FakeServer::start(|request| {
        let query = request.param("query").unwrap_or_default();
        if query.starts_with("(Predecessor =") {
            return (500, "boom".to_string());
        }
        wsapi(request)
    });

    let graph = client(&server).fetch_dependency_graph("US1").await.unwrap();
    assert_eq!(graph.blocked_by.len(), 2);
    assert!(graph.blocking.is_empty());
}

#[tokio::test]
async fn test_quoted_formatted_id_rejected_before_request() {
    let server = FakeServer::start(wsapi);
    let client = client(&server);

    for id in ["US1\") OR (Name != \"", "", "   "] {
        let err = client.find_work_item(id).await.unwrap_err();
        assert!(matches!(err, RallyError::InvalidInput(_)), "{id:?} should be rejected");
    }

    let err = client.fetch("US\"1").await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
    assert!(server.requests().is_empty());
}
