//! Rally (Broadcom Agile Central) integration.
//!
//! Resolves a user story by its formatted id and walks its dependency
//! links through Rally's paginated WSAPI. Predecessor and successor items
//! are fetched in full; a link whose far end cannot be resolved is kept as
//! a bare reference instead of failing the whole fetch.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::RallyConfig;
use crate::workflow::{DependencyClient, DependencyEdge, DependencyGraph, WorkItem, WorkflowError};

/// WSAPI path appended to the server URL.
const API_PATH: &str = "slm/webservice/v2.0";

/// Fields requested for work items.
const ITEM_FIELDS: &str =
    "FormattedID,Name,Description,ScheduleState,State,PlanEstimate,Owner,Project,Predecessors,Successors,Children,Parent";

/// Fields requested for dependency links.
const DEPENDENCY_FIELDS: &str = "Predecessor,Successor,Description";

/// Rally WSAPI client.
#[derive(Debug, Clone)]
pub struct RallyClient {
    /// API base URL (server + WSAPI path)
    base_url: String,
    /// Rally API key
    api_key: String,
    /// Workspace reference every query is scoped to
    workspace_ref: String,
    /// Page size for query endpoints
    page_size: u32,
    /// HTTP client
    client: reqwest::Client,
}

/// Which side of a dependency link to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Items the story waits on
    Predecessors,
    /// Items waiting on the story
    Successors,
}

impl Direction {
    /// Field the story's ref is matched against.
    fn query_field(self) -> &'static str {
        match self {
            Self::Predecessors => "Successor",
            Self::Successors => "Predecessor",
        }
    }
}

/// Result type for Rally operations.
pub type RallyResult<T> = Result<T, RallyError>;

/// Error types for Rally operations.
#[derive(Debug, thiserror::Error)]
pub enum RallyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rally API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<RallyError> for WorkflowError {
    fn from(err: RallyError) -> Self {
        match err {
            RallyError::NotFound(id) => Self::NotFound(id),
            RallyError::InvalidInput(msg) => Self::InvalidInput(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// One page of a WSAPI query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryResult {
    #[serde(default)]
    total_result_count: u64,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    #[serde(rename = "QueryResult")]
    query_result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "_ref")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    #[serde(rename = "Predecessor")]
    predecessor: Option<RawRef>,
    #[serde(rename = "Successor")]
    successor: Option<RawRef>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

impl RallyClient {
    /// Create a new Rally client.
    pub fn new(
        server: impl AsRef<str>,
        api_key: impl Into<String>,
        workspace_ref: impl Into<String>,
    ) -> Self {
        Self {
            base_url: format!("{}/{}", server.as_ref().trim_end_matches('/'), API_PATH),
            api_key: api_key.into(),
            workspace_ref: workspace_ref.into(),
            page_size: 200,
            client: reqwest::Client::new(),
        }
    }

    /// Create from the `[rally]` configuration section.
    pub fn from_config(config: &RallyConfig) -> RallyResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RallyError::InvalidInput("RALLY_API_KEY is not set".to_string()))?;
        let workspace_ref = config
            .workspace_ref
            .clone()
            .ok_or_else(|| RallyError::InvalidInput("RALLY_WORKSPACE_REF is not set".to_string()))?;

        Ok(Self::new(&config.server, api_key, workspace_ref).with_page_size(config.page_size))
    }

    /// Set the page size for query endpoints (clamped to Rally's 1..=2000).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 2000);
        self
    }

    /// Get the API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an authenticated GET request scoped to the workspace.
    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> RallyResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);

        tracing::debug!(%url, "Rally request");

        let response = self
            .client
            .get(&url)
            .header("ZSESSIONID", &self.api_key)
            .header("Content-Type", "application/json")
            .query(&[("workspace", self.workspace_ref.as_str())])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => return Err(RallyError::Unauthorized),
            404 => return Err(RallyError::NotFound(endpoint.to_string())),
            429 => return Err(RallyError::RateLimited),
            _ => {}
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RallyError::Api { status: status.as_u16(), message });
        }

        Ok(response.json().await?)
    }

    /// Fetch one page of a query endpoint.
    async fn query_page(
        &self,
        endpoint: &str,
        query: &str,
        fetch: &str,
        start: u64,
        page_size: u32,
    ) -> RallyResult<QueryResult> {
        let params = [
            ("query", query.to_string()),
            ("fetch", fetch.to_string()),
            ("start", start.to_string()),
            ("pagesize", page_size.to_string()),
        ];

        parse_query_result(self.get(endpoint, &params).await?)
    }

    /// Fetch every page of a query endpoint.
    async fn query_all(&self, endpoint: &str, query: &str, fetch: &str) -> RallyResult<Vec<Value>> {
        let mut results = Vec::new();
        let mut start = 1u64;

        loop {
            let page = self.query_page(endpoint, query, fetch, start, self.page_size).await?;
            let count = page.results.len() as u64;
            results.extend(page.results);

            if count == 0 || results.len() as u64 >= page.total_result_count {
                break;
            }
            start += count;
        }

        Ok(results)
    }

    /// Find a user story by its formatted id (e.g., "US12345").
    pub async fn find_work_item(&self, formatted_id: &str) -> RallyResult<WorkItem> {
        check_formatted_id(formatted_id)?;
        let query = format!("(FormattedID = \"{}\")", formatted_id);
        let page = self.query_page("hierarchicalrequirement", &query, ITEM_FIELDS, 1, 1).await?;

        if page.total_result_count == 0 {
            tracing::warn!(formatted_id, "User story not found");
            return Err(RallyError::NotFound(formatted_id.to_string()));
        }

        let raw = page
            .results
            .first()
            .ok_or_else(|| RallyError::InvalidResponse("empty result page".to_string()))?;
        work_item_from_value(raw)
    }

    /// Get a user story by object id.
    pub async fn get_work_item(&self, object_id: &str) -> RallyResult<WorkItem> {
        let endpoint = format!("hierarchicalrequirement/{}", object_id);
        let response = self.get(&endpoint, &[("fetch", ITEM_FIELDS.to_string())]).await?;

        let raw = response
            .get("HierarchicalRequirement")
            .ok_or_else(|| RallyError::NotFound(object_id.to_string()))?;
        work_item_from_value(raw)
    }

    /// Items the story referenced by `item_ref` depends on.
    pub async fn predecessors(&self, item_ref: &str) -> RallyResult<Vec<DependencyEdge>> {
        self.dependency_edges(item_ref, Direction::Predecessors).await
    }

    /// Items that depend on the story referenced by `item_ref`.
    pub async fn successors(&self, item_ref: &str) -> RallyResult<Vec<DependencyEdge>> {
        self.dependency_edges(item_ref, Direction::Successors).await
    }

    async fn dependency_edges(
        &self,
        item_ref: &str,
        direction: Direction,
    ) -> RallyResult<Vec<DependencyEdge>> {
        let query = format!("({} = \"{}\")", direction.query_field(), item_ref);
        let raw_links = self.query_all("dependency", &query, DEPENDENCY_FIELDS).await?;

        let mut edges = Vec::with_capacity(raw_links.len());
        for raw in raw_links {
            let link: RawDependency = match serde_json::from_value(raw) {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed dependency link");
                    continue;
                }
            };

            let (Some(predecessor), Some(successor)) = (link.predecessor, link.successor) else {
                tracing::warn!(?direction, "Skipping dependency link without both ends");
                continue;
            };

            let far_ref = match direction {
                Direction::Predecessors => predecessor.reference.as_str(),
                Direction::Successors => successor.reference.as_str(),
            };
            let item = self.resolve(far_ref).await;

            edges.push(DependencyEdge {
                predecessor_ref: predecessor.reference.clone(),
                successor_ref: successor.reference.clone(),
                description: link.description.unwrap_or_default(),
                item,
            });
        }

        Ok(edges)
    }

    /// Resolve a reference to full item detail, or `None` if that fails.
    async fn resolve(&self, reference: &str) -> Option<WorkItem> {
        let Some(object_id) = object_id_from_ref(reference) else {
            tracing::warn!(reference, "Cannot extract object id from reference");
            return None;
        };

        match self.get_work_item(object_id).await {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(reference, error = %e, "Keeping dependency as reference only");
                None
            }
        }
    }

    /// Fetch a user story with its predecessors and successors.
    pub async fn fetch_dependency_graph(&self, formatted_id: &str) -> RallyResult<DependencyGraph> {
        let item = self.find_work_item(formatted_id).await?;

        let blocked_by = self.predecessors(&item.reference).await.unwrap_or_else(|e| {
            tracing::warn!(formatted_id, error = %e, "Failed to fetch predecessors");
            Vec::new()
        });
        let blocking = self.successors(&item.reference).await.unwrap_or_else(|e| {
            tracing::warn!(formatted_id, error = %e, "Failed to fetch successors");
            Vec::new()
        });

        Ok(DependencyGraph { item, blocked_by, blocking })
    }
}

#[async_trait]
impl DependencyClient for RallyClient {
    async fn fetch(&self, item_id: &str) -> Result<DependencyGraph, WorkflowError> {
        Ok(self.fetch_dependency_graph(item_id).await?)
    }
}

/// Unwrap a `QueryResult` envelope, surfacing WSAPI-level errors.
fn parse_query_result(response: Value) -> RallyResult<QueryResult> {
    let envelope: QueryEnvelope = serde_json::from_value(response)
        .map_err(|e| RallyError::InvalidResponse(format!("missing QueryResult: {}", e)))?;

    let result = envelope.query_result;
    if let Some(first) = result.errors.first() {
        return Err(RallyError::Api { status: 200, message: first.clone() });
    }

    Ok(result)
}

/// Convert a raw WSAPI user story into a [`WorkItem`].
fn work_item_from_value(raw: &Value) -> RallyResult<WorkItem> {
    let text = |field: &str| raw.get(field).and_then(Value::as_str).map(str::to_string);

    let id = text("FormattedID")
        .ok_or_else(|| RallyError::InvalidResponse("work item without FormattedID".to_string()))?;

    let state = text("ScheduleState")
        .or_else(|| match raw.get("State") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(o)) => {
                o.get("_refObjectName").and_then(Value::as_str).map(str::to_string)
            }
            _ => None,
        })
        .unwrap_or_default();

    Ok(WorkItem {
        id,
        name: text("Name").unwrap_or_default(),
        description: text("Description").unwrap_or_default(),
        state,
        reference: text("_ref").unwrap_or_default(),
        details: raw.clone(),
    })
}

/// Reject ids that cannot be placed inside a quoted WSAPI query term.
fn check_formatted_id(formatted_id: &str) -> RallyResult<()> {
    if formatted_id.trim().is_empty() {
        return Err(RallyError::InvalidInput("work item id is empty".to_string()));
    }
    if formatted_id.contains(|c: char| c == '"' || c == '\\') {
        return Err(RallyError::InvalidInput(format!(
            "work item id contains a quote or backslash: {}",
            formatted_id
        )));
    }
    Ok(())
}

/// Extract the object id (last path segment) from a WSAPI reference.
pub fn object_id_from_ref(reference: &str) -> Option<&str> {
    let id = reference.trim_end_matches('/').rsplit('/').next()?;
    let id = id.strip_suffix(".js").unwrap_or(id);
    (!id.is_empty()).then_some(id)
}

/// Format a dependency graph for display.
pub fn format_dependency_graph(graph: &DependencyGraph) -> String {
    let mut out = format!("{} {} [{}]\n", graph.item.id, graph.item.name, graph.item.state);

    let sections = [("Blocked by", &graph.blocked_by, true), ("Blocking", &graph.blocking, false)];
    for (title, edges, use_predecessor) in sections {
        out.push_str(&format!("\n{} ({}):\n", title, edges.len()));
        if edges.is_empty() {
            out.push_str("  none\n");
        }
        for edge in edges {
            match &edge.item {
                Some(item) => out.push_str(&format!("  {} {} [{}]", item.id, item.name, item.state)),
                None => {
                    let reference =
                        if use_predecessor { &edge.predecessor_ref } else { &edge.successor_ref };
                    out.push_str(&format!("  {} (unresolved)", reference));
                }
            }
            if !edge.description.is_empty() {
                out.push_str(&format!(" - {}", edge.description));
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_formatted_id() {
        assert!(check_formatted_id("US12345").is_ok());
        assert!(check_formatted_id("DE7").is_ok());

        for bad in ["", "  ", "US1\"", "US1\") OR (Name != \"x", "US\\1"] {
            assert!(
                matches!(check_formatted_id(bad), Err(RallyError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_object_id_from_ref() {
        assert_eq!(
            object_id_from_ref("https://rally1.rallydev.com/slm/webservice/v2.0/hierarchicalrequirement/12345"),
            Some("12345")
        );
        assert_eq!(object_id_from_ref("/hierarchicalrequirement/678/"), Some("678"));
        assert_eq!(object_id_from_ref("/hierarchicalrequirement/678.js"), Some("678"));
        assert_eq!(object_id_from_ref(""), None);
    }

    #[test]
    fn test_work_item_from_value() {
        let raw = serde_json::json!({
            "_ref": "https://rally.example/slm/webservice/v2.0/hierarchicalrequirement/1",
            "FormattedID": "US1",
            "Name": "Login",
            "Description": "<p>Users log in</p>",
            "ScheduleState": "Defined",
            "PlanEstimate": 3.0
        });

        let item = work_item_from_value(&raw).unwrap();
        assert_eq!(item.id, "US1");
        assert_eq!(item.name, "Login");
        assert_eq!(item.state, "Defined");
        assert!(item.reference.ends_with("/1"));
        assert_eq!(item.details["PlanEstimate"], 3.0);
    }

    #[test]
    fn test_work_item_state_object_fallback() {
        let raw = serde_json::json!({
            "FormattedID": "US2",
            "Description": null,
            "State": { "_refObjectName": "Accepted" }
        });

        let item = work_item_from_value(&raw).unwrap();
        assert_eq!(item.state, "Accepted");
        assert!(item.description.is_empty());
    }

    #[test]
    fn test_work_item_requires_formatted_id() {
        let raw = serde_json::json!({ "Name": "Nameless" });
        assert!(matches!(work_item_from_value(&raw), Err(RallyError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_query_result() {
        let response = serde_json::json!({
            "QueryResult": {
                "TotalResultCount": 2,
                "StartIndex": 1,
                "PageSize": 1,
                "Results": [{ "FormattedID": "US1" }],
                "Errors": [],
                "Warnings": []
            }
        });

        let page = parse_query_result(response).unwrap();
        assert_eq!(page.total_result_count, 2);
        assert_eq!(page.results.len(), 1);
    }

    #[test]
    fn test_parse_query_result_errors() {
        let response = serde_json::json!({
            "QueryResult": { "TotalResultCount": 0, "Results": [], "Errors": ["Could not parse query"] }
        });

        match parse_query_result(response) {
            Err(RallyError::Api { message, .. }) => assert_eq!(message, "Could not parse query"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping() {
        let err: WorkflowError = RallyError::NotFound("US9".to_string()).into();
        assert!(matches!(err, WorkflowError::NotFound(id) if id == "US9"));

        let err: WorkflowError = RallyError::Unauthorized.into();
        assert!(matches!(err, WorkflowError::Transport(_)));
    }

    #[test]
    fn test_base_url_and_page_size() {
        let client = RallyClient::new("https://rally1.rallydev.com/", "key", "/workspace/1")
            .with_page_size(5000);
        assert_eq!(client.base_url(), "https://rally1.rallydev.com/slm/webservice/v2.0");
        assert_eq!(client.page_size, 2000);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = RallyConfig { api_key: None, ..RallyConfig::default() };
        assert!(matches!(RallyClient::from_config(&config), Err(RallyError::InvalidInput(_))));
    }

    #[test]
    fn test_format_dependency_graph() {
        let item = |id: &str| WorkItem {
            id: id.to_string(),
            name: format!("Story {}", id),
            description: String::new(),
            state: "Defined".to_string(),
            reference: format!("/hierarchicalrequirement/{}", id),
            details: Value::Null,
        };
        let graph = DependencyGraph {
            item: item("US1"),
            blocked_by: vec![DependencyEdge {
                predecessor_ref: "/hierarchicalrequirement/7".to_string(),
                successor_ref: "/hierarchicalrequirement/US1".to_string(),
                description: "needs schema".to_string(),
                item: None,
            }],
            blocking: vec![DependencyEdge {
                predecessor_ref: "/hierarchicalrequirement/US1".to_string(),
                successor_ref: "/hierarchicalrequirement/US3".to_string(),
                description: String::new(),
                item: Some(item("US3")),
            }],
        };

        let output = format_dependency_graph(&graph);
        assert!(output.contains("US1 Story US1 [Defined]"));
        assert!(output.contains("/hierarchicalrequirement/7 (unresolved) - needs schema"));
        assert!(output.contains("US3 Story US3"));
    }
}
