//! MCP server exposing the retrieval core to agents.
//!
//! Bridges the [`QueryService`] and [`IngestionPipeline`] onto the MCP
//! JSON-RPC protocol as a Streamable HTTP endpoint that Cursor, Claude, and
//! other MCP clients can connect to.
//!
//! Two tools are exposed:
//!
//! | Tool | Description |
//! |------|-------------|
//! | `search` | Hybrid search over the ingested corpus |
//! | `ingest` | Scan the document source and (re)index it |
//!
//! The endpoint is mounted at `/mcp` alongside a `/health` route. All
//! origins, methods, and headers are permitted to support browser-based
//! clients and cross-origin MCP tool calls.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use rmcp::model::*;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::ingest::IngestionPipeline;
use crate::query::{QueryService, SearchMode};
use crate::sources;

/// Bridges the retrieval services to the MCP JSON-RPC protocol.
///
/// Each MCP session receives a clone of this struct (everything is behind
/// `Arc`), so all sessions share the same corpus and admission gate.
#[derive(Clone)]
pub struct RetrievalBridge {
    config: Arc<Config>,
    query: Arc<QueryService>,
    pipeline: Option<Arc<IngestionPipeline>>,
}

impl RetrievalBridge {
    pub fn new(
        config: Arc<Config>,
        query: Arc<QueryService>,
        pipeline: Option<Arc<IngestionPipeline>>,
    ) -> Self {
        Self {
            config,
            query,
            pipeline,
        }
    }

    fn search_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language search query"
                },
                "k": {
                    "type": "integer",
                    "description": "Maximum number of results to return"
                },
                "mode": {
                    "type": "string",
                    "enum": ["hybrid", "vector", "lexical"],
                    "description": "Retrieval channels to use (default: hybrid)"
                }
            },
            "required": ["query"]
        });

        Tool {
            name: Cow::Borrowed("search"),
            title: None,
            description: Some(Cow::Borrowed(
                "Search the ingested corpus and return the most relevant passages \
                 with vector, lexical, and fused relevance scores.",
            )),
            input_schema: schema_map(schema),
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn ingest_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to scan (defaults to the configured source root)"
                }
            },
            "required": []
        });

        Tool {
            name: Cow::Borrowed("ingest"),
            title: None,
            description: Some(Cow::Borrowed(
                "Scan the document source, then parse, chunk, embed, and index \
                 new or changed documents. Unchanged documents are skipped.",
            )),
            input_schema: schema_map(schema),
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }

    async fn call_search(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("query must not be empty"))?;
        let k = args
            .get("k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or_else(|| self.query.default_k());
        let mode = match args.get("mode").and_then(|v| v.as_str()) {
            Some(m) => SearchMode::parse(m)?,
            None => SearchMode::Hybrid,
        };

        let hits = self.query.search(query, k, mode).await?;
        Ok(serde_json::json!({
            "count": hits.len(),
            "results": hits,
        }))
    }

    async fn call_ingest(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ingestion requires an embedding provider; set [embedding] in config"))?;

        let mut source = self
            .config
            .source
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no [source] configured"))?;
        if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
            source.root = path.into();
        }

        let docs = sources::scan(&source)?;
        let report = pipeline.ingest_all(docs).await;
        Ok(serde_json::to_value(report)?)
    }
}

fn schema_map(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

impl ServerHandler for RetrievalBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "retrieval-harness".to_string(),
                title: Some("Retrieval Harness".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Retrieval Harness — hybrid document retrieval for AI agents. \
                 Use the search tool to find relevant passages from the ingested \
                 corpus; use ingest to index new or changed documents."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = vec![Self::search_tool(), Self::ingest_tool()];
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        match name {
            "search" => Some(Self::search_tool()),
            "ingest" => Some(Self::ingest_tool()),
            _ => None,
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request.arguments.unwrap_or_default();

        let result = match &*request.name {
            "search" => self.call_search(&args).await,
            "ingest" => self.call_ingest(&args).await,
            other => {
                return Err(McpError::new(
                    ErrorCode::METHOD_NOT_FOUND,
                    format!("no tool registered with name: {other}"),
                    None,
                ))
            }
        };

        match result {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

// ============ HTTP serving ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start the MCP server and serve until the process terminates.
pub async fn run_server(config: Arc<Config>, bridge: RetrievalBridge) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let app = Router::new()
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp_service)
        .layer(cors);

    info!(bind = %bind_addr, "MCP server listening");
    println!("MCP server listening on http://{bind_addr}/mcp");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
