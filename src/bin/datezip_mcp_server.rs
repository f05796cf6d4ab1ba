//! # datezip MCP Server - workspace time machine for agents
//!
//! Exposes the datezip tool surface over the Model Context Protocol on stdio,
//! so an agent can snapshot the workspace before risky edits, audit what
//! changed, read old file versions and roll back.
//!
//! ## Usage with Claude Desktop
//! ```json
//! {
//!   "mcpServers": {
//!     "datezip": {
//!       "command": "path/to/datezip_mcp_server",
//!       "args": ["--path", "/path/to/project"]
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use clap::Parser;
use datezip::tools::{
    CleanupBackupsRequest, CreateBackupRequest, GetHistoricalContentRequest, GetHistoryRequest,
    RestoreStateRequest, ToolResult,
};
use datezip::{DatezipBuilder, DatezipTools, DEFAULT_STORE_DIR};
use rmcp::{
    Error as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{self, EnvFilter};

/// Server options
#[derive(Parser)]
#[command(name = "datezip_mcp_server")]
#[command(version)]
#[command(about = "MCP server exposing datezip backups over stdio")]
struct Args {
    /// Workspace directory (defaults to current)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Store directory (defaults to <path>/.datezip)
    #[arg(short, long)]
    store: Option<PathBuf>,
}

/// datezip MCP Server
#[derive(Clone)]
pub struct DatezipMcpServer {
    tools: DatezipTools,
    tool_router: ToolRouter<Self>,
}

/// Render a tool result: JSON on success, a structured error result otherwise
fn respond<T: Serialize>(result: ToolResult<T>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => {
            let json = serde_json::to_string_pretty(&value)
                .map_err(|e| McpError::internal_error(format!("Failed to encode response: {}", e), None))?;
            Ok(CallToolResult::success(vec![Content::text(json)]))
        }
        Err(failure) => {
            let json = serde_json::to_string_pretty(&failure)
                .map_err(|e| McpError::internal_error(format!("Failed to encode failure: {}", e), None))?;
            Ok(CallToolResult::error(vec![Content::text(json)]))
        }
    }
}

#[tool_router]
impl DatezipMcpServer {
    pub fn new(tools: DatezipTools) -> Self {
        Self {
            tools,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Snapshot the workspace. Call this BEFORE large refactors, risky deletions or \
        experimental changes. mode: 'auto' (default, recommended) lets the store decide between a full \
        and an incremental archive; 'full' starts a new chain; 'inc' forces a small incremental update.")]
    async fn create_backup(
        &self,
        Parameters(params): Parameters<CreateBackupRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.tools.create_backup(params).await)
    }

    #[tool(description = "List every backup archive with its filename, timestamp and type (FULL or INC).")]
    async fn list_backups(&self) -> Result<CallToolResult, McpError> {
        respond(self.tools.list_backups().await)
    }

    #[tool(description = "Per-file change history. Use it first to find the exact timestamp needed by \
        get_historical_content and restore_state. Optional filters: files (exact paths, recommended), \
        from_ts and to_ts (inclusive, YYYYMMDD_HHMMSS). Status 'new' means created or first seen, \
        'modified' means the content changed.")]
    async fn get_history(
        &self,
        Parameters(params): Parameters<GetHistoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.tools.get_history(params).await)
    }

    #[tool(description = "SAFE READ. Return a file's content as of an exact archive timestamp without \
        touching the workspace. Use it to compare old and new code or recover a deleted function.")]
    async fn get_historical_content(
        &self,
        Parameters(params): Parameters<GetHistoricalContentRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.tools.get_historical_content(params).await)
    }

    #[tool(description = "DESTRUCTIVE. Overwrite workspace files with their state at an exact timestamp. \
        Pass specific files whenever possible; omitting files restores the entire project. restore_type \
        'e' (default) folds the chain up to the timestamp, 'j' uses only that archive. Prefer \
        get_historical_content unless the user asked to revert.")]
    async fn restore_state(
        &self,
        Parameters(params): Parameters<RestoreStateRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.tools.restore_state(params).await)
    }

    #[tool(description = "Delete old backup chains. Keeps the keep_full newest chains (default 10) and any \
        chain younger than keep_days (default 14). Only use when the user asks to free disk space.")]
    async fn cleanup_backups(
        &self,
        Parameters(params): Parameters<CleanupBackupsRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.tools.cleanup_backups(params).await)
    }
}

#[tool_handler]
impl ServerHandler for DatezipMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "datezip-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "datezip is a local time machine for this workspace. Snapshot with create_backup before \
                risky operations, find timestamps with get_history, read old versions with \
                get_historical_content, and only use restore_state when the user asks to revert."
                    .to_string(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let root = args.path.unwrap_or_else(|| PathBuf::from("."));
    let store = args.store.unwrap_or_else(|| root.join(DEFAULT_STORE_DIR));

    tracing::info!("Starting datezip MCP server for {:?}", root);
    let datezip = DatezipBuilder::new().build(root, store)?;
    let server = DatezipMcpServer::new(DatezipTools::new(Arc::new(datezip)));

    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
