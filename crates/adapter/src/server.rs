//! MCP server handler backed by one [`ServiceAdapter`].

use crate::services::{ServiceAdapter, dispatch};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use std::future::Future;
use std::sync::Arc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AdapterServer {
    adapter: Arc<dyn ServiceAdapter>,
}

impl AdapterServer {
    #[must_use]
    pub fn new(adapter: Arc<dyn ServiceAdapter>) -> Self {
        Self { adapter }
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ServiceAdapter> {
        &self.adapter
    }
}

impl ServerHandler for AdapterServer {
    fn get_info(&self) -> ServerInfo {
        let service = self.adapter.service().name();
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: format!("yarr-mcp-{service}"),
                version: VERSION.to_string(),
                title: Some(format!("{service} MCP server")),
                ..Default::default()
            },
            instructions: Some(self.adapter.instructions().to_string()),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = self.adapter.tools().iter().map(|t| t.to_tool()).collect();
        std::future::ready(Ok(ListToolsResult {
            tools,
            ..Default::default()
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            dispatch(self.adapter.as_ref(), &request.name, request.arguments.as_ref())
                .await
                .ok_or_else(|| {
                    ErrorData::invalid_params(format!("unknown tool '{}'", request.name), None)
                })
        }
    }
}
