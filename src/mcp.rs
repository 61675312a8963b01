//! MCP JSON-RPC bridge over the capability gateway.
//!
//! `tools/list` returns the caller's manifest and `tools/call` runs
//! [`Gateway::invoke`]. The bearer token and client address come from the
//! HTTP request parts that the Streamable HTTP transport attaches to each
//! request context, so MCP clients go through the same authentication,
//! rate limiting, and permission checks as `POST /mcp/invoke`.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};

use brandkb_core::error::KbError;
use brandkb_core::models::Permission;

use crate::gateway::{CapabilityDescriptor, Gateway, SERVER_NAME};
use crate::rate_limit::client_ip;
use crate::server::bearer_token;

#[derive(Clone)]
pub struct McpBridge {
    gateway: Arc<Gateway>,
}

impl McpBridge {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    fn to_mcp_tool(descriptor: CapabilityDescriptor) -> Tool {
        let input_schema = match descriptor.parameters {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        let read_only = descriptor.required_permission == Permission::ReadKb;

        Tool {
            name: Cow::Owned(descriptor.name),
            title: None,
            description: Some(Cow::Owned(descriptor.description)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(read_only)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

/// Bearer secret and client address of the HTTP request behind `context`.
fn caller(context: &RequestContext<RoleServer>) -> Result<(String, String), McpError> {
    let parts = context
        .extensions
        .get::<Parts>()
        .ok_or_else(|| McpError::new(ErrorCode::INTERNAL_ERROR, "missing HTTP request context", None))?;

    let secret = bearer_token(&parts.headers).ok_or_else(unauthorized)?;
    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    Ok((secret, client_ip(&parts.headers, remote)))
}

fn unauthorized() -> McpError {
    McpError::new(
        ErrorCode::INVALID_REQUEST,
        KbError::InvalidToken.public_message(),
        None,
    )
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("Brand Knowledge Base".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Brand knowledge base. Use queryKB to search, getKBEntry and listKBEntries \
                 to browse entries. Write tools appear only for read_write_kb tokens."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let (secret, _) = caller(&context)?;
        let manifest = self.gateway.manifest(&secret).await.map_err(|e| match e {
            KbError::InvalidToken => unauthorized(),
            other => McpError::new(ErrorCode::INTERNAL_ERROR, other.public_message(), None),
        })?;

        let tools = manifest
            .capabilities
            .into_iter()
            .map(Self::to_mcp_tool)
            .collect();
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let (secret, ip) = caller(&context)?;
        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.gateway.invoke(&secret, &ip, &request.name, params).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(KbError::InvalidToken) => Err(unauthorized()),
            Err(e) => {
                let body = serde_json::json!({
                    "code": e.kind().code(),
                    "message": e.public_message(),
                });
                Ok(CallToolResult::error(vec![Content::text(body.to_string())]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptor_conversion() {
        let tool = McpBridge::to_mcp_tool(CapabilityDescriptor {
            name: "queryKB".into(),
            description: "search".into(),
            required_permission: Permission::ReadKb,
            parameters: serde_json::json!({ "type": "object", "required": ["query"] }),
        });
        assert_eq!(tool.name, "queryKB");
        assert_eq!(tool.input_schema.get("type").unwrap(), "object");
        assert_eq!(tool.annotations.unwrap().read_only_hint, Some(true));
    }
}
