use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
};
use serde_json::Value;

use crate::dispatch::{Dispatcher, Method, RpcError};

/// MCP server exposing one tool per control-plane operation.
pub struct MinionServer {
    dispatcher: Dispatcher,
}

impl MinionServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

fn minion_info() -> ServerInfo {
    ServerInfo {
        protocol_version: Default::default(),
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        server_info: rmcp::model::Implementation::from_build_env(),
        instructions: Some(
            "minion supervisor -- install, control and sample managed services".into(),
        ),
    }
}

fn input_schema(method: Method) -> Value {
    if method == Method::Install {
        return serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Service id; letters, digits, '_', '.', '-'"
                },
                "sourceLocator": {
                    "type": "string",
                    "description": "Where the build step fetches the service from"
                },
                "params": {
                    "type": "object",
                    "description": "Install parameters passed to the service's install command"
                }
            },
            "required": ["id", "sourceLocator"]
        });
    }
    if method.takes_id() {
        return serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Service id" }
            },
            "required": ["id"]
        });
    }
    serde_json::json!({ "type": "object", "properties": {} })
}

pub fn tool(method: Method) -> Tool {
    Tool {
        name: method.name().into(),
        title: None,
        description: Some(method.description().into()),
        input_schema: input_schema(method).as_object().cloned().unwrap_or_default().into(),
        output_schema: None,
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
    }
}

/// Strings are returned verbatim, everything else as JSON text. Errors carry
/// the structured `{kind, message}` body.
pub fn tool_result(result: Result<Value, RpcError>) -> CallToolResult {
    let (text, is_error) = match result {
        Ok(Value::String(text)) => (text, false),
        Ok(value) => (value.to_string(), false),
        Err(e) => (
            serde_json::to_string(&e).unwrap_or_else(|_| e.to_string()),
            true,
        ),
    };
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(is_error),
        meta: None,
    }
}

impl ServerHandler for MinionServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(
            Method::ALL.into_iter().map(tool).collect(),
        ))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name: &str = &request.name;
        let method = Method::from_name(name)
            .ok_or_else(|| McpError::invalid_params(format!("unknown tool: {name}"), None))?;
        let params = request.arguments.map(Value::Object).unwrap_or(Value::Null);

        tracing::info!(tool = name, "Handling tool call");
        let result = self.dispatcher.invoke(method, params).await;
        if let Err(e) = &result {
            tracing::warn!(tool = name, kind = %e.kind, "Tool call failed: {}", e.message);
        }
        Ok(tool_result(result))
    }

    fn get_info(&self) -> ServerInfo {
        minion_info()
    }
}
