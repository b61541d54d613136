// Copyright 2025 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MCP request dispatch and the stdio transport loop

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{
	JsonRpcRequest, JsonRpcResponse, McpTool, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
	PARSE_ERROR,
};
use crate::lsp::transport;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Something that can list and execute MCP tools. Injected so the dispatch
/// logic stays testable without a language server behind it.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
	fn definitions(&self) -> Vec<McpTool>;
	async fn call(&self, name: &str, arguments: &Value) -> Result<String>;
}

/// MCP server: one dispatch core shared by the stdio and HTTP transports.
pub struct McpServer {
	tools: Arc<dyn ToolProvider>,
}

impl McpServer {
	pub fn new(tools: Arc<dyn ToolProvider>) -> Self {
		Self { tools }
	}

	/// Dispatch one request. Notifications yield `None` (no reply frame).
	pub async fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
		if request.jsonrpc != "2.0" {
			return Some(JsonRpcResponse::error(
				request.id.clone(),
				INVALID_REQUEST,
				"invalid request: jsonrpc must be \"2.0\"",
			));
		}

		debug!(method = %request.method, "mcp request");
		match request.method.as_str() {
			"initialize" => Some(self.handle_initialize(request)),
			"ping" => Some(JsonRpcResponse::ok(request.id.clone(), json!({}))),
			"tools/list" => Some(JsonRpcResponse::ok(
				request.id.clone(),
				json!({ "tools": self.tools.definitions() }),
			)),
			"tools/call" => Some(self.handle_tools_call(request).await),
			// The client's post-initialize acknowledgement; no reply.
			"notifications/initialized" => None,
			_ if request.id.is_none() => {
				debug!(method = %request.method, "ignoring unknown notification");
				None
			}
			other => Some(JsonRpcResponse::error(
				request.id.clone(),
				METHOD_NOT_FOUND,
				format!("method not found: {}", other),
			)),
		}
	}

	fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
		JsonRpcResponse::ok(
			request.id.clone(),
			json!({
				"protocolVersion": MCP_PROTOCOL_VERSION,
				"capabilities": {
					"tools": { "listChanged": false }
				},
				"serverInfo": {
					"name": "octolsp",
					"version": env!("CARGO_PKG_VERSION"),
					"description": "Language server bridge exposing code intelligence (definition, references, diagnostics, hover, rename, edits) as MCP tools"
				},
				"instructions": "This server runs a language server over the configured workspace. Use 'definition' and 'references' with qualified symbol names, 'diagnostics'/'hover' with file paths, 'rename_symbol' for project-wide renames and 'edit_file' for line-based edits."
			}),
		)
	}

	async fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
		let Some(params) = &request.params else {
			return JsonRpcResponse::error(
				request.id.clone(),
				INVALID_PARAMS,
				"invalid params: missing parameters object",
			);
		};
		let Some(name) = params.get("name").and_then(Value::as_str) else {
			return JsonRpcResponse::error(
				request.id.clone(),
				INVALID_PARAMS,
				"invalid params: missing tool name",
			);
		};
		let default_args = json!({});
		let arguments = params.get("arguments").unwrap_or(&default_args);

		match self.tools.call(name, arguments).await {
			Ok(text) => JsonRpcResponse::tool_text(request.id.clone(), text),
			Err(e) => {
				debug!(tool = name, err = %e, "tool call failed");
				JsonRpcResponse::tool_error(request.id.clone(), format!("{} failed: {:#}", name, e))
			}
		}
	}

	/// Serve MCP over stdin/stdout with the same header framing the LSP
	/// side uses. Runs until EOF or cancellation.
	pub async fn run_stdio(&self, ctx: CancellationToken) -> Result<()> {
		let mut reader = BufReader::new(tokio::io::stdin());
		let mut writer = tokio::io::stdout();

		loop {
			tokio::select! {
				biased;

				_ = ctx.cancelled() => break,

				frame = transport::read_frame(&mut reader) => {
					let body = match frame {
						Ok(Some(body)) => body,
						Ok(None) => {
							debug!("mcp client closed stdin");
							break;
						}
						Err(e) => {
							warn!(err = %e, "mcp stdio transport error");
							break;
						}
					};

					let response = match serde_json::from_slice::<JsonRpcRequest>(&body) {
						Ok(request) => self.handle_request(&request).await,
						Err(e) => Some(JsonRpcResponse::error(
							None,
							PARSE_ERROR,
							format!("parse error: {}", e),
						)),
					};

					if let Some(response) = response {
						let body = serde_json::to_vec(&response)?;
						transport::write_frame(&mut writer, &body).await?;
					}
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct StubTools;

	#[async_trait::async_trait]
	impl ToolProvider for StubTools {
		fn definitions(&self) -> Vec<McpTool> {
			vec![McpTool {
				name: "hover".into(),
				description: "stub".into(),
				input_schema: json!({"type": "object"}),
			}]
		}

		async fn call(&self, name: &str, _arguments: &Value) -> Result<String> {
			match name {
				"hover" => Ok("hover text".into()),
				other => Err(anyhow::anyhow!("unknown tool '{}'", other)),
			}
		}
	}

	fn server() -> McpServer {
		McpServer::new(Arc::new(StubTools))
	}

	fn request(method: &str, id: Option<Value>, params: Option<Value>) -> JsonRpcRequest {
		JsonRpcRequest {
			jsonrpc: "2.0".into(),
			id,
			method: method.into(),
			params,
		}
	}

	#[tokio::test]
	async fn initialize_reports_protocol_and_tools_capability() {
		let response = server()
			.handle_request(&request("initialize", Some(json!(1)), None))
			.await
			.unwrap();
		let result = response.result.unwrap();
		assert_eq!(result["protocolVersion"], json!(MCP_PROTOCOL_VERSION));
		assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(false));
	}

	#[tokio::test]
	async fn tools_list_returns_definitions() {
		let response = server()
			.handle_request(&request("tools/list", Some(json!(2)), None))
			.await
			.unwrap();
		let tools = response.result.unwrap()["tools"].clone();
		assert_eq!(tools[0]["name"], json!("hover"));
	}

	#[tokio::test]
	async fn tools_call_success_and_failure() {
		let srv = server();

		let ok = srv
			.handle_request(&request(
				"tools/call",
				Some(json!(3)),
				Some(json!({"name": "hover", "arguments": {}})),
			))
			.await
			.unwrap();
		assert_eq!(ok.result.unwrap()["content"][0]["text"], json!("hover text"));

		let failed = srv
			.handle_request(&request(
				"tools/call",
				Some(json!(4)),
				Some(json!({"name": "nope"})),
			))
			.await
			.unwrap();
		let result = failed.result.unwrap();
		assert_eq!(result["isError"], json!(true));
	}

	#[tokio::test]
	async fn missing_tool_name_is_invalid_params() {
		let response = server()
			.handle_request(&request("tools/call", Some(json!(5)), Some(json!({}))))
			.await
			.unwrap();
		assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
	}

	#[tokio::test]
	async fn unknown_method_with_id_is_method_not_found() {
		let response = server()
			.handle_request(&request("resources/list", Some(json!(6)), None))
			.await
			.unwrap();
		assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
	}

	#[tokio::test]
	async fn notifications_get_no_reply() {
		assert!(server()
			.handle_request(&request("notifications/initialized", None, None))
			.await
			.is_none());
		assert!(server()
			.handle_request(&request("notifications/cancelled", None, None))
			.await
			.is_none());
	}
}
