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

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// MCP protocol types
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
	pub jsonrpc: String,
	pub id: Option<Value>,
	pub method: String,
	pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: String,
	pub id: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i32,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

impl JsonRpcResponse {
	pub fn ok(id: Option<Value>, result: Value) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id,
			result: None,
			error: Some(JsonRpcError {
				code,
				message: message.into(),
				data: None,
			}),
		}
	}

	/// Tool failures travel as successful responses with `isError` set, so
	/// the model sees the failure text instead of a protocol fault.
	pub fn tool_error(id: Option<Value>, text: impl Into<String>) -> Self {
		Self::ok(
			id,
			json!({
				"content": [{ "type": "text", "text": text.into() }],
				"isError": true
			}),
		)
	}

	pub fn tool_text(id: Option<Value>, text: impl Into<String>) -> Self {
		Self::ok(
			id,
			json!({
				"content": [{ "type": "text", "text": text.into() }]
			}),
		)
	}
}

/// MCP tool descriptor for `tools/list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct McpTool {
	pub name: String,
	pub description: String,
	#[serde(rename = "inputSchema")]
	pub input_schema: Value,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tool_error_is_a_successful_response() {
		let response = JsonRpcResponse::tool_error(Some(json!(3)), "boom");
		assert!(response.error.is_none());
		let result = response.result.unwrap();
		assert_eq!(result["isError"], json!(true));
		assert_eq!(result["content"][0]["text"], json!("boom"));
	}

	#[test]
	fn error_response_serializes_without_result() {
		let response = JsonRpcResponse::error(Some(json!(1)), METHOD_NOT_FOUND, "nope");
		let text = serde_json::to_string(&response).unwrap();
		assert!(!text.contains("\"result\""));
		assert!(text.contains("-32601"));
	}
}
