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

//! MCP tool registration: schemas, argument decoding and dispatch

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::server::ToolProvider;
use super::types::McpTool;
use crate::error::BridgeError;
use crate::lsp::LspClient;
use crate::tools;
use crate::tools::edit::LineEdit;

/// How long a tool blocks behind the readiness gate before failing NotReady.
const READY_WAIT: Duration = Duration::from_secs(10);
/// Per-tool deadline; an expiry cancels the in-flight LSP requests.
const TOOL_DEADLINE: Duration = Duration::from_secs(60);

pub struct ToolRegistry {
	client: Arc<LspClient>,
	root_ctx: CancellationToken,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionParams {
	symbol_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferencesParams {
	symbol_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsParams {
	file_path: String,
	#[serde(default = "default_context_lines")]
	context_lines: u32,
	#[serde(default = "default_show_line_numbers")]
	show_line_numbers: bool,
}

fn default_context_lines() -> u32 {
	5
}

fn default_show_line_numbers() -> bool {
	true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoverParams {
	file_path: String,
	line: u32,
	column: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameSymbolParams {
	file_path: String,
	line: u32,
	column: u32,
	new_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditFileParams {
	file_path: String,
	edits: Vec<LineEdit>,
}

impl ToolRegistry {
	pub fn new(client: Arc<LspClient>, root_ctx: CancellationToken) -> Self {
		Self { client, root_ctx }
	}

	async fn dispatch(&self, name: &str, arguments: &Value, ctx: &CancellationToken) -> Result<String> {
		match name {
			"definition" => {
				let params: DefinitionParams = decode(arguments)?;
				tools::definition::read_definition(&self.client, &params.symbol_name, ctx).await
			}
			"references" => {
				let params: ReferencesParams = decode(arguments)?;
				tools::references::find_references(&self.client, &params.symbol_name, ctx).await
			}
			"diagnostics" => {
				let params: DiagnosticsParams = decode(arguments)?;
				tools::diagnostics::file_diagnostics(
					&self.client,
					&params.file_path,
					params.context_lines,
					params.show_line_numbers,
				)
				.await
			}
			"hover" => {
				let params: HoverParams = decode(arguments)?;
				tools::hover::hover_info(
					&self.client,
					&params.file_path,
					params.line,
					params.column,
					ctx,
				)
				.await
			}
			"rename_symbol" => {
				let params: RenameSymbolParams = decode(arguments)?;
				tools::rename::rename_symbol(
					&self.client,
					&params.file_path,
					params.line,
					params.column,
					&params.new_name,
					ctx,
				)
				.await
			}
			"edit_file" => {
				let params: EditFileParams = decode(arguments)?;
				tools::edit::edit_file(&self.client, &params.file_path, &params.edits).await
			}
			other => Err(anyhow::anyhow!(
				"unknown tool '{}'. Available tools: definition, references, diagnostics, hover, rename_symbol, edit_file",
				other
			)),
		}
	}
}

fn decode<'a, T: Deserialize<'a>>(arguments: &'a Value) -> Result<T> {
	T::deserialize(arguments)
		.map_err(|e| BridgeError::InvalidInput(format!("bad tool arguments: {}", e)).into())
}

#[async_trait::async_trait]
impl ToolProvider for ToolRegistry {
	fn definitions(&self) -> Vec<McpTool> {
		vec![
			McpTool {
				name: "definition".to_string(),
				description: "Read the source code definition of a symbol (function, type, constant, etc.) from the codebase. Returns the complete implementation code where the symbol is defined.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"symbolName": {
							"type": "string",
							"description": "The name of the symbol whose definition you want to find (e.g. 'mypackage.MyFunction', 'MyType.MyMethod')"
						}
					},
					"required": ["symbolName"],
					"additionalProperties": false
				}),
			},
			McpTool {
				name: "references".to_string(),
				description: "Find all usages and references of a symbol throughout the codebase. Returns a list of all files and locations where the symbol appears.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"symbolName": {
							"type": "string",
							"description": "The name of the symbol to search for (e.g. 'mypackage.MyFunction', 'MyType')"
						}
					},
					"required": ["symbolName"],
					"additionalProperties": false
				}),
			},
			McpTool {
				name: "diagnostics".to_string(),
				description: "Get diagnostic information for a specific file from the language server.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"filePath": {
							"type": "string",
							"description": "The path to the file to get diagnostics for"
						},
						"contextLines": {
							"type": "integer",
							"default": 5,
							"description": "Lines to include around each diagnostic"
						},
						"showLineNumbers": {
							"type": "boolean",
							"default": true,
							"description": "If true adds line numbers to the output"
						}
					},
					"required": ["filePath"],
					"additionalProperties": false
				}),
			},
			McpTool {
				name: "hover".to_string(),
				description: "Get hover information (type, documentation) for a symbol at the specified position.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"filePath": {
							"type": "string",
							"description": "The path to the file to get hover information for"
						},
						"line": {
							"type": "integer",
							"minimum": 1,
							"description": "The line number where the hover is requested (1-indexed)"
						},
						"column": {
							"type": "integer",
							"minimum": 1,
							"description": "The column number where the hover is requested (1-indexed)"
						}
					},
					"required": ["filePath", "line", "column"],
					"additionalProperties": false
				}),
			},
			McpTool {
				name: "rename_symbol".to_string(),
				description: "Rename a symbol (variable, function, class, etc.) at the specified position and update all references throughout the codebase.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"filePath": {
							"type": "string",
							"description": "The path to the file containing the symbol to rename"
						},
						"line": {
							"type": "integer",
							"minimum": 1,
							"description": "The line number where the symbol is located (1-indexed)"
						},
						"column": {
							"type": "integer",
							"minimum": 1,
							"description": "The column number where the symbol is located (1-indexed)"
						},
						"newName": {
							"type": "string",
							"description": "The new name for the symbol"
						}
					},
					"required": ["filePath", "line", "column", "newName"],
					"additionalProperties": false
				}),
			},
			McpTool {
				name: "edit_file".to_string(),
				description: "Apply multiple text edits to a file. Edits are 1-indexed inclusive line ranges; leave newText blank to delete lines.".to_string(),
				input_schema: json!({
					"type": "object",
					"properties": {
						"filePath": {
							"type": "string",
							"description": "Path to the file to edit"
						},
						"edits": {
							"type": "array",
							"description": "List of edits to apply",
							"items": {
								"type": "object",
								"properties": {
									"startLine": {
										"type": "integer",
										"minimum": 1,
										"description": "Start line to replace, inclusive, one-indexed"
									},
									"endLine": {
										"type": "integer",
										"minimum": 1,
										"description": "End line to replace, inclusive, one-indexed"
									},
									"newText": {
										"type": "string",
										"description": "Replacement text. Leave blank to remove lines."
									}
								},
								"required": ["startLine", "endLine"]
							}
						}
					},
					"required": ["filePath", "edits"],
					"additionalProperties": false
				}),
			},
		]
	}

	async fn call(&self, name: &str, arguments: &Value) -> Result<String> {
		// Tool calls block behind the readiness gate, each with its own
		// deadline.
		self.client.ensure_ready(READY_WAIT).await?;

		let ctx = self.root_ctx.child_token();
		let deadline_ctx = ctx.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(TOOL_DEADLINE).await;
			deadline_ctx.cancel();
		});

		let result = self.dispatch(name, arguments, &ctx).await;
		timer.abort();

		match result {
			Err(e)
				if matches!(e.downcast_ref::<BridgeError>(), Some(BridgeError::Cancelled))
					&& !self.root_ctx.is_cancelled() =>
			{
				Err(BridgeError::DeadlineExceeded.into())
			}
			other => other,
		}
	}
}
