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

//! JSON-RPC 2.0 message envelope and URI utilities

use lsp_types::Uri;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::error::{BridgeError, Result};

// Standard JSON-RPC error codes, plus the LSP-specific ones we react to.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const REQUEST_CANCELLED: i64 = -32800;
pub const CONTENT_MODIFIED: i64 = -32801;

/// A request id. The client only ever allocates numbers (monotonic from 1),
/// but servers are allowed to use strings in their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(i64),
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{}", n),
			RequestId::String(s) => write!(f, "{}", s),
		}
	}
}

/// A JSON-RPC error object carried in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl ResponseError {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	pub fn method_not_found(method: &str) -> Self {
		Self::new(METHOD_NOT_FOUND, format!("method not found: {}", method))
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(INTERNAL_ERROR, message)
	}
}

/// The single wire envelope shared by requests, responses and notifications.
///
/// Which of the optional fields are present determines the message shape;
/// see [`Message::kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
	pub jsonrpc: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<RequestId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// Message shape, decided by field presence rather than by who opened the
/// channel. The same transport carries both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
	/// `id` + `method`: a request that expects a reply keyed by that id.
	Request,
	/// `id` without `method`: a reply to one of our requests.
	Response,
	/// `method` without `id`: fire-and-forget.
	Notification,
	/// Neither `id` nor `method`; not valid JSON-RPC.
	Invalid,
}

impl Message {
	pub fn request(id: i64, method: &str, params: Value) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id: Some(RequestId::Number(id)),
			method: Some(method.to_string()),
			params: Some(params),
			result: None,
			error: None,
		}
	}

	pub fn notification(method: &str, params: Value) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id: None,
			method: Some(method.to_string()),
			params: Some(params),
			result: None,
			error: None,
		}
	}

	pub fn response(id: RequestId, result: Value) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id: Some(id),
			method: None,
			params: None,
			result: Some(result),
			error: None,
		}
	}

	pub fn error_response(id: RequestId, error: ResponseError) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id: Some(id),
			method: None,
			params: None,
			result: None,
			error: Some(error),
		}
	}

	pub fn kind(&self) -> MessageKind {
		match (&self.id, &self.method) {
			(Some(_), Some(_)) => MessageKind::Request,
			(Some(_), None) => MessageKind::Response,
			(None, Some(_)) => MessageKind::Notification,
			(None, None) => MessageKind::Invalid,
		}
	}
}

/// Convert a filesystem path to a `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
	let url = Url::from_file_path(path).map_err(|_| {
		BridgeError::InvalidInput(format!("cannot convert path to URI: {}", path.display()))
	})?;
	Uri::from_str(url.as_str())
		.map_err(|e| BridgeError::InvalidInput(format!("invalid URI for {}: {}", path.display(), e)))
}

/// Convert a `file://` URI back to a filesystem path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
	let url = Url::parse(uri.as_str())
		.map_err(|e| BridgeError::InvalidInput(format!("unparseable URI {}: {}", uri.as_str(), e)))?;
	url.to_file_path()
		.map_err(|_| BridgeError::InvalidInput(format!("URI is not a file path: {}", uri.as_str())))
}

/// Resolve a possibly-relative path against the workspace root.
pub fn resolve_workspace_path(root: &Path, path: &str) -> PathBuf {
	if Path::new(path).is_absolute() {
		PathBuf::from(path)
	} else {
		root.join(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn classifies_message_shapes() {
		let req = Message::request(1, "textDocument/hover", json!({}));
		assert_eq!(req.kind(), MessageKind::Request);

		let notif = Message::notification("initialized", json!({}));
		assert_eq!(notif.kind(), MessageKind::Notification);

		let resp = Message::response(RequestId::Number(1), json!(null));
		assert_eq!(resp.kind(), MessageKind::Response);

		let invalid: Message = serde_json::from_str(r#"{"jsonrpc":"2.0"}"#).unwrap();
		assert_eq!(invalid.kind(), MessageKind::Invalid);
	}

	#[test]
	fn deserializes_string_and_number_ids() {
		let m: Message =
			serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"m"}"#).unwrap();
		assert_eq!(m.id, Some(RequestId::String("abc".into())));

		let m: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
		assert_eq!(m.id, Some(RequestId::Number(7)));
	}

	#[test]
	fn notification_serializes_without_id() {
		let notif = Message::notification("exit", json!(null));
		let text = serde_json::to_string(&notif).unwrap();
		assert!(!text.contains("\"id\""));
		assert!(!text.contains("\"result\""));
	}

	#[test]
	fn path_uri_round_trip() {
		let path = Path::new("/tmp/workspace/src/main.rs");
		let uri = path_to_uri(path).unwrap();
		assert!(uri.as_str().starts_with("file://"));
		assert_eq!(uri_to_path(&uri).unwrap(), path);
	}

	#[test]
	fn resolves_relative_against_root() {
		let root = Path::new("/work");
		assert_eq!(
			resolve_workspace_path(root, "src/lib.rs"),
			PathBuf::from("/work/src/lib.rs")
		);
		assert_eq!(
			resolve_workspace_path(root, "/abs/file.go"),
			PathBuf::from("/abs/file.go")
		);
	}
}
