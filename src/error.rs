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

//! Error taxonomy shared by the LSP client core and the tool layer

use thiserror::Error;

/// Errors produced by the LSP session and the tools built on top of it.
///
/// Transport errors are unrecoverable for the session; everything else is
/// per-request and is surfaced to the MCP caller without tearing anything
/// down.
#[derive(Debug, Error)]
pub enum BridgeError {
	/// The connection to the language server closed (EOF or broken pipe).
	#[error("language server transport closed")]
	TransportClosed,

	/// The byte stream violated the header framing rules.
	#[error("transport protocol error: {0}")]
	TransportProtocol(String),

	/// The language server answered a request with a JSON-RPC error object.
	#[error("language server error {code}: {message}")]
	Rpc { code: i64, message: String },

	/// The server did not declare the capability required by an operation.
	/// No wire call is made in this case.
	#[error("'{operation}' is not supported by this language server")]
	Unsupported { operation: &'static str },

	/// The caller cancelled the operation. Not logged as an error.
	#[error("request cancelled")]
	Cancelled,

	/// The caller's deadline elapsed. Not logged as an error.
	#[error("deadline exceeded")]
	DeadlineExceeded,

	/// Tool-layer validation failure (bad line range, missing file, ...).
	#[error("invalid input: {0}")]
	InvalidInput(String),

	/// A tool was invoked before the readiness gate opened and the wait
	/// for readiness timed out.
	#[error("language server is not ready yet, try again shortly")]
	NotReady,

	/// A workspace edit failed partway and one or more files could not be
	/// restored to their prior contents.
	#[error("workspace edit failed and rollback was incomplete for: {}", .files.join(", "))]
	ApplyEditFailed { files: Vec<String> },

	/// The session was closed while requests were still outstanding.
	#[error("session closed")]
	SessionClosed,

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl BridgeError {
	/// Caller-initiated terminations are expected flow, not failures.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, Self::Cancelled | Self::DeadlineExceeded)
	}

	/// Whether the error ends the whole session rather than one request.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Self::TransportClosed | Self::TransportProtocol(_) | Self::SessionClosed
		)
	}
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancellation_kinds_are_not_fatal() {
		assert!(BridgeError::Cancelled.is_cancellation());
		assert!(BridgeError::DeadlineExceeded.is_cancellation());
		assert!(!BridgeError::Cancelled.is_fatal());
	}

	#[test]
	fn transport_errors_are_fatal() {
		assert!(BridgeError::TransportClosed.is_fatal());
		assert!(BridgeError::TransportProtocol("short read".into()).is_fatal());
		assert!(!BridgeError::NotReady.is_fatal());
	}

	#[test]
	fn apply_edit_failure_lists_files() {
		let err = BridgeError::ApplyEditFailed {
			files: vec!["a.ts".into(), "b.ts".into()],
		};
		assert!(err.to_string().contains("a.ts, b.ts"));
	}
}
