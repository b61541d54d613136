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

//! Header-framed message I/O shared by the LSP and MCP stdio transports
//!
//! Each frame is an ASCII header block (CRLF-terminated fields, blank-line
//! terminator) with a mandatory `Content-Length`, followed by exactly that
//! many bytes of UTF-8 JSON.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::ChildStderr;
use tracing::debug;

use super::protocol::Message;
use crate::error::{BridgeError, Result};

/// Read one complete frame body. Returns `Ok(None)` on a clean EOF at a
/// frame boundary; EOF mid-frame is a `TransportClosed` error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
	R: AsyncBufReadExt + Unpin,
{
	let mut content_length: Option<usize> = None;
	let mut saw_header = false;

	loop {
		let mut line = String::new();
		let n = reader.read_line(&mut line).await?;
		if n == 0 {
			if saw_header {
				return Err(BridgeError::TransportClosed);
			}
			return Ok(None);
		}
		saw_header = true;

		let line = line.trim_end_matches(['\r', '\n']);
		if line.is_empty() {
			break;
		}

		// Header names are case-insensitive; unknown headers are ignored.
		if let Some((name, value)) = line.split_once(':') {
			if name.trim().eq_ignore_ascii_case("content-length") {
				let length = value.trim().parse::<usize>().map_err(|_| {
					BridgeError::TransportProtocol(format!("bad Content-Length: {}", value.trim()))
				})?;
				content_length = Some(length);
			}
		}
	}

	let length = content_length
		.ok_or_else(|| BridgeError::TransportProtocol("missing Content-Length header".into()))?;

	let mut body = vec![0u8; length];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|_| BridgeError::TransportClosed)?;
	Ok(Some(body))
}

/// Write a raw frame: `Content-Length: N\r\n\r\n` followed by the body.
/// Callers serialize writes with a lock; a single frame is never interleaved.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let header = format!("Content-Length: {}\r\n\r\n", body.len());
	writer.write_all(header.as_bytes()).await?;
	writer.write_all(body).await?;
	writer.flush().await?;
	Ok(())
}

/// Serialize and write a protocol message as one frame.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let body = serde_json::to_vec(message)?;
	write_frame(writer, &body).await
}

/// Forward the child's stderr line-by-line into the logging sink. The
/// stream never carries protocol data, so failures here only end the task.
pub async fn forward_stderr(stderr: ChildStderr) {
	let mut lines = BufReader::new(stderr).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		debug!(target: "lsp_server", "{}", line);
	}
	debug!(target: "lsp_server", "stderr stream closed");
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tokio::io::{duplex, split, AsyncWriteExt, BufReader};

	#[tokio::test]
	async fn frame_round_trip() {
		let (a, b) = duplex(4096);
		let (read_half, _) = split(a);
		let (_, mut write_half) = split(b);

		let msg = Message::request(1, "initialize", json!({"processId": 42}));
		write_message(&mut write_half, &msg).await.unwrap();

		let mut reader = BufReader::new(read_half);
		let body = read_frame(&mut reader).await.unwrap().unwrap();
		let parsed: Message = serde_json::from_slice(&body).unwrap();
		assert_eq!(parsed.method.as_deref(), Some("initialize"));
	}

	#[tokio::test]
	async fn header_names_are_case_insensitive() {
		let (a, b) = duplex(4096);
		let (read_half, _) = split(a);
		let (_, mut write_half) = split(b);

		write_half
			.write_all(b"content-length: 2\r\ncontent-type: application/json\r\n\r\n{}")
			.await
			.unwrap();

		let mut reader = BufReader::new(read_half);
		let body = read_frame(&mut reader).await.unwrap().unwrap();
		assert_eq!(body, b"{}");
	}

	#[tokio::test]
	async fn missing_content_length_is_protocol_error() {
		let (a, b) = duplex(4096);
		let (read_half, _) = split(a);
		let (_, mut write_half) = split(b);

		write_half.write_all(b"X-Other: 1\r\n\r\n").await.unwrap();

		let mut reader = BufReader::new(read_half);
		let err = read_frame(&mut reader).await.unwrap_err();
		assert!(matches!(err, BridgeError::TransportProtocol(_)));
	}

	#[tokio::test]
	async fn clean_eof_yields_none() {
		let (a, b) = duplex(64);
		let (read_half, _) = split(a);
		drop(b);

		let mut reader = BufReader::new(read_half);
		assert!(read_frame(&mut reader).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn eof_mid_frame_is_transport_closed() {
		let (a, b) = duplex(4096);
		let (read_half, _) = split(a);
		let (_, mut write_half) = split(b);

		// Announce 100 bytes but deliver only 3, then close.
		write_half
			.write_all(b"Content-Length: 100\r\n\r\n{\"a")
			.await
			.unwrap();
		drop(write_half);

		let mut reader = BufReader::new(read_half);
		let err = read_frame(&mut reader).await.unwrap_err();
		assert!(matches!(err, BridgeError::TransportClosed));
	}
}
