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

//! Streamable HTTP transport for the MCP surface
//!
//! POST / with a JSON-RPC body. Plain JSON by default; clients that send
//! `Accept: text/event-stream` get the response as a single SSE event.

use anyhow::Result;
use axum::{
	extract::State,
	http::{header, HeaderMap, StatusCode},
	response::{
		sse::{Event, Sse},
		IntoResponse,
	},
	routing::post,
	Json, Router,
};
use futures_util::stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::server::McpServer;
use super::types::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};

/// How long in-flight requests get to finish after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve(server: Arc<McpServer>, port: u16, ctx: CancellationToken) -> Result<()> {
	let router = Router::new().route("/", post(handle_post)).with_state(server);

	let addr: SocketAddr = ([0, 0, 0, 0], port).into();
	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!(addr = %addr, "MCP HTTP server listening");

	let shutdown = ctx.clone();
	let serve_future = axum::serve(listener, router)
		.with_graceful_shutdown(async move { shutdown.cancelled().await });

	tokio::select! {
		result = serve_future => result?,
		_ = async {
			ctx.cancelled().await;
			tokio::time::sleep(DRAIN_TIMEOUT).await;
		} => {
			warn!("HTTP drain timed out, aborting open connections");
		}
	}

	info!("MCP HTTP server stopped");
	Ok(())
}

async fn handle_post(
	State(server): State<Arc<McpServer>>,
	headers: HeaderMap,
	body: String,
) -> axum::response::Response {
	let response = match serde_json::from_str::<JsonRpcRequest>(&body) {
		Ok(request) => server.handle_request(&request).await,
		Err(e) => Some(JsonRpcResponse::error(
			None,
			PARSE_ERROR,
			format!("parse error: {}", e),
		)),
	};

	let Some(response) = response else {
		// Notification: acknowledged, nothing to stream back.
		return StatusCode::ACCEPTED.into_response();
	};

	if wants_event_stream(&headers) {
		let payload = serde_json::to_string(&response).unwrap_or_default();
		let events = stream::once(async move {
			Ok::<_, Infallible>(Event::default().event("message").data(payload))
		});
		Sse::new(events).into_response()
	} else {
		Json(response).into_response()
	}
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
	headers
		.get(header::ACCEPT)
		.and_then(|value| value.to_str().ok())
		.map(|accept| accept.contains("text/event-stream"))
		.unwrap_or(false)
}
