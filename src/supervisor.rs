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

//! Process lifecycle: startup order, signals, parent-death, shutdown

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, TransportMode};
use crate::lsp::LspClient;
use crate::mcp::{self, McpServer, ToolRegistry};
use crate::watcher::WorkspaceWatcher;

/// Bound on the `shutdown` request during teardown.
const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// How long the child gets to exit after `exit` before being killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(3);
/// Parent pid poll cadence for orphan detection.
const PARENT_POLL: Duration = Duration::from_millis(100);

pub async fn run(config: ServerConfig) -> Result<()> {
	let root_ctx = CancellationToken::new();

	let client = LspClient::spawn(&config.lsp_command, &config.lsp_args, &config.workspace)
		.await
		.context("failed to start language server")?;

	let result = run_with_client(&config, client.clone(), root_ctx.clone()).await;

	// Teardown runs on every path, success or failure.
	root_ctx.cancel();
	shutdown_sequence(&client).await;
	result
}

async fn run_with_client(
	config: &ServerConfig,
	client: Arc<LspClient>,
	root_ctx: CancellationToken,
) -> Result<()> {
	spawn_shutdown_triggers(root_ctx.clone());

	client
		.initialize(&root_ctx)
		.await
		.context("LSP initialize handshake failed")?;

	// The watcher lives strictly inside the initialized..closed span.
	let watcher = WorkspaceWatcher::new(client.clone(), config.workspace.clone());
	let watcher_ctx = root_ctx.child_token();
	let watcher_task = tokio::spawn(watcher.run(watcher_ctx));

	client
		.wait_for_server_ready(&root_ctx)
		.await
		.context("language server readiness wait failed")?;

	let registry = Arc::new(ToolRegistry::new(client.clone(), root_ctx.clone()));
	let server = Arc::new(McpServer::new(registry));

	let serve_result = match config.mode {
		TransportMode::Stdio => {
			info!("serving MCP over stdio");
			server.run_stdio(root_ctx.clone()).await
		}
		TransportMode::Http => {
			info!(port = config.port, "serving MCP over HTTP");
			mcp::http::serve(server, config.port, root_ctx.clone()).await
		}
	};

	// Release the OS watch before the child is shut down.
	root_ctx.cancel();
	match watcher_task.await {
		Ok(Ok(())) => {}
		Ok(Err(e)) => warn!(err = %e, "workspace watcher failed"),
		Err(e) => debug!(err = %e, "watcher task ended abnormally"),
	}

	serve_result
}

/// Resolve the root token when a shutdown signal arrives or the parent
/// process dies. MCP hosts do not always reap their servers, so we watch
/// for re-parenting ourselves.
fn spawn_shutdown_triggers(root_ctx: CancellationToken) {
	tokio::spawn(async move {
		tokio::select! {
			_ = shutdown_signal() => info!("shutdown signal received"),
			_ = parent_death() => info!("parent process died, shutting down"),
		}
		root_ctx.cancel();
	});
}

/// SIGTERM and ctrl-c on Unix; ctrl-c elsewhere.
async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(e) => {
				warn!(err = %e, "cannot register SIGTERM handler");
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = sigterm.recv() => {}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}

/// Poll the parent pid; when this process is re-parented toward init, the
/// original parent is gone.
async fn parent_death() {
	#[cfg(unix)]
	{
		let original = std::os::unix::process::parent_id();
		debug!(ppid = original, "monitoring parent process");
		loop {
			tokio::time::sleep(PARENT_POLL).await;
			let current = std::os::unix::process::parent_id();
			if current != original && (current == 1 || original == 1) {
				return;
			}
		}
	}
	#[cfg(not(unix))]
	{
		// No portable parent-death detection; rely on signals.
		std::future::pending::<()>().await;
	}
}

/// Ordered teardown: close open documents, bounded `shutdown`, `exit`,
/// close the transport, reap the child with a bounded wait, kill on
/// expiry.
async fn shutdown_sequence(client: &Arc<LspClient>) {
	info!("closing open documents");
	client.close_all_documents().await;

	let shutdown_ctx = CancellationToken::new();
	match tokio::time::timeout(SHUTDOWN_REQUEST_TIMEOUT, client.shutdown(&shutdown_ctx)).await {
		Ok(Ok(())) => debug!("shutdown request acknowledged"),
		Ok(Err(e)) if !e.is_cancellation() && !e.is_fatal() => {
			warn!(err = %e, "shutdown request failed")
		}
		Ok(Err(_)) => {}
		Err(_) => warn!("shutdown request timed out"),
	}

	if let Err(e) = client.exit().await {
		if !e.is_fatal() {
			warn!(err = %e, "exit notification failed");
		}
	}

	client.close(CHILD_EXIT_GRACE).await;
	info!("language server session closed");
}
