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

//! Typed LSP operations, session lifecycle and the readiness gate
//!
//! The client exclusively owns the language server child process, the
//! dispatcher, the open-document set, the diagnostics cache and the dynamic
//! watcher registry. Every operation is capability-gated: if the server did
//! not declare the provider, the call fails structurally without touching
//! the wire.

use futures_util::FutureExt;
use lsp_types::{
	ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, ClientCapabilities, ClientInfo, CodeLens,
	DiagnosticClientCapabilities, DidChangeWatchedFilesClientCapabilities,
	DidChangeWatchedFilesRegistrationOptions, DocumentChangeOperation, DocumentChanges,
	ExecuteCommandClientCapabilities, FileEvent, GeneralClientCapabilities, GotoCapability, Hover,
	HoverClientCapabilities, InitializeParams, InitializeResult, Location, LocationLink, MarkupKind,
	OneOf, Position, PositionEncodingKind, PublishDiagnosticsClientCapabilities,
	PublishDiagnosticsParams, Range, ReferenceClientCapabilities, RegistrationParams,
	RenameClientCapabilities, ServerCapabilities, SymbolKind, TextDocumentClientCapabilities,
	TextDocumentEdit, TextDocumentSyncCapability, TextDocumentSyncClientCapabilities,
	TextDocumentSyncKind, TextEdit, UnregistrationParams, Uri, WindowClientCapabilities,
	WorkspaceClientCapabilities, WorkspaceEdit, WorkspaceEditClientCapabilities,
	WorkspaceFileOperationsClientCapabilities, WorkspaceFolder, WorkspaceSymbolClientCapabilities,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::docs::{language_id_for_path, DocumentStore};
use super::protocol::{self, path_to_uri, uri_to_path, ResponseError};
use super::rpc::Dispatcher;
use super::transport;
use crate::error::{BridgeError, Result};
use crate::watcher::registrations::WatcherRegistry;

/// No new `publishDiagnostics` for this long counts as "settled".
const READY_QUIET_INTERVAL: Duration = Duration::from_secs(1);
/// Hard upper bound on the readiness gate. Must be finite.
const READY_HARD_LIMIT: Duration = Duration::from_secs(30);
const READY_POLL: Duration = Duration::from_millis(200);
/// Deadline for the benign readiness probe.
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Session lifecycle. Terminal state is `Closed`; errors anywhere route to
/// `Closed` after cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
	Unstarted,
	Initializing,
	Initialized,
	Ready,
	ShuttingDown,
	Closed,
}

/// Latest `publishDiagnostics` payload for a file and when it arrived.
/// Overwritten on each publish, never merged.
#[derive(Debug, Clone)]
pub struct DiagnosticsEntry {
	pub params: PublishDiagnosticsParams,
	pub received_at: Instant,
}

/// A workspace/symbol hit in a shape both response encodings map onto.
#[derive(Debug, Clone)]
pub struct SymbolHit {
	pub name: String,
	pub kind: Option<SymbolKind>,
	pub container: Option<String>,
	pub location: Location,
}

/// A document symbol in a shape both response encodings map onto.
#[derive(Debug, Clone)]
pub struct DocumentSymbolNode {
	pub name: String,
	pub range: Range,
	pub selection_range: Range,
	pub children: Vec<DocumentSymbolNode>,
}

pub struct LspClient {
	rpc: Arc<Dispatcher>,
	child: Mutex<Option<Child>>,
	workspace_root: PathBuf,
	state: Mutex<LifecycleState>,
	capabilities: Mutex<Option<ServerCapabilities>>,
	pub docs: Arc<DocumentStore>,
	pub registrations: Arc<WatcherRegistry>,
	diagnostics: Arc<Mutex<HashMap<Uri, DiagnosticsEntry>>>,
	diag_seen: Arc<Notify>,
	last_publish: Arc<Mutex<Option<Instant>>>,
	ready_tx: watch::Sender<bool>,
}

impl LspClient {
	/// Spawn the language server subprocess and wire up the dispatcher.
	/// The child inherits the environment unchanged and runs in the
	/// workspace root.
	pub async fn spawn(command: &str, args: &[String], workspace_root: &Path) -> Result<Arc<Self>> {
		info!(command = command, workspace = %workspace_root.display(), "launching language server");

		let mut child = Command::new(command)
			.args(args)
			.current_dir(workspace_root)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| BridgeError::TransportProtocol("child stdin unavailable".into()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| BridgeError::TransportProtocol("child stdout unavailable".into()))?;
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(transport::forward_stderr(stderr));
		}

		let rpc = Dispatcher::new(stdout, stdin);
		let client = Self::with_dispatcher(rpc, workspace_root.to_path_buf());
		*client.child.lock().unwrap() = Some(child);
		Ok(client)
	}

	/// Assemble a client over an existing dispatcher. Used by `spawn` and by
	/// tests that script the server end of the wire.
	pub(crate) fn with_dispatcher(rpc: Arc<Dispatcher>, workspace_root: PathBuf) -> Arc<Self> {
		let (ready_tx, _) = watch::channel(false);
		let client = Arc::new(Self {
			rpc,
			child: Mutex::new(None),
			workspace_root,
			state: Mutex::new(LifecycleState::Unstarted),
			capabilities: Mutex::new(None),
			docs: Arc::new(DocumentStore::new()),
			registrations: Arc::new(WatcherRegistry::new()),
			diagnostics: Arc::new(Mutex::new(HashMap::new())),
			diag_seen: Arc::new(Notify::new()),
			last_publish: Arc::new(Mutex::new(None)),
			ready_tx,
		});
		client.register_handlers();
		client
	}

	pub fn workspace_root(&self) -> &Path {
		&self.workspace_root
	}

	pub fn lifecycle_state(&self) -> LifecycleState {
		*self.state.lock().unwrap()
	}

	// ── Lifecycle ───────────────────────────────────────────────────────────

	/// Perform the `initialize`/`initialized` handshake. Must be the first
	/// call and happens exactly once per session; a second attempt fails.
	#[allow(deprecated)] // root_uri is deprecated in LSP but still expected by most servers
	pub async fn initialize(&self, ctx: &CancellationToken) -> Result<InitializeResult> {
		{
			let mut state = self.state.lock().unwrap();
			if *state != LifecycleState::Unstarted {
				return Err(BridgeError::InvalidInput(
					"initialize was already performed for this session".into(),
				));
			}
			*state = LifecycleState::Initializing;
		}

		let root_uri = path_to_uri(&self.workspace_root)?;
		let params = InitializeParams {
			process_id: Some(std::process::id()),
			root_uri: Some(root_uri.clone()),
			capabilities: Self::client_capabilities(),
			client_info: Some(ClientInfo {
				name: "octolsp".to_string(),
				version: Some(env!("CARGO_PKG_VERSION").to_string()),
			}),
			workspace_folders: Some(vec![WorkspaceFolder {
				uri: root_uri,
				name: self
					.workspace_root
					.file_name()
					.map(|n| n.to_string_lossy().to_string())
					.unwrap_or_else(|| "workspace".to_string()),
			}]),
			..Default::default()
		};

		let value = self
			.rpc
			.call("initialize", serde_json::to_value(params)?, ctx)
			.await?;
		let result: InitializeResult = serde_json::from_value(value)?;

		*self.capabilities.lock().unwrap() = Some(result.capabilities.clone());
		self.rpc
			.notify("initialized", serde_json::to_value(lsp_types::InitializedParams {})?)
			.await?;
		*self.state.lock().unwrap() = LifecycleState::Initialized;

		info!(
			server = result
				.server_info
				.as_ref()
				.map(|i| i.name.as_str())
				.unwrap_or("unknown"),
			"language server initialized"
		);
		Ok(result)
	}

	/// The capabilities we advertise: sync (full, incremental, willSave),
	/// publishDiagnostics, dynamic file-watcher registration, applyEdit
	/// handling, executeCommand and file-operation notifications.
	fn client_capabilities() -> ClientCapabilities {
		ClientCapabilities {
			workspace: Some(WorkspaceClientCapabilities {
				apply_edit: Some(true),
				workspace_edit: Some(WorkspaceEditClientCapabilities {
					document_changes: Some(true),
					..Default::default()
				}),
				did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
					dynamic_registration: Some(true),
					relative_pattern_support: Some(false),
				}),
				symbol: Some(WorkspaceSymbolClientCapabilities {
					dynamic_registration: Some(false),
					..Default::default()
				}),
				execute_command: Some(ExecuteCommandClientCapabilities {
					dynamic_registration: Some(false),
				}),
				workspace_folders: Some(true),
				configuration: Some(true),
				file_operations: Some(WorkspaceFileOperationsClientCapabilities {
					did_create: Some(true),
					did_rename: Some(true),
					did_delete: Some(true),
					..Default::default()
				}),
				..Default::default()
			}),
			text_document: Some(TextDocumentClientCapabilities {
				synchronization: Some(TextDocumentSyncClientCapabilities {
					dynamic_registration: Some(false),
					will_save: Some(true),
					will_save_wait_until: Some(false),
					did_save: Some(true),
				}),
				publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
					related_information: Some(true),
					version_support: Some(true),
					..Default::default()
				}),
				diagnostic: Some(DiagnosticClientCapabilities {
					dynamic_registration: Some(false),
					related_document_support: Some(false),
				}),
				hover: Some(HoverClientCapabilities {
					dynamic_registration: Some(false),
					content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
				}),
				definition: Some(GotoCapability {
					dynamic_registration: Some(false),
					link_support: Some(true),
				}),
				references: Some(ReferenceClientCapabilities {
					dynamic_registration: Some(false),
				}),
				rename: Some(RenameClientCapabilities {
					dynamic_registration: Some(false),
					prepare_support: Some(false),
					..Default::default()
				}),
				..Default::default()
			}),
			window: Some(WindowClientCapabilities {
				work_done_progress: Some(true),
				..Default::default()
			}),
			general: Some(GeneralClientCapabilities {
				position_encodings: Some(vec![
					PositionEncodingKind::UTF16,
					PositionEncodingKind::UTF8,
				]),
				..Default::default()
			}),
			..Default::default()
		}
	}

	/// Drive the server to a steady state before admitting tool calls:
	/// issue a benign probe, then wait for diagnostics to quiesce or for the
	/// hard upper bound to elapse, whichever comes first.
	pub async fn wait_for_server_ready(&self, ctx: &CancellationToken) -> Result<()> {
		let started = Instant::now();

		if provider_enabled(&self.capabilities().and_then(|c| c.workspace_symbol_provider)) {
			let probe = timeout(
				READY_PROBE_TIMEOUT,
				self.rpc.call("workspace/symbol", json!({ "query": "" }), ctx),
			)
			.await;
			match probe {
				Ok(Ok(_)) => debug!("readiness probe answered"),
				Ok(Err(e)) => debug!(err = %e, "readiness probe failed"),
				Err(_) => debug!("readiness probe timed out"),
			}
		}

		loop {
			if ctx.is_cancelled() {
				return Err(BridgeError::Cancelled);
			}
			let quiet_for = self
				.last_publish
				.lock()
				.unwrap()
				.map(|t| t.elapsed())
				.unwrap_or_else(|| started.elapsed());
			if quiet_for >= READY_QUIET_INTERVAL {
				break;
			}
			if started.elapsed() >= READY_HARD_LIMIT {
				warn!("readiness wait hit its upper bound, admitting tool calls anyway");
				break;
			}
			tokio::time::sleep(READY_POLL).await;
		}

		*self.state.lock().unwrap() = LifecycleState::Ready;
		self.ready_tx.send_replace(true);
		info!(elapsed_ms = started.elapsed().as_millis() as u64, "language server ready");
		Ok(())
	}

	/// Block until the readiness gate opens, up to `wait`.
	pub async fn ensure_ready(&self, wait: Duration) -> Result<()> {
		let mut rx = self.ready_tx.subscribe();
		if *rx.borrow() {
			return Ok(());
		}
		let result = match timeout(wait, rx.wait_for(|ready| *ready)).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(_)) => Err(BridgeError::SessionClosed),
			Err(_) => Err(BridgeError::NotReady),
		};
		result
	}

	/// `shutdown` request. Idempotent: a second call is a no-op success.
	pub async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
		{
			let mut state = self.state.lock().unwrap();
			if matches!(*state, LifecycleState::ShuttingDown | LifecycleState::Closed) {
				return Ok(());
			}
			*state = LifecycleState::ShuttingDown;
		}
		self.rpc.call("shutdown", Value::Null, ctx).await.map(|_| ())
	}

	/// `exit` notification. After this the child must be reaped.
	pub async fn exit(&self) -> Result<()> {
		self.rpc.notify("exit", Value::Null).await
	}

	/// Close the transport, fail outstanding waiters, and reap the child
	/// with a bounded wait before killing it.
	pub async fn close(&self, grace: Duration) {
		self.rpc.close().await;

		let child = self.child.lock().unwrap().take();
		if let Some(mut child) = child {
			match timeout(grace, child.wait()).await {
				Ok(Ok(status)) => debug!(status = %status, "language server exited"),
				Ok(Err(e)) => warn!(err = %e, "failed waiting for language server"),
				Err(_) => {
					warn!("language server did not exit in time, killing it");
					let _ = child.kill().await;
				}
			}
		}

		*self.state.lock().unwrap() = LifecycleState::Closed;
	}

	// ── Document synchronization ────────────────────────────────────────────

	/// Make sure `path` is in the open set before any position-based query.
	pub async fn ensure_open(&self, path: &Path) -> Result<Uri> {
		self.ensure_open_synced(path).await.map(|(uri, _)| uri)
	}

	/// Like [`ensure_open`], additionally reporting whether the server's
	/// view of the document was (re)freshed by this call.
	pub async fn ensure_open_synced(&self, path: &Path) -> Result<(Uri, bool)> {
		if !path.exists() {
			return Err(BridgeError::InvalidInput(format!(
				"file does not exist: {}",
				path.display()
			)));
		}
		let uri = path_to_uri(path)?;
		let disk_text = tokio::fs::read_to_string(path).await?;

		let guard = self.docs.lock_for(&uri);
		let _held = guard.lock().await;

		if let Some(doc) = self.docs.get(&uri) {
			if doc.text == disk_text {
				return Ok((uri, false));
			}
			self.notify_change_locked(&uri, disk_text).await?;
			return Ok((uri, true));
		}

		let language_id = language_id_for_path(path).to_string();
		self.docs
			.insert_opened(uri.clone(), language_id.clone(), disk_text.clone());
		self.rpc
			.notify(
				"textDocument/didOpen",
				json!({
					"textDocument": {
						"uri": uri.as_str(),
						"languageId": language_id,
						"version": 0,
						"text": disk_text,
					}
				}),
			)
			.await?;
		debug!(uri = %uri.as_str(), "opened document");
		Ok((uri, true))
	}

	/// Propagate a new text state for an open document, honoring the
	/// server-declared sync mode. The version bump and the notification
	/// happen under the per-URI lock, and the notification is fully written
	/// before this returns, so a dependent request issued afterwards can
	/// never observe the old state.
	pub async fn notify_change(&self, uri: &Uri, new_text: String) -> Result<()> {
		let guard = self.docs.lock_for(uri);
		let _held = guard.lock().await;
		self.notify_change_locked(uri, new_text).await
	}

	async fn notify_change_locked(&self, uri: &Uri, new_text: String) -> Result<()> {
		let doc = self
			.docs
			.get(uri)
			.ok_or_else(|| BridgeError::InvalidInput(format!("document not open: {}", uri.as_str())))?;
		let old_text = doc.text;
		let version = self
			.docs
			.bump_version(uri, new_text.clone())
			.ok_or_else(|| BridgeError::InvalidInput(format!("document not open: {}", uri.as_str())))?;

		let sync = self.sync_kind();
		if sync == TextDocumentSyncKind::NONE {
			// The server refuses change events; close and reopen instead.
			self.rpc
				.notify(
					"textDocument/didClose",
					json!({ "textDocument": { "uri": uri.as_str() } }),
				)
				.await?;
			self.rpc
				.notify(
					"textDocument/didOpen",
					json!({
						"textDocument": {
							"uri": uri.as_str(),
							"languageId": doc.language_id,
							"version": version,
							"text": new_text,
						}
					}),
				)
				.await?;
			return Ok(());
		}

		let content_changes = if sync == TextDocumentSyncKind::INCREMENTAL {
			// A whole-document range replacement is a valid incremental change.
			json!([{
				"range": {
					"start": { "line": 0, "character": 0 },
					"end": end_position(&old_text),
				},
				"text": new_text,
			}])
		} else {
			json!([{ "text": new_text }])
		};

		self.rpc
			.notify(
				"textDocument/didChange",
				json!({
					"textDocument": { "uri": uri.as_str(), "version": version },
					"contentChanges": content_changes,
				}),
			)
			.await
	}

	pub async fn did_save(&self, uri: &Uri) -> Result<()> {
		self.rpc
			.notify(
				"textDocument/didSave",
				json!({ "textDocument": { "uri": uri.as_str() } }),
			)
			.await
	}

	pub async fn close_document(&self, uri: &Uri) -> Result<()> {
		if self.docs.remove(uri).is_none() {
			return Ok(());
		}
		self.rpc
			.notify(
				"textDocument/didClose",
				json!({ "textDocument": { "uri": uri.as_str() } }),
			)
			.await
	}

	pub async fn close_all_documents(&self) {
		for uri in self.docs.open_uris() {
			if let Err(e) = self.close_document(&uri).await {
				debug!(uri = %uri.as_str(), err = %e, "didClose failed during teardown");
			}
		}
	}

	// ── Queries ─────────────────────────────────────────────────────────────

	pub async fn definition(
		&self,
		uri: &Uri,
		position: Position,
		ctx: &CancellationToken,
	) -> Result<Vec<Location>> {
		self.require_capability("textDocument/definition")?;
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/definition",
				json!({
					"textDocument": { "uri": uri.as_str() },
					"position": position,
				}),
				ctx,
			)
			.await?;
		Ok(parse_locations(result))
	}

	pub async fn references(
		&self,
		uri: &Uri,
		position: Position,
		include_declaration: bool,
		ctx: &CancellationToken,
	) -> Result<Vec<Location>> {
		self.require_capability("textDocument/references")?;
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/references",
				json!({
					"textDocument": { "uri": uri.as_str() },
					"position": position,
					"context": { "includeDeclaration": include_declaration },
				}),
				ctx,
			)
			.await?;
		Ok(serde_json::from_value::<Option<Vec<Location>>>(result)?.unwrap_or_default())
	}

	pub async fn hover(
		&self,
		uri: &Uri,
		position: Position,
		ctx: &CancellationToken,
	) -> Result<Option<Hover>> {
		self.require_capability("textDocument/hover")?;
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/hover",
				json!({
					"textDocument": { "uri": uri.as_str() },
					"position": position,
				}),
				ctx,
			)
			.await?;
		Ok(serde_json::from_value(result)?)
	}

	pub async fn rename(
		&self,
		uri: &Uri,
		position: Position,
		new_name: &str,
		ctx: &CancellationToken,
	) -> Result<Option<WorkspaceEdit>> {
		self.require_capability("textDocument/rename")?;
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/rename",
				json!({
					"textDocument": { "uri": uri.as_str() },
					"position": position,
					"newName": new_name,
				}),
				ctx,
			)
			.await?;
		Ok(serde_json::from_value(result)?)
	}

	pub async fn code_lens(&self, uri: &Uri, ctx: &CancellationToken) -> Result<Vec<CodeLens>> {
		self.require_capability("textDocument/codeLens")?;
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/codeLens",
				json!({ "textDocument": { "uri": uri.as_str() } }),
				ctx,
			)
			.await?;
		Ok(serde_json::from_value::<Option<Vec<CodeLens>>>(result)?.unwrap_or_default())
	}

	pub async fn workspace_symbols(
		&self,
		query: &str,
		ctx: &CancellationToken,
	) -> Result<Vec<SymbolHit>> {
		self.require_capability("workspace/symbol")?;
		let result = self
			.rpc
			.call("workspace/symbol", json!({ "query": query }), ctx)
			.await?;
		Ok(parse_symbol_hits(result))
	}

	pub async fn document_symbols(
		&self,
		uri: &Uri,
		ctx: &CancellationToken,
	) -> Result<Vec<DocumentSymbolNode>> {
		self.require_open(uri)?;
		let result = self
			.rpc
			.call(
				"textDocument/documentSymbol",
				json!({ "textDocument": { "uri": uri.as_str() } }),
				ctx,
			)
			.await?;
		Ok(parse_document_symbols(result))
	}

	pub async fn execute_command(
		&self,
		command: &str,
		arguments: Vec<Value>,
		ctx: &CancellationToken,
	) -> Result<Value> {
		self.require_capability("workspace/executeCommand")?;
		self.rpc
			.call(
				"workspace/executeCommand",
				json!({ "command": command, "arguments": arguments }),
				ctx,
			)
			.await
	}

	pub async fn did_change_watched_files(&self, changes: Vec<FileEvent>) -> Result<()> {
		self.rpc
			.notify(
				"workspace/didChangeWatchedFiles",
				serde_json::to_value(lsp_types::DidChangeWatchedFilesParams { changes })?,
			)
			.await
	}

	// ── Diagnostics cache ───────────────────────────────────────────────────

	pub fn diagnostics_for(&self, uri: &Uri) -> Option<DiagnosticsEntry> {
		self.diagnostics.lock().unwrap().get(uri).cloned()
	}

	/// Wait up to `wait` for a publish for `uri` received after `newer_than`
	/// (or any cached publish when `newer_than` is `None`).
	pub async fn wait_for_diagnostics(
		&self,
		uri: &Uri,
		newer_than: Option<Instant>,
		wait: Duration,
	) -> Option<DiagnosticsEntry> {
		let deadline = Instant::now() + wait;
		loop {
			if let Some(entry) = self.diagnostics_for(uri) {
				if newer_than.map(|t| entry.received_at > t).unwrap_or(true) {
					return Some(entry);
				}
			}
			let remaining = deadline.checked_duration_since(Instant::now())?;
			if timeout(remaining, self.diag_seen.notified()).await.is_err() {
				return self
					.diagnostics_for(uri)
					.filter(|e| newer_than.map(|t| e.received_at > t).unwrap_or(true));
			}
		}
	}

	// ── Workspace edits ─────────────────────────────────────────────────────

	/// Apply a server- or tool-originated `WorkspaceEdit` atomically: all
	/// files change or the filesystem is restored to its prior state. Open
	/// documents get a `didChange` for their new text. Returns the changed
	/// paths.
	pub async fn apply_workspace_edit(&self, edit: &WorkspaceEdit) -> Result<Vec<PathBuf>> {
		let per_file = collect_workspace_edits(edit);
		if per_file.is_empty() {
			return Ok(Vec::new());
		}

		let mut plan: Vec<(Uri, PathBuf, String, String)> = Vec::new();
		for (uri, mut edits) in per_file {
			let path = uri_to_path(&uri)?;
			let old_text = match self.docs.text(&uri) {
				Some(text) => text,
				None => tokio::fs::read_to_string(&path).await.map_err(|e| {
					BridgeError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
				})?,
			};
			sort_edits_descending(&mut edits);
			let new_text = apply_text_edits(&old_text, &edits);
			plan.push((uri, path, old_text, new_text));
		}

		write_files_atomically(
			&plan
				.iter()
				.map(|(_, path, old, new)| (path.clone(), old.clone(), new.clone()))
				.collect::<Vec<_>>(),
		)
		.await?;

		for (uri, _, _, new_text) in &plan {
			if self.docs.contains(uri) {
				self.notify_change(uri, new_text.clone()).await?;
			}
		}

		Ok(plan.into_iter().map(|(_, path, _, _)| path).collect())
	}

	// ── Internals ───────────────────────────────────────────────────────────

	pub fn capabilities(&self) -> Option<ServerCapabilities> {
		self.capabilities.lock().unwrap().clone()
	}

	fn require_open(&self, uri: &Uri) -> Result<()> {
		if self.docs.contains(uri) {
			Ok(())
		} else {
			Err(BridgeError::InvalidInput(format!(
				"document not open: {}",
				uri.as_str()
			)))
		}
	}

	fn require_capability(&self, operation: &'static str) -> Result<()> {
		let caps = self.capabilities();
		let caps = caps.as_ref().ok_or(BridgeError::NotReady)?;
		let supported = match operation {
			"textDocument/hover" => match &caps.hover_provider {
				None => false,
				Some(lsp_types::HoverProviderCapability::Simple(enabled)) => *enabled,
				Some(_) => true,
			},
			"textDocument/definition" => provider_enabled(&caps.definition_provider),
			"textDocument/references" => provider_enabled(&caps.references_provider),
			"textDocument/rename" => provider_enabled(&caps.rename_provider),
			"textDocument/codeLens" => caps.code_lens_provider.is_some(),
			"workspace/symbol" => provider_enabled(&caps.workspace_symbol_provider),
			"workspace/executeCommand" => caps.execute_command_provider.is_some(),
			_ => true,
		};
		if supported {
			Ok(())
		} else {
			Err(BridgeError::Unsupported { operation })
		}
	}

	fn sync_kind(&self) -> TextDocumentSyncKind {
		match self.capabilities().and_then(|c| c.text_document_sync) {
			Some(TextDocumentSyncCapability::Kind(kind)) => kind,
			Some(TextDocumentSyncCapability::Options(options)) => {
				options.change.unwrap_or(TextDocumentSyncKind::FULL)
			}
			None => TextDocumentSyncKind::FULL,
		}
	}

	/// Inbound routing. Diagnostics publishing is inline-safe; everything
	/// that touches the filesystem runs as a pooled request handler.
	fn register_handlers(self: &Arc<Self>) {
		{
			let diagnostics = self.diagnostics.clone();
			let last_publish = self.last_publish.clone();
			let diag_seen = self.diag_seen.clone();
			self.rpc
				.on_notify("textDocument/publishDiagnostics", move |params| {
					let Some(params) = params else { return };
					match serde_json::from_value::<PublishDiagnosticsParams>(params) {
						Ok(p) => {
							debug!(uri = %p.uri.as_str(), count = p.diagnostics.len(), "diagnostics published");
							diagnostics.lock().unwrap().insert(
								p.uri.clone(),
								DiagnosticsEntry {
									params: p,
									received_at: Instant::now(),
								},
							);
							*last_publish.lock().unwrap() = Some(Instant::now());
							diag_seen.notify_waiters();
						}
						Err(e) => warn!(err = %e, "bad publishDiagnostics payload"),
					}
				});
		}

		self.rpc.on_notify("window/logMessage", |params| {
			if let Some(message) = params.as_ref().and_then(|p| p.get("message")).and_then(Value::as_str) {
				debug!(target: "lsp_server", "{}", message);
			}
		});
		self.rpc.on_notify("window/showMessage", |params| {
			if let Some(message) = params.as_ref().and_then(|p| p.get("message")).and_then(Value::as_str) {
				info!(target: "lsp_server", "{}", message);
			}
		});
		self.rpc.on_notify("$/progress", |params| {
			debug!(target: "lsp_server", params = ?params, "progress");
		});
		self.rpc.on_notify("telemetry/event", |_params| {});

		{
			let client = self.clone();
			self.rpc.on_request("workspace/applyEdit", move |params| {
				let client = client.clone();
				async move {
					let params: ApplyWorkspaceEditParams =
						serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
							ResponseError::new(protocol::INVALID_PARAMS, e.to_string())
						})?;
					let response = match client.apply_workspace_edit(&params.edit).await {
						Ok(paths) => {
							debug!(files = paths.len(), "applied server-initiated workspace edit");
							ApplyWorkspaceEditResponse {
								applied: true,
								failure_reason: None,
								failed_change: None,
							}
						}
						Err(e) => {
							warn!(err = %e, "server-initiated workspace edit failed");
							ApplyWorkspaceEditResponse {
								applied: false,
								failure_reason: Some(e.to_string()),
								failed_change: None,
							}
						}
					};
					Ok(serde_json::to_value(response).unwrap_or(Value::Null))
				}
				.boxed()
			});
		}

		{
			let registrations = self.registrations.clone();
			self.rpc.on_request("client/registerCapability", move |params| {
				let registrations = registrations.clone();
				async move {
					let params: RegistrationParams =
						serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
							ResponseError::new(protocol::INVALID_PARAMS, e.to_string())
						})?;
					for registration in params.registrations {
						if registration.method == "workspace/didChangeWatchedFiles" {
							let options = registration
								.register_options
								.map(serde_json::from_value::<DidChangeWatchedFilesRegistrationOptions>);
							match options {
								Some(Ok(options)) => {
									registrations.register(registration.id, options.watchers)
								}
								Some(Err(e)) => {
									warn!(err = %e, "bad didChangeWatchedFiles registration")
								}
								None => {}
							}
						} else {
							debug!(method = %registration.method, "acknowledged dynamic registration");
						}
					}
					Ok(Value::Null)
				}
				.boxed()
			});
		}

		{
			let registrations = self.registrations.clone();
			self.rpc
				.on_request("client/unregisterCapability", move |params| {
					let registrations = registrations.clone();
					async move {
						let params: UnregistrationParams =
							serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
								ResponseError::new(protocol::INVALID_PARAMS, e.to_string())
							})?;
						for unregistration in params.unregisterations {
							registrations.unregister(&unregistration.id);
						}
						Ok(Value::Null)
					}
					.boxed()
				});
		}

		self.rpc.on_request("workspace/configuration", |params| {
			async move {
				// We carry no per-section settings; answer null per item.
				let items = params
					.as_ref()
					.and_then(|p| p.get("items"))
					.and_then(Value::as_array)
					.map(|a| a.len())
					.unwrap_or(0);
				Ok(Value::Array(vec![Value::Null; items]))
			}
			.boxed()
		});

		self.rpc
			.on_request("window/workDoneProgress/create", |_params| {
				async move { Ok(Value::Null) }.boxed()
			});

		self.rpc.on_request("window/showMessageRequest", |params| {
			async move {
				if let Some(message) = params.as_ref().and_then(|p| p.get("message")).and_then(Value::as_str) {
					info!(target: "lsp_server", "{}", message);
				}
				// Declining to pick an action is a valid answer.
				Ok(Value::Null)
			}
			.boxed()
		});
	}
}

fn provider_enabled<T>(provider: &Option<OneOf<bool, T>>) -> bool {
	match provider {
		None => false,
		Some(OneOf::Left(enabled)) => *enabled,
		Some(OneOf::Right(_)) => true,
	}
}

/// Definition responses come as `Location`, `Location[]` or `LocationLink[]`.
fn parse_locations(result: Value) -> Vec<Location> {
	if result.is_null() {
		return Vec::new();
	}
	if let Ok(location) = serde_json::from_value::<Location>(result.clone()) {
		return vec![location];
	}
	if let Ok(locations) = serde_json::from_value::<Vec<Location>>(result.clone()) {
		return locations;
	}
	if let Ok(links) = serde_json::from_value::<Vec<LocationLink>>(result) {
		return links
			.into_iter()
			.map(|link| Location {
				uri: link.target_uri,
				range: link.target_selection_range,
			})
			.collect();
	}
	warn!("unknown definition response shape");
	Vec::new()
}

/// workspace/symbol responses come flat (`SymbolInformation[]`) or nested
/// (`WorkspaceSymbol[]`); both are folded into [`SymbolHit`]s.
fn parse_symbol_hits(result: Value) -> Vec<SymbolHit> {
	let Some(items) = result.as_array() else {
		return Vec::new();
	};
	items
		.iter()
		.filter_map(|item| {
			let name = item.get("name")?.as_str()?.to_string();
			let kind = item
				.get("kind")
				.cloned()
				.and_then(|k| serde_json::from_value(k).ok());
			let container = item
				.get("containerName")
				.and_then(Value::as_str)
				.map(str::to_string);
			// Nested hits may carry a location without a range; skip those,
			// position-based follow-ups need a concrete range.
			let location: Location =
				serde_json::from_value(item.get("location")?.clone()).ok()?;
			Some(SymbolHit {
				name,
				kind,
				container,
				location,
			})
		})
		.collect()
}

fn parse_document_symbols(result: Value) -> Vec<DocumentSymbolNode> {
	let Some(items) = result.as_array() else {
		return Vec::new();
	};

	fn nested(item: &Value) -> Option<DocumentSymbolNode> {
		let name = item.get("name")?.as_str()?.to_string();
		let range: Range = serde_json::from_value(item.get("range")?.clone()).ok()?;
		let selection_range: Range =
			serde_json::from_value(item.get("selectionRange")?.clone()).ok()?;
		let children = item
			.get("children")
			.and_then(Value::as_array)
			.map(|kids| kids.iter().filter_map(nested).collect())
			.unwrap_or_default();
		Some(DocumentSymbolNode {
			name,
			range,
			selection_range,
			children,
		})
	}

	fn flat(item: &Value) -> Option<DocumentSymbolNode> {
		let name = item.get("name")?.as_str()?.to_string();
		let location: Location = serde_json::from_value(item.get("location")?.clone()).ok()?;
		Some(DocumentSymbolNode {
			name,
			range: location.range,
			selection_range: location.range,
			children: Vec::new(),
		})
	}

	items
		.iter()
		.filter_map(|item| nested(item).or_else(|| flat(item)))
		.collect()
}

/// Flatten `changes` and `documentChanges` into per-URI edit lists.
/// Resource operations (create/rename/delete file) are not produced by the
/// operations we issue; they are skipped with a warning.
pub(crate) fn collect_workspace_edits(edit: &WorkspaceEdit) -> Vec<(Uri, Vec<TextEdit>)> {
	let mut per_file: HashMap<Uri, Vec<TextEdit>> = HashMap::new();

	if let Some(changes) = &edit.changes {
		for (uri, edits) in changes {
			per_file.entry(uri.clone()).or_default().extend(edits.iter().cloned());
		}
	}

	let mut push_document_edit = |doc_edit: &TextDocumentEdit| {
		let entry = per_file.entry(doc_edit.text_document.uri.clone()).or_default();
		for one in &doc_edit.edits {
			match one {
				OneOf::Left(text_edit) => entry.push(text_edit.clone()),
				OneOf::Right(annotated) => entry.push(annotated.text_edit.clone()),
			}
		}
	};

	match &edit.document_changes {
		Some(DocumentChanges::Edits(edits)) => {
			for doc_edit in edits {
				push_document_edit(doc_edit);
			}
		}
		Some(DocumentChanges::Operations(operations)) => {
			for op in operations {
				match op {
					DocumentChangeOperation::Edit(doc_edit) => push_document_edit(doc_edit),
					DocumentChangeOperation::Op(_) => {
						warn!("skipping resource operation in workspace edit")
					}
				}
			}
		}
		None => {}
	}

	per_file.into_iter().collect()
}

/// Order edits so that applying from the front keeps earlier offsets valid.
pub(crate) fn sort_edits_descending(edits: &mut [TextEdit]) {
	edits.sort_by(|a, b| {
		(b.range.start.line, b.range.start.character)
			.cmp(&(a.range.start.line, a.range.start.character))
	});
}

/// Apply edits already sorted by descending start position.
pub(crate) fn apply_text_edits(text: &str, edits: &[TextEdit]) -> String {
	let mut result = text.to_string();
	for edit in edits {
		let start = offset_of_position(&result, edit.range.start);
		let end = offset_of_position(&result, edit.range.end).max(start);
		result.replace_range(start..end, &edit.new_text);
	}
	result
}

/// Byte offset of an LSP position (UTF-16 character units), clamped to the
/// document.
pub(crate) fn offset_of_position(text: &str, position: Position) -> usize {
	let mut offset = 0;
	for (index, line) in text.split_inclusive('\n').enumerate() {
		if index as u32 == position.line {
			let mut units = 0u32;
			for (byte_index, ch) in line.char_indices() {
				if units >= position.character {
					return offset + byte_index;
				}
				units += ch.len_utf16() as u32;
			}
			let trimmed = line.trim_end_matches(['\r', '\n']);
			return offset + trimmed.len();
		}
		offset += line.len();
	}
	text.len()
}

/// The position just past the final character, in LSP coordinates.
pub(crate) fn end_position(text: &str) -> Position {
	let line_count = text.split('\n').count() as u32;
	let last_line = text.rsplit('\n').next().unwrap_or("");
	Position {
		line: line_count.saturating_sub(1),
		character: last_line.encode_utf16().count() as u32,
	}
}

/// Write every `(path, old, new)` entry, rolling all of them back if any
/// write fails. A rollback failure is reported with the unreverted files.
pub(crate) async fn write_files_atomically(plan: &[(PathBuf, String, String)]) -> Result<()> {
	let mut written: Vec<&(PathBuf, String, String)> = Vec::new();

	for entry in plan {
		let (path, _, new_text) = entry;
		if let Err(write_err) = tokio::fs::write(path, new_text).await {
			let mut unreverted = Vec::new();
			for (done_path, old_text, _) in written {
				if tokio::fs::write(done_path, old_text).await.is_err() {
					unreverted.push(done_path.display().to_string());
				}
			}
			if unreverted.is_empty() {
				return Err(BridgeError::InvalidInput(format!(
					"failed to write {}: {} (all changes rolled back)",
					path.display(),
					write_err
				)));
			}
			return Err(BridgeError::ApplyEditFailed { files: unreverted });
		}
		written.push(entry);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lsp::protocol::Message;
	use crate::lsp::transport;
	use serde_json::json;
	use std::str::FromStr;
	use tokio::io::{duplex, split, BufReader};

	fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextEdit {
		TextEdit {
			range: Range {
				start: Position {
					line: start.0,
					character: start.1,
				},
				end: Position {
					line: end.0,
					character: end.1,
				},
			},
			new_text: text.to_string(),
		}
	}

	#[test]
	fn offsets_follow_utf16_units() {
		let text = "let aé = 1;\nsecond";
		// 'é' is one UTF-16 unit but two bytes.
		assert_eq!(offset_of_position(text, Position { line: 0, character: 5 }), 5);
		assert_eq!(offset_of_position(text, Position { line: 0, character: 6 }), 7);
		assert_eq!(offset_of_position(text, Position { line: 1, character: 2 }), 15);
		// Past-the-end clamps to the line end, excluding the newline.
		assert_eq!(offset_of_position(text, Position { line: 0, character: 99 }), 12);
	}

	#[test]
	fn end_position_covers_whole_document() {
		assert_eq!(end_position("ab\ncd"), Position { line: 1, character: 2 });
		assert_eq!(end_position("ab\n"), Position { line: 1, character: 0 });
		assert_eq!(end_position(""), Position { line: 0, character: 0 });
	}

	#[test]
	fn descending_application_keeps_offsets_valid() {
		let text = "alpha beta gamma";
		let mut edits = vec![edit((0, 0), (0, 5), "A"), edit((0, 11), (0, 16), "G")];
		sort_edits_descending(&mut edits);
		assert_eq!(apply_text_edits(text, &edits), "A beta G");
	}

	#[test]
	fn multi_line_edit_replacement() {
		let text = "one\ntwo\nthree\n";
		let edits = vec![edit((1, 0), (2, 5), "2\n3")];
		assert_eq!(apply_text_edits(text, &edits), "one\n2\n3\n");
	}

	#[test]
	fn collects_changes_and_document_changes() {
		let uri = Uri::from_str("file:///tmp/x.rs").unwrap();
		let mut changes = HashMap::new();
		changes.insert(uri.clone(), vec![edit((0, 0), (0, 1), "x")]);
		let ws_edit = WorkspaceEdit {
			changes: Some(changes),
			..Default::default()
		};
		let collected = collect_workspace_edits(&ws_edit);
		assert_eq!(collected.len(), 1);
		assert_eq!(collected[0].1.len(), 1);
	}

	#[tokio::test]
	async fn atomic_write_rolls_back_on_failure() {
		let dir = tempfile::tempdir().unwrap();
		let good = dir.path().join("a.ts");
		tokio::fs::write(&good, "export const foo = 1\n").await.unwrap();
		let bad = dir.path().join("missing-dir").join("b.ts");

		let plan = vec![
			(good.clone(), "export const foo = 1\n".to_string(), "export const bar = 1\n".to_string()),
			(bad, "old".to_string(), "new".to_string()),
		];
		let err = write_files_atomically(&plan).await.unwrap_err();
		assert!(!matches!(err, BridgeError::ApplyEditFailed { .. }));

		// The first file must be back to its original content.
		let restored = tokio::fs::read_to_string(&good).await.unwrap();
		assert_eq!(restored, "export const foo = 1\n");
	}

	/// A scripted server that answers `initialize` and `shutdown`.
	fn scripted_client() -> Arc<LspClient> {
		let (ours, theirs) = duplex(64 * 1024);
		let (our_read, our_write) = split(ours);
		let (their_read, mut their_write) = split(theirs);

		tokio::spawn(async move {
			let mut reader = BufReader::new(their_read);
			while let Ok(Some(body)) = transport::read_frame(&mut reader).await {
				let message: Message = serde_json::from_slice(&body).unwrap();
				let Some(id) = message.id.clone() else { continue };
				let reply = match message.method.as_deref() {
					Some("initialize") => Message::response(
						id,
						json!({ "capabilities": { "hoverProvider": true, "textDocumentSync": 1 } }),
					),
					Some("shutdown") => Message::response(id, Value::Null),
					_ => continue,
				};
				transport::write_message(&mut their_write, &reply).await.unwrap();
			}
		});

		let rpc = Dispatcher::new(our_read, our_write);
		LspClient::with_dispatcher(rpc, PathBuf::from("/tmp"))
	}

	#[tokio::test]
	async fn initialize_twice_is_an_error() {
		let client = scripted_client();
		let ctx = CancellationToken::new();

		client.initialize(&ctx).await.unwrap();
		assert_eq!(client.lifecycle_state(), LifecycleState::Initialized);
		assert!(client.capabilities().is_some());

		let err = client.initialize(&ctx).await.unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));
	}

	#[tokio::test]
	async fn shutdown_twice_is_a_noop() {
		let client = scripted_client();
		let ctx = CancellationToken::new();
		client.initialize(&ctx).await.unwrap();

		client.shutdown(&ctx).await.unwrap();
		assert_eq!(client.lifecycle_state(), LifecycleState::ShuttingDown);
		// Second call succeeds without a wire exchange.
		client.shutdown(&ctx).await.unwrap();
	}

	#[tokio::test]
	async fn position_queries_require_an_open_document() {
		let client = scripted_client();
		let ctx = CancellationToken::new();
		client.initialize(&ctx).await.unwrap();

		let uri = Uri::from_str("file:///tmp/never-opened.rs").unwrap();
		let err = client
			.hover(&uri, Position { line: 0, character: 0 }, &ctx)
			.await
			.unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));
	}

	#[tokio::test]
	async fn unsupported_capability_is_structural() {
		let client = scripted_client();
		let ctx = CancellationToken::new();
		client.initialize(&ctx).await.unwrap();

		// The scripted server only declares hover support.
		let uri = Uri::from_str("file:///tmp/a.rs").unwrap();
		let err = client
			.references(&uri, Position { line: 0, character: 0 }, true, &ctx)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			BridgeError::Unsupported {
				operation: "textDocument/references"
			}
		));
	}
}
