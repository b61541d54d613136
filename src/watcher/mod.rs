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

//! Workspace file watching and `workspace/didChangeWatchedFiles` emission
//!
//! A recursive OS watcher rooted at the workspace feeds debounced events
//! through ignore rules and the server's dynamic watch registrations. Open
//! documents whose files change externally are re-synced with a fresh
//! full-text `didChange`.

pub mod ignore;
pub mod registrations;

use anyhow::{Context, Result};
use lsp_types::{FileChangeType, FileEvent};
use notify_debouncer_full::{
	new_debouncer,
	notify::{EventKind, RecursiveMode, Watcher},
	DebounceEventResult,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lsp::protocol::path_to_uri;
use crate::lsp::LspClient;
use ignore::IgnoreRules;

/// Coalesce event storms per path before notifying the server.
const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Extensions forwarded when the server has not registered any watchers.
const DEFAULT_WATCHED_EXTENSIONS: &[&str] = &[
	"rs", "go", "py", "pyi", "ts", "tsx", "js", "jsx", "mjs", "cjs", "c", "h", "cpp", "cc", "hpp",
	"java", "rb", "php", "cs", "swift", "kt", "zig", "lua", "json", "toml", "yaml", "yml", "mod",
	"sum", "lock",
];

pub struct WorkspaceWatcher {
	client: Arc<LspClient>,
	root: PathBuf,
	ignore: IgnoreRules,
}

impl WorkspaceWatcher {
	pub fn new(client: Arc<LspClient>, root: PathBuf) -> Self {
		let ignore = IgnoreRules::load(root.clone());
		Self {
			client,
			root,
			ignore,
		}
	}

	/// Watch until the token cancels. The OS watch is released when this
	/// returns, before the client shuts the server down.
	pub async fn run(self, ctx: CancellationToken) -> Result<()> {
		let (tx, mut rx) = mpsc::unbounded_channel();

		let mut debouncer = new_debouncer(
			DEBOUNCE_INTERVAL,
			None,
			move |result: DebounceEventResult| match result {
				Ok(events) => {
					let _ = tx.send(events);
				}
				Err(errors) => {
					for error in errors {
						warn!(err = %error, "file watcher error");
					}
				}
			},
		)?;

		debouncer
			.watcher()
			.watch(&self.root, RecursiveMode::Recursive)
			.with_context(|| format!("cannot watch workspace {}", self.root.display()))?;
		info!(root = %self.root.display(), "workspace watcher started");

		loop {
			tokio::select! {
				_ = ctx.cancelled() => break,
				batch = rx.recv() => match batch {
					Some(events) => self.handle_batch(events).await,
					None => break,
				},
			}
		}

		info!("workspace watcher stopped");
		Ok(())
	}

	async fn handle_batch(&self, events: Vec<notify_debouncer_full::DebouncedEvent>) {
		let mut seen: HashSet<(String, u32)> = HashSet::new();
		let mut changes: Vec<FileEvent> = Vec::new();
		let mut resync: Vec<PathBuf> = Vec::new();

		for event in &events {
			let change_type = match event.kind {
				EventKind::Create(_) => FileChangeType::CREATED,
				EventKind::Remove(_) => FileChangeType::DELETED,
				EventKind::Modify(_) => FileChangeType::CHANGED,
				_ => continue,
			};

			for path in &event.paths {
				if self.ignore.should_ignore(path) {
					continue;
				}
				if change_type != FileChangeType::DELETED && path.is_dir() {
					continue;
				}
				if !self.interesting(path, change_type) {
					continue;
				}
				let Ok(uri) = path_to_uri(path) else { continue };
				if !seen.insert((uri.as_str().to_string(), change_type_code(change_type))) {
					continue;
				}

				if change_type == FileChangeType::CHANGED && self.client.docs.contains(&uri) {
					resync.push(path.clone());
				}
				changes.push(FileEvent {
					uri,
					typ: change_type,
				});
			}
		}

		// External edits to open documents must reach the server as
		// document syncs, not just as watched-file events.
		for path in resync {
			match tokio::fs::read_to_string(&path).await {
				Ok(text) => {
					let Ok(uri) = path_to_uri(&path) else { continue };
					if let Err(e) = self.client.notify_change(&uri, text).await {
						warn!(path = %path.display(), err = %e, "failed to re-sync open document");
					}
				}
				Err(e) => debug!(path = %path.display(), err = %e, "cannot read changed file"),
			}
		}

		if changes.is_empty() {
			return;
		}
		debug!(count = changes.len(), "forwarding watched-file changes");
		if let Err(e) = self.client.did_change_watched_files(changes).await {
			if !e.is_cancellation() {
				warn!(err = %e, "didChangeWatchedFiles failed");
			}
		}
	}

	/// Honor the server's dynamic registrations; fall back to a sensible
	/// source-file filter when none have arrived yet.
	fn interesting(&self, path: &Path, change: FileChangeType) -> bool {
		if !self.client.registrations.is_empty() {
			return self.client.registrations.matches(&self.root, path, change);
		}
		let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
		DEFAULT_WATCHED_EXTENSIONS.contains(&ext)
	}
}

fn change_type_code(change: FileChangeType) -> u32 {
	if change == FileChangeType::CREATED {
		1
	} else if change == FileChangeType::CHANGED {
		2
	} else {
		3
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn change_types_map_to_lsp_codes() {
		assert_eq!(change_type_code(FileChangeType::CREATED), 1);
		assert_eq!(change_type_code(FileChangeType::CHANGED), 2);
		assert_eq!(change_type_code(FileChangeType::DELETED), 3);
	}
}
