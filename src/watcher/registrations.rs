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

//! Dynamic file-watcher registrations from `client/registerCapability`
//!
//! The registry is an append/remove log with current-set semantics: the
//! workspace watcher consults the current union on every event instead of
//! diffing registrations incrementally.

use glob::Pattern;
use lsp_types::{FileChangeType, FileSystemWatcher, GlobPattern, OneOf, WatchKind};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

struct CompiledWatcher {
	globs: Vec<Pattern>,
	kind: WatchKind,
}

struct RegistrationEntry {
	id: String,
	watchers: Vec<CompiledWatcher>,
}

/// Current set of server-registered watch patterns.
#[derive(Default)]
pub struct WatcherRegistry {
	entries: Mutex<Vec<RegistrationEntry>>,
}

impl WatcherRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Install (or replace) a registration received from the server.
	pub fn register(&self, id: String, watchers: Vec<FileSystemWatcher>) {
		let compiled: Vec<CompiledWatcher> = watchers
			.iter()
			.filter_map(|watcher| {
				let raw = match &watcher.glob_pattern {
					GlobPattern::String(pattern) => pattern.clone(),
					// Relative patterns resolve against a base URI; matching
					// on the pattern alone is the lenient superset.
					GlobPattern::Relative(relative) => {
						let base = match &relative.base_uri {
							OneOf::Left(folder) => folder.uri.as_str().to_string(),
							OneOf::Right(uri) => uri.as_str().to_string(),
						};
						debug!(base = %base, pattern = %relative.pattern, "relative watch pattern");
						relative.pattern.clone()
					}
				};
				let kind = watcher
					.kind
					.unwrap_or(WatchKind::Create | WatchKind::Change | WatchKind::Delete);
				let globs = compile_glob(&raw);
				if globs.is_empty() {
					warn!(pattern = %raw, "unusable watch pattern, skipping");
					return None;
				}
				Some(CompiledWatcher { globs, kind })
			})
			.collect();

		debug!(id = %id, watchers = compiled.len(), "file watcher registration");
		let mut entries = self.entries.lock().unwrap();
		entries.retain(|entry| entry.id != id);
		entries.push(RegistrationEntry {
			id,
			watchers: compiled,
		});
	}

	pub fn unregister(&self, id: &str) {
		debug!(id = %id, "file watcher unregistration");
		self.entries.lock().unwrap().retain(|entry| entry.id != id);
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().unwrap().is_empty()
	}

	/// Does any registered watcher cover this path and change kind?
	/// Candidates are matched both as given and workspace-relative.
	pub fn matches(&self, workspace_root: &Path, path: &Path, change: FileChangeType) -> bool {
		let wanted = if change == FileChangeType::CREATED {
			WatchKind::Create
		} else if change == FileChangeType::DELETED {
			WatchKind::Delete
		} else {
			WatchKind::Change
		};

		let absolute = path.to_string_lossy().to_string();
		let relative = path
			.strip_prefix(workspace_root)
			.map(|p| p.to_string_lossy().to_string())
			.unwrap_or_else(|_| absolute.clone());

		let entries = self.entries.lock().unwrap();
		entries.iter().any(|entry| {
			entry.watchers.iter().any(|watcher| {
				watcher.kind.contains(wanted)
					&& watcher
						.globs
						.iter()
						.any(|glob| glob.matches(&relative) || glob.matches(&absolute))
			})
		})
	}
}

/// Compile an LSP glob into `glob::Pattern`s. The `glob` crate covers `*`,
/// `**`, `?` and `[...]`; `{a,b}` alternation is expanded by hand first.
fn compile_glob(pattern: &str) -> Vec<Pattern> {
	expand_braces(pattern)
		.into_iter()
		.filter_map(|expanded| Pattern::new(&expanded).ok())
		.collect()
}

/// Expand one level of `{a,b,c}` alternation, recursing for nested groups.
fn expand_braces(pattern: &str) -> Vec<String> {
	let Some(open) = pattern.find('{') else {
		return vec![pattern.to_string()];
	};

	let mut depth = 0usize;
	let mut close = None;
	for (index, ch) in pattern.char_indices().skip(open) {
		match ch {
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					close = Some(index);
					break;
				}
			}
			_ => {}
		}
	}
	let Some(close) = close else {
		// Unbalanced braces; treat the pattern literally.
		return vec![pattern.to_string()];
	};

	let prefix = &pattern[..open];
	let suffix = &pattern[close + 1..];
	let body = &pattern[open + 1..close];

	let mut alternatives = Vec::new();
	let mut current = String::new();
	let mut nested = 0usize;
	for ch in body.chars() {
		match ch {
			'{' => {
				nested += 1;
				current.push(ch);
			}
			'}' => {
				nested -= 1;
				current.push(ch);
			}
			',' if nested == 0 => {
				alternatives.push(current.clone());
				current.clear();
			}
			_ => current.push(ch),
		}
	}
	alternatives.push(current);

	alternatives
		.into_iter()
		.flat_map(|alternative| expand_braces(&format!("{}{}{}", prefix, alternative, suffix)))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn watcher(pattern: &str, kind: Option<WatchKind>) -> FileSystemWatcher {
		FileSystemWatcher {
			glob_pattern: GlobPattern::String(pattern.to_string()),
			kind,
		}
	}

	#[test]
	fn expands_brace_alternation() {
		let mut expanded = expand_braces("**/*.{ts,tsx}");
		expanded.sort();
		assert_eq!(expanded, vec!["**/*.ts", "**/*.tsx"]);

		assert_eq!(expand_braces("**/*.rs"), vec!["**/*.rs"]);
		// Nested groups expand fully.
		assert_eq!(expand_braces("a.{x,{y,z}}").len(), 3);
	}

	#[test]
	fn matches_registered_patterns() {
		let registry = WatcherRegistry::new();
		registry.register("r1".into(), vec![watcher("**/*.go", None)]);

		let root = Path::new("/work");
		assert!(registry.matches(root, Path::new("/work/pkg/a.go"), FileChangeType::CHANGED));
		assert!(!registry.matches(root, Path::new("/work/pkg/a.py"), FileChangeType::CHANGED));
	}

	#[test]
	fn respects_kind_mask() {
		let registry = WatcherRegistry::new();
		registry.register("r1".into(), vec![watcher("**/*.rs", Some(WatchKind::Delete))]);

		let root = Path::new("/work");
		assert!(registry.matches(root, Path::new("/work/a.rs"), FileChangeType::DELETED));
		assert!(!registry.matches(root, Path::new("/work/a.rs"), FileChangeType::CHANGED));
		assert!(!registry.matches(root, Path::new("/work/a.rs"), FileChangeType::CREATED));
	}

	#[test]
	fn unregister_removes_the_current_set() {
		let registry = WatcherRegistry::new();
		registry.register("r1".into(), vec![watcher("**/*.ts", None)]);
		registry.register("r2".into(), vec![watcher("**/*.js", None)]);

		let root = Path::new("/w");
		assert!(registry.matches(root, Path::new("/w/a.ts"), FileChangeType::CHANGED));

		registry.unregister("r1");
		assert!(!registry.matches(root, Path::new("/w/a.ts"), FileChangeType::CHANGED));
		assert!(registry.matches(root, Path::new("/w/a.js"), FileChangeType::CHANGED));
		assert!(!registry.is_empty());

		registry.unregister("r2");
		assert!(registry.is_empty());
	}

	#[test]
	fn reregistering_same_id_replaces_patterns() {
		let registry = WatcherRegistry::new();
		registry.register("r1".into(), vec![watcher("**/*.ts", None)]);
		registry.register("r1".into(), vec![watcher("**/*.rs", None)]);

		let root = Path::new("/w");
		assert!(!registry.matches(root, Path::new("/w/a.ts"), FileChangeType::CHANGED));
		assert!(registry.matches(root, Path::new("/w/a.rs"), FileChangeType::CHANGED));
	}
}
