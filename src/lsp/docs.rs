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

//! Open-document state: versions, language ids and cached text

use lsp_types::Uri;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// State the server believes about one open document.
#[derive(Debug, Clone)]
pub struct OpenDocument {
	pub version: i32,
	pub language_id: String,
	pub text: String,
	/// When this text state was sent to the server. Diagnostics older than
	/// this describe a previous text.
	pub changed_at: Instant,
}

/// The open-document set.
///
/// Versions are strictly increasing per URI. The per-URI locks serialize
/// "mutate text + emit the sync notification" sections so a position-based
/// request can never slide between a change and its notification. Both
/// maps are leaf locks, never held across I/O.
#[derive(Default)]
pub struct DocumentStore {
	docs: Mutex<HashMap<Uri, OpenDocument>>,
	locks: Mutex<HashMap<Uri, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn contains(&self, uri: &Uri) -> bool {
		self.docs.lock().unwrap().contains_key(uri)
	}

	pub fn get(&self, uri: &Uri) -> Option<OpenDocument> {
		self.docs.lock().unwrap().get(uri).cloned()
	}

	pub fn text(&self, uri: &Uri) -> Option<String> {
		self.docs.lock().unwrap().get(uri).map(|d| d.text.clone())
	}

	/// Record a freshly opened document at version 0.
	pub fn insert_opened(&self, uri: Uri, language_id: String, text: String) {
		self.docs.lock().unwrap().insert(
			uri,
			OpenDocument {
				version: 0,
				language_id,
				text,
				changed_at: Instant::now(),
			},
		);
	}

	/// Replace the cached text and return the bumped version number.
	/// Returns `None` when the document is not open.
	pub fn bump_version(&self, uri: &Uri, new_text: String) -> Option<i32> {
		let mut docs = self.docs.lock().unwrap();
		let doc = docs.get_mut(uri)?;
		doc.version += 1;
		doc.text = new_text;
		doc.changed_at = Instant::now();
		Some(doc.version)
	}

	/// When the current text state of `uri` was last pushed to the server.
	pub fn changed_at(&self, uri: &Uri) -> Option<Instant> {
		self.docs.lock().unwrap().get(uri).map(|doc| doc.changed_at)
	}

	pub fn remove(&self, uri: &Uri) -> Option<OpenDocument> {
		self.locks.lock().unwrap().remove(uri);
		self.docs.lock().unwrap().remove(uri)
	}

	pub fn open_uris(&self) -> Vec<Uri> {
		self.docs.lock().unwrap().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.docs.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.lock().unwrap().is_empty()
	}

	/// Per-URI serialization point. Independent URIs never contend.
	pub fn lock_for(&self, uri: &Uri) -> Arc<tokio::sync::Mutex<()>> {
		self.locks
			.lock()
			.unwrap()
			.entry(uri.clone())
			.or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
			.clone()
	}
}

/// Infer the LSP language id from a file extension.
pub fn language_id_for_path(path: &Path) -> &'static str {
	let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
	match ext {
		"rs" => "rust",
		"go" => "go",
		"py" | "pyi" => "python",
		"ts" => "typescript",
		"tsx" => "typescriptreact",
		"js" | "mjs" | "cjs" => "javascript",
		"jsx" => "javascriptreact",
		"c" | "h" => "c",
		"cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
		"java" => "java",
		"rb" => "ruby",
		"php" => "php",
		"cs" => "csharp",
		"swift" => "swift",
		"kt" | "kts" => "kotlin",
		"zig" => "zig",
		"lua" => "lua",
		"sh" | "bash" => "shellscript",
		"json" => "json",
		"yaml" | "yml" => "yaml",
		"toml" => "toml",
		"html" => "html",
		"css" => "css",
		"md" => "markdown",
		"sql" => "sql",
		_ => "plaintext",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	fn uri(s: &str) -> Uri {
		Uri::from_str(s).unwrap()
	}

	#[test]
	fn versions_start_at_zero_and_strictly_increase() {
		let store = DocumentStore::new();
		let u = uri("file:///tmp/a.rs");
		store.insert_opened(u.clone(), "rust".into(), "fn a() {}".into());
		assert_eq!(store.get(&u).unwrap().version, 0);

		let v1 = store.bump_version(&u, "fn a() { 1; }".into()).unwrap();
		let v2 = store.bump_version(&u, "fn a() { 2; }".into()).unwrap();
		assert_eq!((v1, v2), (1, 2));
		assert_eq!(store.text(&u).unwrap(), "fn a() { 2; }");
	}

	#[test]
	fn close_removes_the_entry() {
		let store = DocumentStore::new();
		let u = uri("file:///tmp/b.go");
		store.insert_opened(u.clone(), "go".into(), "package b".into());
		assert!(store.contains(&u));

		store.remove(&u);
		assert!(!store.contains(&u));
		assert!(store.bump_version(&u, "x".into()).is_none());
	}

	#[test]
	fn per_uri_locks_are_stable_and_distinct() {
		let store = DocumentStore::new();
		let a = uri("file:///tmp/a.rs");
		let b = uri("file:///tmp/b.rs");

		let lock_a1 = store.lock_for(&a);
		let lock_a2 = store.lock_for(&a);
		let lock_b = store.lock_for(&b);
		assert!(Arc::ptr_eq(&lock_a1, &lock_a2));
		assert!(!Arc::ptr_eq(&lock_a1, &lock_b));
	}

	#[test]
	fn infers_language_ids() {
		assert_eq!(language_id_for_path(Path::new("src/main.rs")), "rust");
		assert_eq!(language_id_for_path(Path::new("a/b.tsx")), "typescriptreact");
		assert_eq!(language_id_for_path(Path::new("Makefile")), "plaintext");
	}
}
