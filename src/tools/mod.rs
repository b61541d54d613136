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

//! Semantic tools composed from LSP operations
//!
//! Line/column conventions at this boundary are 1-indexed inclusive; LSP
//! uses 0-indexed half-open ranges. Conversion happens here and nowhere
//! else.

pub mod definition;
pub mod diagnostics;
pub mod edit;
pub mod hover;
pub mod references;
pub mod rename;

use lsp_types::Position;
use std::path::{Path, PathBuf};

use crate::lsp::protocol::resolve_workspace_path;
use crate::lsp::LspClient;

/// Convert a 1-indexed (line, column) pair into an LSP position.
pub(crate) fn to_position(line: u32, column: u32) -> Position {
	Position {
		line: line.saturating_sub(1),
		character: column.saturating_sub(1),
	}
}

pub(crate) fn workspace_path(client: &LspClient, file_path: &str) -> PathBuf {
	resolve_workspace_path(client.workspace_root(), file_path)
}

/// Workspace-relative display form of a path.
pub(crate) fn display_path(client: &LspClient, path: &Path) -> String {
	path.strip_prefix(client.workspace_root())
		.unwrap_or(path)
		.to_string_lossy()
		.to_string()
}

/// Render the lines around `center` (0-indexed) with optional line numbers.
/// The window is clamped to the document.
pub(crate) fn render_snippet(
	text: &str,
	center: u32,
	context_lines: u32,
	show_line_numbers: bool,
) -> String {
	let lines: Vec<&str> = text.lines().collect();
	if lines.is_empty() {
		return String::new();
	}

	let center = (center as usize).min(lines.len() - 1);
	let first = center.saturating_sub(context_lines as usize);
	let last = (center + context_lines as usize).min(lines.len() - 1);

	let mut out = String::new();
	for (index, line) in lines.iter().enumerate().take(last + 1).skip(first) {
		if show_line_numbers {
			out.push_str(&format!("{:>4}| {}\n", index + 1, line));
		} else {
			out.push_str(line);
			out.push('\n');
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn position_conversion_is_one_indexed_inclusive() {
		let position = to_position(1, 1);
		assert_eq!((position.line, position.character), (0, 0));

		let position = to_position(10, 4);
		assert_eq!((position.line, position.character), (9, 3));

		// Zero inputs clamp instead of underflowing.
		let position = to_position(0, 0);
		assert_eq!((position.line, position.character), (0, 0));
	}

	#[test]
	fn snippet_clamps_to_document_bounds() {
		let text = "one\ntwo\nthree";
		let snippet = render_snippet(text, 0, 5, true);
		assert!(snippet.contains("   1| one"));
		assert!(snippet.contains("   3| three"));

		let snippet = render_snippet(text, 99, 1, false);
		assert_eq!(snippet, "two\nthree\n");
	}
}
