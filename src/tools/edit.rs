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

//! `edit_file` tool: 1-indexed inclusive line-range edits with a diff summary

use anyhow::Result;
use serde::Deserialize;
use similar::TextDiff;

use super::{display_path, workspace_path};
use crate::error::BridgeError;
use crate::lsp::LspClient;

/// One replacement of an inclusive 1-indexed line range. An empty
/// `newText` deletes the range.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEdit {
	pub start_line: u32,
	pub end_line: u32,
	#[serde(default)]
	pub new_text: String,
}

pub async fn edit_file(client: &LspClient, file_path: &str, edits: &[LineEdit]) -> Result<String> {
	if edits.is_empty() {
		return Err(BridgeError::InvalidInput("no edits provided".into()).into());
	}

	let path = workspace_path(client, file_path);
	let uri = client.ensure_open(&path).await?;
	let old_text = client
		.docs
		.text(&uri)
		.ok_or_else(|| BridgeError::InvalidInput(format!("document not open: {}", file_path)))?;

	let new_text = apply_line_edits(&old_text, edits)?;

	tokio::fs::write(&path, &new_text).await?;
	// Sync before returning so a follow-up query sees the edited text.
	client.notify_change(&uri, new_text.clone()).await?;

	let display = display_path(client, &path);
	let diff = TextDiff::from_lines(&old_text, &new_text)
		.unified_diff()
		.context_radius(3)
		.header(&display, &display)
		.to_string();

	Ok(format!(
		"Applied {} edit(s) to {}\n\n{}",
		edits.len(),
		display,
		diff
	))
}

/// Validate and apply line edits: in-bounds, non-overlapping, applied in
/// descending start order so earlier offsets stay valid.
pub(crate) fn apply_line_edits(
	text: &str,
	edits: &[LineEdit],
) -> std::result::Result<String, BridgeError> {
	let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
	let line_count = lines.len() as u32;

	let mut ordered: Vec<&LineEdit> = edits.iter().collect();
	ordered.sort_by_key(|edit| edit.start_line);

	let mut previous_end: Option<u32> = None;
	for edit in &ordered {
		if edit.start_line == 0 {
			return Err(BridgeError::InvalidInput(
				"line numbers are 1-indexed; startLine must be >= 1".into(),
			));
		}
		if edit.end_line < edit.start_line {
			return Err(BridgeError::InvalidInput(format!(
				"endLine {} precedes startLine {}",
				edit.end_line, edit.start_line
			)));
		}
		if edit.end_line > line_count {
			return Err(BridgeError::InvalidInput(format!(
				"endLine {} is beyond the end of the file ({} lines)",
				edit.end_line, line_count
			)));
		}
		if let Some(previous) = previous_end {
			if edit.start_line <= previous {
				return Err(BridgeError::InvalidInput(format!(
					"edits overlap: line {} was already edited",
					edit.start_line
				)));
			}
		}
		previous_end = Some(edit.end_line);
	}

	for edit in ordered.iter().rev() {
		let start = (edit.start_line - 1) as usize;
		let end = edit.end_line as usize;
		let replacement: Vec<String> = if edit.new_text.is_empty() {
			Vec::new()
		} else {
			edit.new_text.lines().map(str::to_string).collect()
		};
		lines.splice(start..end, replacement);
	}

	let mut result = lines.join("\n");
	if text.ends_with('\n') && !result.is_empty() {
		result.push('\n');
	}
	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn edit(start: u32, end: u32, text: &str) -> LineEdit {
		LineEdit {
			start_line: start,
			end_line: end,
			new_text: text.to_string(),
		}
	}

	#[test]
	fn replaces_a_single_line() {
		let text = "const x: number = 1;\n";
		let result = apply_line_edits(text, &[edit(1, 1, "const x: number = \"oops\";")]).unwrap();
		assert_eq!(result, "const x: number = \"oops\";\n");
	}

	#[test]
	fn applies_multiple_edits_in_descending_order() {
		let text = "a\nb\nc\nd\ne\n";
		let result = apply_line_edits(text, &[edit(1, 1, "A"), edit(4, 5, "D")]).unwrap();
		assert_eq!(result, "A\nb\nc\nD\n");
	}

	#[test]
	fn empty_new_text_deletes_lines() {
		let text = "keep\ndrop\ndrop too\nkeep\n";
		let result = apply_line_edits(text, &[edit(2, 3, "")]).unwrap();
		assert_eq!(result, "keep\nkeep\n");
	}

	#[test]
	fn multi_line_replacement_can_grow_the_file() {
		let text = "one\ntwo\n";
		let result = apply_line_edits(text, &[edit(2, 2, "2\n2.5\n2.75")]).unwrap();
		assert_eq!(result, "one\n2\n2.5\n2.75\n");
	}

	#[test]
	fn rejects_out_of_bounds_ranges() {
		let text = "only\n";
		let err = apply_line_edits(text, &[edit(1, 5, "x")]).unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));

		let err = apply_line_edits(text, &[edit(0, 1, "x")]).unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));

		let err = apply_line_edits(text, &[edit(3, 2, "x")]).unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));
	}

	#[test]
	fn rejects_overlapping_edits() {
		let text = "a\nb\nc\n";
		let err = apply_line_edits(text, &[edit(1, 2, "x"), edit(2, 3, "y")]).unwrap_err();
		assert!(matches!(err, BridgeError::InvalidInput(_)));
	}

	#[test]
	fn preserves_missing_trailing_newline() {
		let text = "a\nb";
		let result = apply_line_edits(text, &[edit(2, 2, "B")]).unwrap();
		assert_eq!(result, "a\nB");
	}
}
