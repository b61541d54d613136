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

//! `diagnostics` tool: latest published diagnostics with source context

use anyhow::Result;
use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};
use std::time::{Duration, Instant};

use super::{display_path, render_snippet, workspace_path};
use crate::lsp::LspClient;

/// How long to wait for a publish when the cache has nothing fresh.
/// Diagnostics are asynchronous; servers publish shortly after a sync.
const PUBLISH_WAIT: Duration = Duration::from_secs(3);

pub async fn file_diagnostics(
	client: &LspClient,
	file_path: &str,
	context_lines: u32,
	show_line_numbers: bool,
) -> Result<String> {
	let path = workspace_path(client, file_path);
	let before = Instant::now();
	let (uri, synced) = client.ensure_open_synced(&path).await?;

	// Only accept diagnostics computed against the current text: anything
	// published before the document's last sync describes old content.
	let floor = if synced {
		Some(before)
	} else {
		client.docs.changed_at(&uri)
	};
	let entry = match client.diagnostics_for(&uri) {
		Some(entry) if floor.map(|t| entry.received_at > t).unwrap_or(true) => Some(entry),
		_ => client.wait_for_diagnostics(&uri, floor, PUBLISH_WAIT).await,
	};

	let display = display_path(client, &path);
	let Some(entry) = entry else {
		return Ok(format!("No diagnostics reported for {}", display));
	};
	if entry.params.diagnostics.is_empty() {
		return Ok(format!("No diagnostics for {}", display));
	}

	let text = client.docs.text(&uri).unwrap_or_default();
	let mut out = format!(
		"{} diagnostics for {}\n",
		entry.params.diagnostics.len(),
		display
	);
	for diagnostic in &entry.params.diagnostics {
		out.push('\n');
		out.push_str(&render_diagnostic(diagnostic));
		if context_lines > 0 {
			out.push_str(&render_snippet(
				&text,
				diagnostic.range.start.line,
				context_lines,
				show_line_numbers,
			));
		}
	}
	Ok(out)
}

fn render_diagnostic(diagnostic: &Diagnostic) -> String {
	let severity = diagnostic
		.severity
		.map(|severity| {
			if severity == DiagnosticSeverity::ERROR {
				"error"
			} else if severity == DiagnosticSeverity::WARNING {
				"warning"
			} else if severity == DiagnosticSeverity::HINT {
				"hint"
			} else {
				"info"
			}
		})
		.unwrap_or("info");
	let source = diagnostic.source.as_deref().unwrap_or("lsp");
	let code = match &diagnostic.code {
		Some(NumberOrString::Number(n)) => format!(" [{}]", n),
		Some(NumberOrString::String(s)) => format!(" [{}]", s),
		None => String::new(),
	};
	format!(
		"{}:{}:{} {}{}: {}\n",
		severity,
		diagnostic.range.start.line + 1,
		diagnostic.range.start.character + 1,
		source,
		code,
		diagnostic.message
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::{Position, Range};

	#[test]
	fn renders_severity_position_and_code() {
		let diagnostic = Diagnostic {
			range: Range {
				start: Position { line: 0, character: 6 },
				end: Position { line: 0, character: 7 },
			},
			severity: Some(DiagnosticSeverity::ERROR),
			code: Some(NumberOrString::Number(2322)),
			source: Some("ts".to_string()),
			message: "Type 'string' is not assignable to type 'number'.".to_string(),
			..Default::default()
		};

		let rendered = render_diagnostic(&diagnostic);
		assert_eq!(
			rendered,
			"error:1:7 ts [2322]: Type 'string' is not assignable to type 'number'.\n"
		);
	}
}
