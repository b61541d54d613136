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

//! `definition` tool: resolve a symbol name to its full definition text

use anyhow::Result;
use lsp_types::Range;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::display_path;
use crate::lsp::client::DocumentSymbolNode;
use crate::lsp::protocol::uri_to_path;
use crate::lsp::{LspClient, SymbolHit};

/// Fallback scan limit when the server gives only a name-sized range.
const MAX_HEURISTIC_LINES: usize = 200;

pub async fn read_definition(
	client: &LspClient,
	symbol_name: &str,
	ctx: &CancellationToken,
) -> Result<String> {
	let hits = locate_symbol(client, symbol_name, ctx).await?;
	if hits.is_empty() {
		return Err(anyhow::anyhow!("no definition found for symbol '{}'", symbol_name));
	}

	let mut sections = Vec::new();
	for hit in hits {
		let path = uri_to_path(&hit.location.uri)?;
		let uri = client.ensure_open(&path).await?;
		let text = client
			.docs
			.text(&uri)
			.unwrap_or_default();

		// Prefer the enclosing declaration range when the server provides
		// one; otherwise extend heuristically from the reported position.
		let range = match client.document_symbols(&uri, ctx).await {
			Ok(symbols) => enclosing_range(&symbols, hit.location.range),
			Err(_) => None,
		};

		let (first, last) = match range {
			Some(range) if range.end.line > range.start.line => {
				(range.start.line as usize, range.end.line as usize)
			}
			_ => definition_lines(&text, hit.location.range.start.line as usize),
		};

		let lines: Vec<&str> = text.lines().collect();
		let last = last.min(lines.len().saturating_sub(1));
		let first = first.min(last);
		let body = lines[first..=last].join("\n");

		sections.push(format!(
			"{} ({}:{}-{})\n{}",
			hit.name,
			display_path(client, &path),
			first + 1,
			last + 1,
			body
		));
	}

	Ok(sections.join("\n\n---\n\n"))
}

/// Resolve a (possibly dotted) symbol name to candidate definition sites
/// via `workspace/symbol`.
pub(crate) async fn locate_symbol(
	client: &LspClient,
	symbol_name: &str,
	ctx: &CancellationToken,
) -> Result<Vec<SymbolHit>> {
	let mut hits = client.workspace_symbols(symbol_name, ctx).await?;
	if hits.is_empty() {
		// Servers index by bare name; retry with the trailing segment.
		if let Some(bare) = symbol_name.rsplit('.').next() {
			if bare != symbol_name {
				hits = client.workspace_symbols(bare, ctx).await?;
			}
		}
	}

	let mut matched: Vec<SymbolHit> = hits
		.into_iter()
		.filter(|hit| symbol_matches(&hit.name, hit.container.as_deref(), symbol_name))
		.collect();

	// Exact qualified matches outrank container-suffix matches; server
	// order is preserved within a rank.
	matched.sort_by_key(|hit| if hit.name == symbol_name { 0 } else { 1 });
	debug!(symbol = symbol_name, matches = matched.len(), "symbol lookup");
	Ok(matched)
}

/// Dotted-path matching: the trailing segment must equal the candidate
/// name (or the candidate may carry the full dotted name itself), and any
/// leading segments must suffix-match the candidate's container.
pub(crate) fn symbol_matches(name: &str, container: Option<&str>, query: &str) -> bool {
	if name == query {
		return true;
	}

	let segments: Vec<&str> = query.split('.').collect();
	let last = segments.last().copied().unwrap_or(query);
	if name != last {
		// Methods are often reported as "Type.Method".
		return segments.len() > 1 && name == segments[segments.len() - 2..].join(".");
	}
	if segments.len() == 1 {
		return true;
	}

	let qualifier = segments[..segments.len() - 1].join(".");
	container.is_some_and(|container| {
		container == qualifier || container.ends_with(&format!(".{}", qualifier)) || container.ends_with(&format!("/{}", qualifier))
	})
}

/// Find the innermost document symbol whose range contains `target`.
fn enclosing_range(symbols: &[DocumentSymbolNode], target: Range) -> Option<Range> {
	fn contains(range: &Range, target: &Range) -> bool {
		(range.start.line < target.start.line
			|| (range.start.line == target.start.line
				&& range.start.character <= target.start.character))
			&& (range.end.line > target.end.line
				|| (range.end.line == target.end.line
					&& range.end.character >= target.end.character))
	}

	let mut best: Option<Range> = None;
	for symbol in symbols {
		if contains(&symbol.range, &target) {
			let inner = enclosing_range(&symbol.children, target);
			best = Some(inner.unwrap_or(symbol.range));
			break;
		}
	}
	best
}

/// Heuristic definition span: from the start line, follow brace balance to
/// the closing line; brace-less declarations end at a `;` or a blank line.
pub(crate) fn definition_lines(text: &str, start_line: usize) -> (usize, usize) {
	let lines: Vec<&str> = text.lines().collect();
	if lines.is_empty() {
		return (0, 0);
	}
	let start_line = start_line.min(lines.len() - 1);

	let mut depth = 0i64;
	let mut saw_brace = false;
	let mut end = start_line;

	for (index, line) in lines.iter().enumerate().skip(start_line) {
		for ch in line.chars() {
			match ch {
				'{' => {
					depth += 1;
					saw_brace = true;
				}
				'}' => depth -= 1,
				_ => {}
			}
		}
		end = index;

		if saw_brace && depth <= 0 {
			break;
		}
		if !saw_brace && line.trim_end().ends_with(';') {
			break;
		}
		if !saw_brace && index > start_line && line.trim().is_empty() {
			end = index - 1;
			break;
		}
		if index - start_line >= MAX_HEURISTIC_LINES {
			break;
		}
	}

	(start_line, end)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_name_matches_by_equality() {
		assert!(symbol_matches("Foo", None, "Foo"));
		assert!(!symbol_matches("FooBar", None, "Foo"));
	}

	#[test]
	fn dotted_query_requires_container_suffix() {
		assert!(symbol_matches("Foo", Some("p"), "p.Foo"));
		assert!(symbol_matches("Foo", Some("github.com/x/p"), "p.Foo"));
		assert!(symbol_matches("MyMethod", Some("mypkg.MyType"), "MyType.MyMethod"));
		assert!(!symbol_matches("Foo", Some("other"), "p.Foo"));
		assert!(!symbol_matches("Foo", None, "p.Foo"));
	}

	#[test]
	fn qualified_candidate_names_match_directly() {
		assert!(symbol_matches("MyType.MyMethod", None, "MyType.MyMethod"));
		assert!(symbol_matches("MyType.MyMethod", None, "mypkg.MyType.MyMethod"));
	}

	#[test]
	fn braced_definition_spans_to_closing_brace() {
		let text = "package p\n\nfunc Foo() {\n\tbar()\n}\n\nfunc Other() {}\n";
		assert_eq!(definition_lines(text, 2), (2, 4));
		// Single-line body closes on its own line.
		assert_eq!(definition_lines(text, 6), (6, 6));
	}

	#[test]
	fn braceless_definition_ends_at_semicolon_or_blank() {
		let text = "const x: number = 1;\nconst y = 2;\n";
		assert_eq!(definition_lines(text, 0), (0, 0));

		let text = "type A =\n  | B\n  | C\n\nfn next() {}\n";
		assert_eq!(definition_lines(text, 0), (0, 2));
	}

	#[test]
	fn enclosing_range_prefers_innermost_symbol() {
		use lsp_types::Position;
		let range = |sl, sc, el, ec| Range {
			start: Position { line: sl, character: sc },
			end: Position { line: el, character: ec },
		};
		let symbols = vec![DocumentSymbolNode {
			name: "Outer".into(),
			range: range(0, 0, 10, 1),
			selection_range: range(0, 5, 0, 10),
			children: vec![DocumentSymbolNode {
				name: "inner".into(),
				range: range(2, 0, 4, 1),
				selection_range: range(2, 3, 2, 8),
				children: Vec::new(),
			}],
		}];

		let hit = range(2, 3, 2, 8);
		assert_eq!(enclosing_range(&symbols, hit), Some(range(2, 0, 4, 1)));

		let hit = range(6, 0, 6, 3);
		assert_eq!(enclosing_range(&symbols, hit), Some(range(0, 0, 10, 1)));
	}
}
