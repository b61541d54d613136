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

//! `references` tool: every usage of a symbol, grouped by file

use anyhow::Result;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use super::definition::locate_symbol;
use super::display_path;
use crate::lsp::protocol::uri_to_path;
use crate::lsp::LspClient;

pub async fn find_references(
	client: &LspClient,
	symbol_name: &str,
	ctx: &CancellationToken,
) -> Result<String> {
	let hits = locate_symbol(client, symbol_name, ctx).await?;
	let Some(definition) = hits.first() else {
		return Err(anyhow::anyhow!("symbol '{}' not found in workspace", symbol_name));
	};

	let definition_path = uri_to_path(&definition.location.uri)?;
	let uri = client.ensure_open(&definition_path).await?;
	let locations = client
		.references(&uri, definition.location.range.start, true, ctx)
		.await?;

	if locations.is_empty() {
		return Ok(format!("No references found for '{}'", symbol_name));
	}

	// Group by file with one-line context per occurrence. BTreeMap keeps
	// the output stable across runs.
	let mut grouped: BTreeMap<String, Vec<(u32, String)>> = BTreeMap::new();
	for location in &locations {
		let path = uri_to_path(&location.uri)?;
		let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
		let line_index = location.range.start.line as usize;
		let context = content
			.lines()
			.nth(line_index)
			.unwrap_or("")
			.trim_end()
			.to_string();
		grouped
			.entry(display_path(client, &path))
			.or_default()
			.push((location.range.start.line + 1, context));
	}

	let mut out = format!("{} references to '{}'\n", locations.len(), symbol_name);
	for (file, mut entries) in grouped {
		entries.sort_by_key(|(line, _)| *line);
		entries.dedup();
		out.push_str(&format!("\n{}:\n", file));
		for (line, context) in entries {
			out.push_str(&format!("  {}: {}\n", line, context.trim_start()));
		}
	}
	Ok(out)
}
