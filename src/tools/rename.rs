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

//! `rename_symbol` tool: project-wide rename applied atomically

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{display_path, to_position, workspace_path};
use crate::lsp::LspClient;

pub async fn rename_symbol(
	client: &LspClient,
	file_path: &str,
	line: u32,
	column: u32,
	new_name: &str,
	ctx: &CancellationToken,
) -> Result<String> {
	if new_name.trim().is_empty() {
		return Err(anyhow::anyhow!("new name must not be empty"));
	}

	let path = workspace_path(client, file_path);
	let uri = client.ensure_open(&path).await?;

	let edit = client
		.rename(&uri, to_position(line, column), new_name, ctx)
		.await?;
	let Some(edit) = edit else {
		return Ok(format!(
			"The server produced no changes for renaming at {}:{}:{}",
			file_path, line, column
		));
	};

	let changed = client.apply_workspace_edit(&edit).await?;
	if changed.is_empty() {
		return Ok(format!(
			"The server produced no changes for renaming at {}:{}:{}",
			file_path, line, column
		));
	}

	info!(files = changed.len(), new_name = new_name, "rename applied");
	let mut out = format!(
		"Renamed symbol to '{}'. {} file(s) updated:\n",
		new_name,
		changed.len()
	);
	let mut names: Vec<String> = changed
		.iter()
		.map(|path| display_path(client, path))
		.collect();
	names.sort();
	for name in names {
		out.push_str(&format!("  {}\n", name));
	}
	Ok(out)
}
