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

//! `hover` tool: type and documentation info at a position

use anyhow::Result;
use lsp_types::{HoverContents, MarkedString};
use tokio_util::sync::CancellationToken;

use super::{to_position, workspace_path};
use crate::lsp::LspClient;

pub async fn hover_info(
	client: &LspClient,
	file_path: &str,
	line: u32,
	column: u32,
	ctx: &CancellationToken,
) -> Result<String> {
	let path = workspace_path(client, file_path);
	let uri = client.ensure_open(&path).await?;

	let hover = client.hover(&uri, to_position(line, column), ctx).await?;
	match hover {
		Some(hover) => {
			let contents = flatten_contents(&hover.contents);
			if contents.trim().is_empty() {
				Ok(format!("No hover information at {}:{}:{}", file_path, line, column))
			} else {
				Ok(contents)
			}
		}
		None => Ok(format!("No hover information at {}:{}:{}", file_path, line, column)),
	}
}

/// Hover contents arrive as a scalar, an array, or markup; flatten them to
/// displayable text.
fn flatten_contents(contents: &HoverContents) -> String {
	fn marked(string: &MarkedString) -> String {
		match string {
			MarkedString::String(text) => text.clone(),
			MarkedString::LanguageString(language) => language.value.clone(),
		}
	}

	match contents {
		HoverContents::Scalar(scalar) => marked(scalar),
		HoverContents::Array(parts) => parts
			.iter()
			.map(marked)
			.collect::<Vec<_>>()
			.join("\n\n"),
		HoverContents::Markup(markup) => markup.value.clone(),
	}
}
