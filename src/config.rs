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

//! Validated runtime configuration assembled from the CLI

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Which transport carries the MCP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
	Stdio,
	Http,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	/// Absolute path of the workspace the language server analyzes.
	pub workspace: PathBuf,
	/// Language server executable, verified to resolve.
	pub lsp_command: String,
	/// Argv tail forwarded verbatim to the language server.
	pub lsp_args: Vec<String>,
	pub mode: TransportMode,
	/// Bind port, used only in http mode.
	pub port: u16,
	pub debug: bool,
}

impl ServerConfig {
	pub fn new(
		workspace: String,
		lsp_command: String,
		lsp_args: Vec<String>,
		mode: TransportMode,
		port: u16,
		debug: bool,
	) -> Result<Self> {
		let workspace = Path::new(&workspace)
			.canonicalize()
			.map_err(|e| anyhow::anyhow!("invalid workspace '{}': {}", workspace, e))?;
		if !workspace.is_dir() {
			return Err(anyhow::anyhow!(
				"workspace '{}' is not a directory",
				workspace.display()
			));
		}

		if lsp_command.is_empty() {
			return Err(anyhow::anyhow!("LSP command is required"));
		}
		if find_executable(&lsp_command).is_none() {
			return Err(anyhow::anyhow!("LSP command not found: {}", lsp_command));
		}

		Ok(Self {
			workspace,
			lsp_command,
			lsp_args,
			mode,
			port,
			debug,
		})
	}
}

/// Resolve a command the way the shell would: explicit paths are checked
/// directly, bare names are searched on PATH.
fn find_executable(command: &str) -> Option<PathBuf> {
	let candidate = Path::new(command);
	if candidate.components().count() > 1 {
		return candidate.is_file().then(|| candidate.to_path_buf());
	}

	let path_var = std::env::var_os("PATH")?;
	for dir in std::env::split_paths(&path_var) {
		let full = dir.join(command);
		if full.is_file() {
			return Some(full);
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn workspace_must_exist() {
		let err = ServerConfig::new(
			"/definitely/not/a/real/dir".into(),
			"sh".into(),
			vec![],
			TransportMode::Stdio,
			8080,
			false,
		)
		.unwrap_err();
		assert!(err.to_string().contains("invalid workspace"));
	}

	#[test]
	fn workspace_is_canonicalized() {
		let dir = tempfile::tempdir().unwrap();
		let config = ServerConfig::new(
			dir.path().to_string_lossy().to_string(),
			"sh".into(),
			vec!["--stdio".into()],
			TransportMode::Http,
			9000,
			true,
		)
		.unwrap();
		assert!(config.workspace.is_absolute());
		assert_eq!(config.lsp_args, vec!["--stdio".to_string()]);
	}

	#[test]
	fn missing_lsp_command_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let err = ServerConfig::new(
			dir.path().to_string_lossy().to_string(),
			"no-such-language-server-xyz".into(),
			vec![],
			TransportMode::Stdio,
			8080,
			false,
		)
		.unwrap_err();
		assert!(err.to_string().contains("not found"));
	}

	#[test]
	fn finds_executables_on_path() {
		// `sh` exists on every platform we build for.
		assert!(find_executable("sh").is_some());
		assert!(find_executable("no-such-language-server-xyz").is_none());
	}
}
