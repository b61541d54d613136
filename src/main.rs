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

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use octolsp::config::{ServerConfig, TransportMode};
use octolsp::supervisor;

#[derive(Parser)]
#[command(name = "octolsp")]
#[command(version)]
#[command(about = "MCP server exposing language server capabilities as tools")]
struct Args {
	/// Path to the workspace directory the language server analyzes
	#[arg(long)]
	workspace: String,

	/// Language server command to run (args should be passed after --)
	#[arg(long)]
	lsp: String,

	/// Transport mode for the MCP surface
	#[arg(long, value_enum, default_value = "stdio")]
	mode: TransportMode,

	/// Port for HTTP mode (ignored for stdio mode)
	#[arg(long, default_value_t = 8080)]
	port: u16,

	/// Enable debug logging
	#[arg(long)]
	debug: bool,

	/// Arguments forwarded verbatim to the language server
	#[arg(last = true)]
	lsp_args: Vec<String>,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	// Logs go to stderr only: stdout carries the MCP protocol in stdio
	// mode, and nothing is persisted to disk.
	let default_filter = if args.debug { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
		)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.compact()
		.init();

	let config = match ServerConfig::new(
		args.workspace,
		args.lsp,
		args.lsp_args,
		args.mode,
		args.port,
		args.debug,
	) {
		Ok(config) => config,
		Err(e) => {
			error!(err = %e, "invalid configuration");
			std::process::exit(1);
		}
	};

	info!(
		version = env!("CARGO_PKG_VERSION"),
		workspace = %config.workspace.display(),
		lsp = %config.lsp_command,
		mode = ?config.mode,
		"octolsp starting"
	);

	if let Err(e) = supervisor::run(config).await {
		error!(err = format!("{:#}", e), "server error");
		std::process::exit(1);
	}

	info!("shutdown complete");
}
