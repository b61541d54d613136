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

//! octolsp: an MCP server backed by a language server subprocess
//!
//! One process binds one workspace to one language server and exposes its
//! capabilities (definition, references, diagnostics, hover, rename,
//! edits) as MCP tools over stdio or HTTP.

pub mod config;
pub mod error;
pub mod lsp;
pub mod mcp;
pub mod supervisor;
pub mod tools;
pub mod watcher;
