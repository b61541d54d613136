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

//! Gitignore-style suppression of uninteresting filesystem events

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Paths suppressed unconditionally: VCS internals, build output and
/// dependency caches that would otherwise flood the language server.
const ALWAYS_IGNORED: &[&str] = &[
	".git/",
	".hg/",
	".svn/",
	"node_modules/",
	"target/",
	"dist/",
	"build/",
	"out/",
	"vendor/",
	"__pycache__/",
	".venv/",
	".idea/",
	".vscode/",
	".DS_Store",
];

/// Ignore rules for the workspace watcher: a built-in set plus the
/// workspace's own `.gitignore` patterns (simplified matching, not a full
/// gitignore engine).
pub struct IgnoreRules {
	workspace_root: PathBuf,
	patterns: HashSet<String>,
}

impl IgnoreRules {
	pub fn load(workspace_root: PathBuf) -> Self {
		let mut rules = Self {
			workspace_root,
			patterns: HashSet::new(),
		};
		rules.load_gitignore();
		rules
	}

	fn load_gitignore(&mut self) {
		let gitignore = self.workspace_root.join(".gitignore");
		if let Ok(content) = std::fs::read_to_string(&gitignore) {
			for line in content.lines() {
				let line = line.trim();
				if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
					continue;
				}
				let pattern = line.trim_start_matches('/').trim_end_matches('/');
				if !pattern.is_empty() {
					self.patterns.insert(pattern.to_string());
				}
			}
		}
	}

	pub fn should_ignore(&self, path: &Path) -> bool {
		let path_str = path.to_string_lossy();
		if ALWAYS_IGNORED.iter().any(|ignored| {
			let bare = ignored.trim_end_matches('/');
			path_str.contains(&format!("/{}/", bare)) || path_str.ends_with(bare)
		}) {
			return true;
		}

		let relative = path
			.strip_prefix(&self.workspace_root)
			.map(|p| p.to_string_lossy().to_string())
			.unwrap_or_else(|_| path_str.to_string());

		self.patterns
			.iter()
			.any(|pattern| matches_pattern(&relative, pattern))
	}
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
	if path == pattern
		|| path.starts_with(&format!("{}/", pattern))
		|| path.contains(&format!("/{}/", pattern))
	{
		return true;
	}
	if let Some(ext) = pattern.strip_prefix("*.") {
		return path.ends_with(&format!(".{}", ext));
	}
	if let Some(star) = pattern.find('*') {
		let (before, after) = (&pattern[..star], &pattern[star + 1..]);
		return path.starts_with(before) && path.ends_with(after);
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn ignores_vcs_and_build_dirs() {
		let rules = IgnoreRules::load(PathBuf::from("/work"));
		assert!(rules.should_ignore(Path::new("/work/.git/HEAD")));
		assert!(rules.should_ignore(Path::new("/work/target/debug/app")));
		assert!(rules.should_ignore(Path::new("/work/a/node_modules/x/index.js")));
		assert!(!rules.should_ignore(Path::new("/work/src/main.rs")));
	}

	#[test]
	fn honors_gitignore_patterns() {
		let dir = tempfile::tempdir().unwrap();
		let mut gitignore = std::fs::File::create(dir.path().join(".gitignore")).unwrap();
		writeln!(gitignore, "# build output").unwrap();
		writeln!(gitignore, "*.log").unwrap();
		writeln!(gitignore, "coverage/").unwrap();
		drop(gitignore);

		let rules = IgnoreRules::load(dir.path().to_path_buf());
		assert!(rules.should_ignore(&dir.path().join("debug.log")));
		assert!(rules.should_ignore(&dir.path().join("coverage/lcov.info")));
		assert!(!rules.should_ignore(&dir.path().join("src/lib.rs")));
	}

	#[test]
	fn negation_and_comments_are_skipped() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(".gitignore"), "!keep.log\n# note\n").unwrap();

		let rules = IgnoreRules::load(dir.path().to_path_buf());
		assert!(!rules.should_ignore(&dir.path().join("keep.log")));
	}
}
