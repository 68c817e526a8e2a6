//! Path & Ignore (C1): `.driveignore` compilation and matching.
//!
//! Per the design note on ignore matching: a two-list matcher (excludes,
//! includes) rather than a single pattern tree. A name is ignored iff it
//! matches the exclude alternation and matches no include pattern.

use regex::Regex;
use std::fs;
use std::path::Path;

use crate::error::PathError;
use crate::path::HIDDEN_DIR_NAME;

pub const IGNORE_FILE_NAME: &str = ".driveignore";

/// OS-specific patterns appended unconditionally, on top of whatever the
/// user's `.driveignore` contributes.
fn builtin_patterns() -> Vec<String> {
	let mut patterns = vec![
		format!("^{}$", regex::escape(HIDDEN_DIR_NAME)),
		format!("^{}$", regex::escape(IGNORE_FILE_NAME)),
	];
	if cfg!(windows) {
		// Export-only virtual files manifest with a `.desktop`-equivalent
		// suffix on Unix; on Windows the local shell cruft file is the
		// one that needs suppressing instead.
		patterns.push(r"^desktop\.ini$".to_string());
	} else {
		patterns.push(r"\.desktop$".to_string());
	}
	patterns
}

/// A compiled ignore matcher: one alternation regex over excludes, one
/// over include overrides.
pub struct IgnoreMatcher {
	exclude: Option<Regex>,
	include: Option<Regex>,
}

impl IgnoreMatcher {
	/// Compile from raw `.driveignore` lines (comments and blanks already
	/// expected to be present; they are stripped here).
	pub fn compile(lines: &[String]) -> Result<Self, PathError> {
		let mut excludes = builtin_patterns();
		let mut includes = Vec::new();

		for raw in lines {
			let line = raw.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			if let Some(pattern) = line.strip_prefix('!') {
				includes.push(pattern.to_string());
			} else {
				excludes.push(line.to_string());
			}
		}

		let exclude = if excludes.is_empty() {
			None
		} else {
			Some(Regex::new(&excludes.join("|")).map_err(|e| PathError::InvalidPattern {
				pattern: excludes.join("|"),
				message: e.to_string(),
			})?)
		};

		let include = if includes.is_empty() {
			None
		} else {
			Some(Regex::new(&includes.join("|")).map_err(|e| PathError::InvalidPattern {
				pattern: includes.join("|"),
				message: e.to_string(),
			})?)
		};

		Ok(IgnoreMatcher { exclude, include })
	}

	/// Compile from the `.driveignore` file at `root`, if it exists. A
	/// missing file compiles to the builtin patterns only.
	pub fn load(root: &Path) -> Result<Self, PathError> {
		let path = root.join(IGNORE_FILE_NAME);
		let lines: Vec<String> = match fs::read_to_string(&path) {
			Ok(contents) => contents.lines().map(str::to_string).collect(),
			Err(_) => Vec::new(),
		};
		Self::compile(&lines)
	}

	/// Match a bare name (not a full path) against the compiled patterns.
	///
	/// Returns `false` when the exclude matcher is empty (nothing to
	/// match against).
	pub fn matches_ignore(&self, name: &str) -> bool {
		let excluded = match &self.exclude {
			Some(re) => re.is_match(name),
			None => false,
		};
		if !excluded {
			return false;
		}
		let included = match &self.include {
			Some(re) => re.is_match(name),
			None => false,
		};
		!included
	}
}


// vim: ts=4
