//! Resolved runtime configuration for a sync invocation.
//!
//! Loading this struct from a profile file, environment, or CLI flags is
//! out of scope here — callers hand in an already-populated `Config`.
//! `Validator` mirrors the crate's validation idiom used elsewhere.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Strategy for resolving duplicate remote names sharing a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClashFixMode {
	/// Report clashes and abort (`ClashesDetected`).
	Off,
	/// Keep the first, rename the rest.
	Rename,
	/// Coerce every clashing change to a non-permanent delete.
	Trash,
}

impl Default for ClashFixMode {
	fn default() -> Self {
		ClashFixMode::Off
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Overrides context discovery; `None` means walk upward from cwd.
	pub sync_root: Option<PathBuf>,

	/// Upload/download chunk size in bytes.
	pub chunk_size: usize,

	/// Worker pool size for the Execution Scheduler. `0` means "number of
	/// logical CPUs", resolved at scheduler construction time.
	pub worker_count: usize,

	/// Remote Pager throttle, requests per second.
	pub requests_per_second: u32,

	/// Bound on retry attempts for remote-mutating operations.
	pub retry_limit: u32,

	/// Whether the Crypto Pipeline is active for this invocation.
	pub crypto_enabled: bool,

	/// Crypto password, handed in by the caller. Never logged or serialized.
	#[serde(skip)]
	pub crypto_password: Option<String>,

	pub clash_fix_mode: ClashFixMode,

	/// Allow execution despite real conflicts (overwrites the losing side).
	pub ignore_conflict: bool,

	/// Export extensions requested for export-only remote files (e.g. "pdf").
	pub export_extensions: Vec<String>,

	/// Resolver recursion depth bound; `None` means unlimited.
	pub recursion_depth: Option<u32>,

	/// Fixed-size chunk for partitioning merged children before recursing
	/// in parallel (Change Resolver step 12).
	pub child_chunk_size: usize,

	/// Size threshold above which local checksum computation must warn
	/// before blocking on hashing.
	pub large_file_warn_threshold: u64,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			sync_root: None,
			chunk_size: 4 * 1024 * 1024,
			worker_count: 0,
			requests_per_second: 10,
			retry_limit: 20,
			crypto_enabled: false,
			crypto_password: None,
			clash_fix_mode: ClashFixMode::Off,
			ignore_conflict: false,
			export_extensions: Vec::new(),
			recursion_depth: None,
			child_chunk_size: 100,
			large_file_warn_threshold: 400 * 1024 * 1024,
		}
	}
}

/// Resolved worker count: `worker_count` if set, otherwise the number of
/// logical CPUs (minimum 1).
pub fn resolved_worker_count(cfg: &Config) -> usize {
	if cfg.worker_count > 0 {
		cfg.worker_count
	} else {
		std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	InvalidChunkSize,
	InvalidRetryLimit,
	InvalidThrottle,
	CryptoPasswordMissing,
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::InvalidChunkSize => write!(f, "chunk_size must be greater than zero"),
			ConfigError::InvalidRetryLimit => write!(f, "retry_limit must be greater than zero"),
			ConfigError::InvalidThrottle => {
				write!(f, "requests_per_second must be greater than zero")
			}
			ConfigError::CryptoPasswordMissing => {
				write!(f, "crypto_enabled is set but no password was provided")
			}
		}
	}
}

impl Error for ConfigError {}

/// Common trait for validatable configuration types.
pub trait Validator {
	fn validate(&self) -> Result<(), ConfigError>;
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.chunk_size == 0 {
			return Err(ConfigError::InvalidChunkSize);
		}
		if self.retry_limit == 0 {
			return Err(ConfigError::InvalidRetryLimit);
		}
		if self.requests_per_second == 0 {
			return Err(ConfigError::InvalidThrottle);
		}
		if self.crypto_enabled && self.crypto_password.is_none() {
			return Err(ConfigError::CryptoPasswordMissing);
		}
		Ok(())
	}
}


// vim: ts=4
