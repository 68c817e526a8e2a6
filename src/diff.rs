//! File Entity & Diff (C5): attribute comparison and operation derivation.
//!
//! Grounded on the `metadata_differs` boolean comparator, generalized from
//! a single yes/no verdict into a bitmask naming which attribute differs,
//! plus the resolver's `op()` precedence table built on top of it.

use std::fs;
use std::io;
use std::path::Path;

use crate::types::{ChangeFlags, DiffMask, File, Operation};

/// Compare two file entities, producing a bit-union over the attributes
/// that differ. `ignore_checksum` suppresses the hash comparison (but not
/// the size comparison, which always contributes to the checksum bit).
pub fn file_differences(a: &File, b: &File, ignore_checksum: bool) -> DiffMask {
	let mut mask = DiffMask::NONE;

	if a.is_dir != b.is_dir {
		mask |= DiffMask::DIR_TYPE;
	}
	if a.mtime != b.mtime {
		mask |= DiffMask::MOD_TIME;
	}
	if a.size != b.size {
		mask |= DiffMask::SIZE;
	}
	if a.size != b.size || (!ignore_checksum && a.content_hash != b.content_hash) {
		mask |= DiffMask::CHECKSUM;
	}

	mask
}

/// Derive the `Operation` for a proposed `(src, dest)` pair.
///
/// `ignore_conflict` is the global override (`Config::ignore_conflict`),
/// not the per-change spurious-conflict flag the Conflict Engine sets
/// after the fact. `indexing_only` + `index_already_exists` select
/// `IndexAddition` over `Add` when no upload is needed, only a fresh
/// Index Store record.
pub fn op(
	src: Option<&File>,
	dest: Option<&File>,
	mask: DiffMask,
	flags: ChangeFlags,
	ignore_conflict: bool,
	indexing_only: bool,
	index_already_exists: bool,
) -> Operation {
	let base = match (src, dest) {
		(None, None) => Operation::None,
		(Some(_), None) => {
			if indexing_only && index_already_exists {
				Operation::IndexAddition
			} else {
				Operation::Add
			}
		}
		(None, Some(_)) => Operation::Delete,
		(Some(s), Some(d)) => {
			if mask.contains(DiffMask::DIR_TYPE) {
				Operation::Mod
			} else if s.is_dir && d.is_dir {
				Operation::None
			} else if mask.contains(DiffMask::SIZE) || mask.contains(DiffMask::CHECKSUM) {
				if ignore_conflict {
					Operation::Mod
				} else {
					Operation::ModConflict
				}
			} else if mask.contains(DiffMask::MOD_TIME) {
				Operation::Mod
			} else {
				Operation::None
			}
		}
	};

	let forced = if flags.force {
		match base {
			Operation::None => Operation::Add,
			Operation::ModConflict => Operation::Mod,
			other => other,
		}
	} else {
		base
	};

	if flags.no_clobber && forced != Operation::Add {
		Operation::None
	} else {
		forced
	}
}

/// Compute a local file's content hash, warning first if its size exceeds
/// `warn_threshold` — hashing a multi-hundred-MiB file blocks the caller
/// for a noticeable span.
pub fn content_hash(path: &Path, size: u64, warn_threshold: u64) -> io::Result<String> {
	if size > warn_threshold {
		tracing::warn!(
			path = %path.display(),
			size,
			threshold = warn_threshold,
			"hashing a large file; this will block for a while"
		);
	}

	let mut hasher = blake3::Hasher::new();
	let mut file = fs::File::open(path)?;
	io::copy(&mut file, &mut hasher)?;
	Ok(hasher.finalize().to_hex().to_string())
}


// vim: ts=4
