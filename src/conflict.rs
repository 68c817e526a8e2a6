//! Conflict Engine (C7): three-way reconciliation against the Index Store.
//!
//! A `ModConflict` tagged by the Change Resolver is only a *candidate*
//! conflict — it means src and dest disagree on size or checksum. Whether
//! it is real depends on what was last synced: no baseline means no
//! conflict (first sync always wins), and a remote that hasn't moved
//! since the last sync means the push is safe.

use crate::index::IndexStore;
use crate::resolve::Direction;
use crate::types::{Change, Operation};

pub struct ConflictOutcome {
	/// Non-conflicting changes, plus conflicts found spurious (re-tagged
	/// with `ignore_conflict = true`).
	pub resolved: Vec<Change>,
	/// Conflicts that remain real after consulting the Index Store.
	pub real_conflicts: Vec<Change>,
}

/// Partition `changes` into resolved and real-conflicting, consulting
/// `index` for each `ModConflict` candidate.
///
/// The candidate is real iff an index record exists for the remote
/// identifier, the remote mod-time has moved since that record, and the
/// local side's mod-time and checksum both disagree with the record.
///
/// `direction` says which side of the `Change` carries the remote file:
/// `Push` puts it in `dest`, `Pull` puts it in `src` (the local side never
/// carries a remote id, so picking the wrong side always misses the index
/// lookup).
pub fn classify(changes: Vec<Change>, index: &IndexStore, direction: Direction) -> ConflictOutcome {
	let mut resolved = Vec::new();
	let mut real_conflicts = Vec::new();

	for mut change in changes {
		if change.operation != Operation::ModConflict {
			resolved.push(change);
			continue;
		}

		let remote_side = match direction {
			Direction::Push => change.dest.as_ref(),
			Direction::Pull => change.src.as_ref(),
		};
		let remote_id = remote_side.map(|f| f.id.as_str()).unwrap_or("");
		let baseline = index.get_opt(remote_id).ok().flatten();

		let is_real = match (&baseline, &change.src, &change.dest) {
			(Some(record), Some(src), Some(dest)) => {
				dest.mtime != record.mtime
					&& src.mtime != record.mtime
					&& src.content_hash.as_deref() != Some(record.content_hash.as_str())
			}
			_ => false,
		};

		if is_real {
			real_conflicts.push(change);
		} else {
			change.ignore_conflict = true;
			resolved.push(change);
		}
	}

	ConflictOutcome { resolved, real_conflicts }
}


// vim: ts=4
