//! Clash Handler (C8): resolve duplicate remote names under one parent.
//!
//! Two strategies selected by `ClashFixMode`: keep-first-rename-rest, or
//! coerce every clashing entry to a trashed delete.

use std::collections::{HashMap, HashSet};

use crate::resolve::ClashRecord;
use crate::types::{Change, File, Operation};

/// One planned rename: `file` should be renamed to `new_name` at its
/// current parent.
#[derive(Debug, Clone)]
pub struct RenamePlan {
	pub file: File,
	pub new_name: String,
}

fn split_ext(name: &str) -> (&str, &str) {
	match name.rfind('.') {
		Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
		_ => (name, ""),
	}
}

fn candidate_name(stem: &str, ext: &str, k: u64) -> String {
	if ext.is_empty() {
		format!("{}_{}", stem, k)
	} else {
		format!("{}_{}.{}", stem, k, ext)
	}
}

/// Group clash records by path; within each group keep the first record
/// and rename the rest, searching for the smallest non-negative `k` such
/// that `<name>_<k><ext>` is not already taken (by `existing_names` or by
/// an earlier rename in this same batch).
pub fn plan_renames(clashes: &[ClashRecord], existing_names: &HashSet<String>) -> Vec<RenamePlan> {
	let mut by_path: HashMap<&str, Vec<&ClashRecord>> = HashMap::new();
	for record in clashes {
		by_path.entry(record.path.as_str()).or_default().push(record);
	}

	let mut out = Vec::new();
	for (_, group) in by_path {
		let mut occupied = existing_names.clone();
		for (i, record) in group.iter().enumerate() {
			if i == 0 {
				occupied.insert(record.file.name.clone());
				continue;
			}
			let (stem, ext) = split_ext(&record.file.name);
			let mut k: u64 = 0;
			loop {
				let candidate = candidate_name(stem, ext, k);
				if !occupied.contains(&candidate) {
					occupied.insert(candidate.clone());
					out.push(RenamePlan { file: record.file.clone(), new_name: candidate });
					break;
				}
				k += 1;
			}
		}
	}
	out
}

/// Coerce every clash into a non-permanent `Delete` (`dest = src, src =
/// None`), to run through the normal trash execution path.
pub fn plan_trash(clashes: &[ClashRecord]) -> Vec<Change> {
	clashes
		.iter()
		.map(|record| {
			let parent = crate::path::split_parent_base(&record.path).0;
			let mut change = Change::new(record.path.clone(), parent);
			change.src = None;
			change.dest = Some(record.file.clone());
			change.operation = Operation::Delete;
			change.permanent = false;
			change
		})
		.collect()
}


// vim: ts=4
