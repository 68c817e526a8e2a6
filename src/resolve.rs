//! Change Resolver (C6) — the heart of the engine.
//!
//! Walks a local/remote directory pair node by node, producing a typed
//! operation plan plus any clashes discovered along the way. Recursion is
//! structured fork-join: each call returns its own `(plan, clashes)` and
//! the parent folds children on join, rather than sharing a mutex across
//! workers.

use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diff;
use crate::error::{RemoteErrorKind, SyncError};
use crate::ignore::IgnoreMatcher;
use crate::pager::{self, PageFetcher, PagerOptions};
use crate::types::{Change, ChangeFlags, DiffMask, DirList, File};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Push,
	Pull,
}

/// Which operation kinds a caller permits in the resulting plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationMask(u8);

impl OperationMask {
	pub const ADD: OperationMask = OperationMask(1 << 0);
	pub const MOD: OperationMask = OperationMask(1 << 1);
	pub const DELETE: OperationMask = OperationMask(1 << 2);
	pub const MOD_CONFLICT: OperationMask = OperationMask(1 << 3);
	pub const INDEX_ADDITION: OperationMask = OperationMask(1 << 4);
	pub const ALL: OperationMask =
		OperationMask(Self::ADD.0 | Self::MOD.0 | Self::DELETE.0 | Self::MOD_CONFLICT.0 | Self::INDEX_ADDITION.0);

	pub fn allows(self, op: crate::types::Operation) -> bool {
		use crate::types::Operation::*;
		match op {
			None => true,
			Add => self.0 & Self::ADD.0 != 0,
			Mod => self.0 & Self::MOD.0 != 0,
			Delete => self.0 & Self::DELETE.0 != 0,
			ModConflict => self.0 & Self::MOD_CONFLICT.0 != 0,
			IndexAddition => self.0 & Self::INDEX_ADDITION.0 != 0,
		}
	}
}

impl Default for OperationMask {
	fn default() -> Self {
		OperationMask::ALL
	}
}

/// A clash record: one of two or more remote entries sharing a name under
/// the same parent.
#[derive(Debug, Clone)]
pub struct ClashRecord {
	pub path: String,
	pub file: File,
}

/// A single stack frame of the recursive resolver.
pub struct ChangeListResolve {
	/// Local-side children path, OS separator convention.
	pub local_path: PathBuf,
	/// Remote-side children path, always `/`-separated.
	pub remote_path: String,
	pub depth_remaining: Option<u32>,
	pub direction: Direction,
	pub local_file: Option<File>,
	pub remote_file: Option<File>,
	pub mask: OperationMask,
	pub flags: ChangeFlags,
	pub ignore_conflict: bool,
	pub want_exports: bool,
	pub child_chunk_size: usize,
}

pub struct ResolveOutcome {
	pub plan: Vec<Change>,
	pub clashes: Vec<ClashRecord>,
	pub per_file_errors: Vec<SyncError>,
	pub error: Option<SyncError>,
}

impl ResolveOutcome {
	fn empty() -> Self {
		ResolveOutcome { plan: Vec::new(), clashes: Vec::new(), per_file_errors: Vec::new(), error: None }
	}
}

fn clash_key(f: &File) -> String {
	if f.id.is_empty() {
		format!("name:{}", f.name)
	} else {
		format!("id:{}", f.id)
	}
}

pub struct MergeOutcome {
	pub entries: Vec<DirList>,
	pub clashes: Vec<ClashRecord>,
}

/// Merge local and remote children of one directory by name.
///
/// Drains `locals` into a name map, then drains the remote pagination
/// pair: duplicate remote names become clash records (unless
/// `ignore_clashes`); matching locals (same name, same is-dir) attach and
/// are removed from the map; leftovers become local-only entries.
pub async fn merge(
	mut locals: HashMap<String, File>,
	mut pair: pager::PaginationPair,
	ignore_clashes: bool,
) -> Result<MergeOutcome, RemoteErrorKind> {
	let mut entries = Vec::new();
	let mut clashes = Vec::new();
	let mut clash_keys: HashSet<String> = HashSet::new();
	let mut seen_remote: HashMap<String, File> = HashMap::new();

	loop {
		tokio::select! {
			biased;
			err = pair.errors.recv() => {
				if let Some(kind) = err {
					return Err(kind);
				}
			}
			event = pair.files.recv() => {
				match event {
					Some(pager::FileEvent::Entry(remote_file)) => {
						if let Some(prev) = seen_remote.get(&remote_file.name).cloned() {
							if !ignore_clashes {
								if clash_keys.insert(clash_key(&prev)) {
									clashes.push(ClashRecord { path: prev.name.clone(), file: prev });
								}
								if clash_keys.insert(clash_key(&remote_file)) {
									clashes.push(ClashRecord { path: remote_file.name.clone(), file: remote_file });
								}
							}
							continue;
						}
						seen_remote.insert(remote_file.name.clone(), remote_file.clone());
						let local = locals
							.get(&remote_file.name)
							.filter(|l| l.is_dir == remote_file.is_dir)
							.cloned();
						if local.is_some() {
							locals.remove(&remote_file.name);
						}
						entries.push(DirList { name: remote_file.name.clone(), remote: Some(remote_file), local });
					}
					Some(pager::FileEvent::NotFound) | None => break,
				}
			}
		}
	}

	for (_, local) in locals {
		entries.push(DirList { name: local.name.clone(), remote: None, local: Some(local) });
	}

	Ok(MergeOutcome { entries, clashes })
}

/// Read one directory level of local children into a name map. A file
/// that does not exist (race with a concurrent delete) is silently
/// skipped rather than treated as an error.
pub fn list_local_children(dir: &Path) -> std::io::Result<HashMap<String, File>> {
	let mut out = HashMap::new();
	let read_dir = match std::fs::read_dir(dir) {
		Ok(rd) => rd,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
		Err(e) => return Err(e),
	};

	for entry in read_dir {
		let entry = entry?;
		let metadata = match entry.metadata() {
			Ok(m) => m,
			Err(_) => continue,
		};
		let name = entry.file_name().to_string_lossy().into_owned();
		let mtime = metadata
			.modified()
			.ok()
			.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
			.map(|d| d.as_secs() as i64)
			.unwrap_or(0);

		out.insert(
			name.clone(),
			File {
				id: String::new(),
				name,
				is_dir: metadata.is_dir(),
				size: metadata.len(),
				mtime,
				content_hash: None,
				mime_type: None,
				version: 0,
				export_formats: Default::default(),
				blob_location: crate::types::BlobLocation::Local(entry.path()),
				owner: None,
				labels: Default::default(),
			},
		);
	}
	Ok(out)
}

/// Resolve one node of the local/remote tree, recursing into children.
pub fn resolve_node<'a>(
	frame: ChangeListResolve,
	ignore: &'a IgnoreMatcher,
	fetcher: Arc<dyn PageFetcher>,
	requests_per_second: u32,
) -> BoxFuture<'a, ResolveOutcome> {
	Box::pin(async move {
		// Step 1: ignore matching over the current path and both side names.
		let mut match_checks = vec![frame.remote_path.clone()];
		if let Some(f) = &frame.local_file {
			match_checks.push(f.name.clone());
		}
		if let Some(f) = &frame.remote_file {
			match_checks.push(f.name.clone());
		}
		if match_checks.iter().any(|c| ignore.matches_ignore(c)) {
			return ResolveOutcome::empty();
		}

		// Steps 2-3: direction-specific src/dest assignment with export-link handling.
		let (src, dest) = match frame.direction {
			Direction::Pull => (frame.remote_file.clone(), frame.local_file.clone()),
			Direction::Push => (frame.local_file.clone(), frame.remote_file.clone()),
		};

		let mut suppress_body_bits = false;
		let mut forbid_push_overwrite = false;
		if frame.direction == Direction::Pull {
			if let Some(remote) = &frame.remote_file {
				if remote.is_export_only() && !frame.want_exports {
					suppress_body_bits = true;
				}
			}
		}
		if frame.direction == Direction::Push {
			if let Some(remote_dest) = &frame.remote_file {
				// Never overwrite an export-only remote entry.
				if remote_dest.is_export_only() {
					forbid_push_overwrite = true;
				}
			}
		}

		// Step 4: provisional Change + diff mask.
		let mut mask = match (&src, &dest) {
			(Some(s), Some(d)) => diff::file_differences(s, d, frame.flags.ignore_checksum),
			_ => DiffMask::NONE,
		};
		if suppress_body_bits {
			mask = mask.remove(DiffMask::SIZE).remove(DiffMask::CHECKSUM);
		}

		let operation = if forbid_push_overwrite {
			crate::types::Operation::None
		} else {
			diff::op(src.as_ref(), dest.as_ref(), mask, frame.flags, frame.ignore_conflict, false, false)
		};

		// Step 5: excluded-CRUD mask.
		if !frame.mask.allows(operation) {
			return ResolveOutcome::empty();
		}

		let mut outcome = ResolveOutcome::empty();

		// Step 6: emit the change if non-trivial.
		if operation != crate::types::Operation::None {
			let mut change = Change::new(frame.remote_path.clone(), parent_of(&frame.remote_path));
			change.src = src.clone();
			change.dest = dest.clone();
			change.flags = frame.flags;
			change.operation = operation;
			outcome.plan.push(change);
		}

		// Step 7: dir-type agreement.
		if let (Some(s), Some(d)) = (&src, &dest) {
			if s.is_dir != d.is_dir {
				outcome.per_file_errors.push(SyncError::IllogicalState {
					path: frame.remote_path.clone(),
					message: "local and remote disagree on directory type".into(),
				});
			}
		}

		// Steps 8-9: recursion gate.
		let traversal_root_is_dir = match frame.direction {
			Direction::Pull => frame.remote_file.as_ref().map(|f| f.is_dir).unwrap_or(false),
			Direction::Push => frame.local_file.as_ref().map(|f| f.is_dir).unwrap_or(false),
		};
		if frame.depth_remaining == Some(0) || !traversal_root_is_dir {
			return outcome;
		}
		let next_depth = frame.depth_remaining.map(|d| d - 1);

		// Step 10: fetch children.
		let locals = match list_local_children(&frame.local_path) {
			Ok(l) => l,
			Err(e) => {
				outcome.error = Some(SyncError::Io(e));
				return outcome;
			}
		};

		let remote_parent_id = frame.remote_file.as_ref().map(|f| f.id.clone()).unwrap_or_default();
		let pair = pager::spawn_listing(
			fetcher.clone(),
			remote_parent_id,
			PagerOptions { requests_per_second, ..PagerOptions::default() },
		);

		// Step 11: merge.
		let merged = match merge(locals, pair, false).await {
			Ok(m) => m,
			Err(kind) => {
				outcome.error = Some(SyncError::RemoteLookupFailed {
					path: frame.remote_path.clone(),
					message: kind.message().to_string(),
				});
				return outcome;
			}
		};
		outcome.clashes.extend(merged.clashes);

		// Step 12: chunked fork-join recursion.
		let chunk_size = frame.child_chunk_size.max(1);
		for chunk in merged.entries.chunks(chunk_size) {
			let futures_in_chunk: Vec<_> = chunk
				.iter()
				.map(|entry| {
					let child_local_path = frame.local_path.join(&entry.name);
					let child_remote_path = join_remote(&frame.remote_path, &entry.name);
					let child_frame = ChangeListResolve {
						local_path: child_local_path,
						remote_path: child_remote_path,
						depth_remaining: next_depth,
						direction: frame.direction,
						local_file: entry.local.clone(),
						remote_file: entry.remote.clone(),
						mask: frame.mask,
						flags: frame.flags,
						ignore_conflict: frame.ignore_conflict,
						want_exports: frame.want_exports,
						child_chunk_size: frame.child_chunk_size,
					};
					resolve_node(child_frame, ignore, fetcher.clone(), requests_per_second)
				})
				.collect();

			for child_outcome in join_all(futures_in_chunk).await {
				outcome.plan.extend(child_outcome.plan);
				outcome.clashes.extend(child_outcome.clashes);
				outcome.per_file_errors.extend(child_outcome.per_file_errors);
				if outcome.error.is_none() {
					outcome.error = child_outcome.error;
				}
			}
		}

		// Step 13: fold clashes into the top-level error.
		if !outcome.clashes.is_empty() && outcome.error.is_none() {
			outcome.error = Some(SyncError::ClashesDetected { count: outcome.clashes.len() });
		}

		outcome
	})
}

fn parent_of(remote_path: &str) -> String {
	crate::path::split_parent_base(remote_path).0
}

fn join_remote(base: &str, name: &str) -> String {
	if base.is_empty() {
		name.to_string()
	} else {
		format!("{}/{}", base, name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::BlobLocation;
	use async_trait::async_trait;
	use std::collections::BTreeMap;
	use tempfile::TempDir;

	fn sample_file(name: &str, is_dir: bool, size: u64, mtime: i64) -> File {
		File {
			id: format!("id-{}", name),
			name: name.to_string(),
			is_dir,
			size,
			mtime,
			content_hash: None,
			mime_type: None,
			version: 1,
			export_formats: BTreeMap::new(),
			blob_location: BlobLocation::None,
			owner: None,
			labels: Default::default(),
		}
	}

	struct EmptyFetcher;

	#[async_trait]
	impl PageFetcher for EmptyFetcher {
		async fn fetch_page(
			&self,
			_parent_id: &str,
			_page_token: Option<String>,
		) -> Result<pager::RemotePage, RemoteErrorKind> {
			Ok(pager::RemotePage { files: vec![], next_page_token: None })
		}
	}

	struct ClashingFetcher;

	#[async_trait]
	impl PageFetcher for ClashingFetcher {
		async fn fetch_page(
			&self,
			_parent_id: &str,
			_page_token: Option<String>,
		) -> Result<pager::RemotePage, RemoteErrorKind> {
			let mut a = sample_file("report.pdf", false, 10, 1);
			a.id = "X".into();
			let mut b = sample_file("report.pdf", false, 20, 2);
			b.id = "Y".into();
			Ok(pager::RemotePage { files: vec![a, b], next_page_token: None })
		}
	}

	#[tokio::test]
	async fn test_merge_duplicate_remote_names_produce_one_clash_pair() {
		let pair = pager::spawn_listing(Arc::new(ClashingFetcher), "root".into(), PagerOptions::default());
		let outcome = merge(HashMap::new(), pair, false).await.unwrap();
		assert_eq!(outcome.clashes.len(), 2);
	}

	#[tokio::test]
	async fn test_merge_leftover_locals_become_local_only() {
		let mut locals = HashMap::new();
		locals.insert("only_local.txt".to_string(), sample_file("only_local.txt", false, 1, 1));
		let pair = pager::spawn_listing(Arc::new(EmptyFetcher), "root".into(), PagerOptions::default());
		let outcome = merge(locals, pair, false).await.unwrap();
		assert_eq!(outcome.entries.len(), 1);
		assert!(outcome.entries[0].remote.is_none());
	}

	#[tokio::test]
	async fn test_resolve_node_empty_both_sides_yields_empty_plan() {
		let ignore = IgnoreMatcher::compile(&[]).unwrap();
		let tmp = TempDir::new().unwrap();
		let frame = ChangeListResolve {
			local_path: tmp.path().to_path_buf(),
			remote_path: String::new(),
			depth_remaining: Some(5),
			direction: Direction::Pull,
			local_file: None,
			remote_file: None,
			mask: OperationMask::default(),
			flags: ChangeFlags::default(),
			ignore_conflict: false,
			want_exports: false,
			child_chunk_size: 100,
		};
		let outcome = resolve_node(frame, &ignore, Arc::new(EmptyFetcher), 100).await;
		assert!(outcome.plan.is_empty());
		assert!(outcome.clashes.is_empty());
	}

	#[tokio::test]
	async fn test_resolve_node_add_when_remote_only() {
		let ignore = IgnoreMatcher::compile(&[]).unwrap();
		let tmp = TempDir::new().unwrap();
		let remote = sample_file("notes.txt", false, 100, 10);
		let frame = ChangeListResolve {
			local_path: tmp.path().to_path_buf(),
			remote_path: "notes.txt".to_string(),
			depth_remaining: Some(5),
			direction: Direction::Pull,
			local_file: None,
			remote_file: Some(remote),
			mask: OperationMask::default(),
			flags: ChangeFlags::default(),
			ignore_conflict: false,
			want_exports: false,
			child_chunk_size: 100,
		};
		let outcome = resolve_node(frame, &ignore, Arc::new(EmptyFetcher), 100).await;
		assert_eq!(outcome.plan.len(), 1);
		assert_eq!(outcome.plan[0].src.as_ref().unwrap().name, "notes.txt");
	}

	#[tokio::test]
	async fn test_resolve_node_illogical_state_on_dir_type_mismatch() {
		let ignore = IgnoreMatcher::compile(&[]).unwrap();
		let tmp = TempDir::new().unwrap();
		let local = sample_file("x", true, 0, 1);
		let remote = sample_file("x", false, 5, 1);
		let frame = ChangeListResolve {
			local_path: tmp.path().to_path_buf(),
			remote_path: "x".to_string(),
			depth_remaining: Some(0),
			direction: Direction::Pull,
			local_file: Some(local),
			remote_file: Some(remote),
			mask: OperationMask::default(),
			flags: ChangeFlags::default(),
			ignore_conflict: false,
			want_exports: false,
			child_chunk_size: 100,
		};
		let outcome = resolve_node(frame, &ignore, Arc::new(EmptyFetcher), 100).await;
		assert_eq!(outcome.per_file_errors.len(), 1);
		assert!(matches!(outcome.per_file_errors[0], SyncError::IllogicalState { .. }));
	}

	#[test]
	fn test_join_remote_path() {
		assert_eq!(join_remote("", "a"), "a");
		assert_eq!(join_remote("docs", "a.txt"), "docs/a.txt");
	}
}

// vim: ts=4
