//! Top-level orchestrator: wires C1-C11 into one invocation per §2's data
//! flow. Discovers ignores, resolves the tree, fixes clashes, classifies
//! conflicts, dispatches the plan, and folds completed changes back into
//! the Index Store.
//!
//! Everything here is built from the lower-level modules' public API; there
//! is no logic specific to this file beyond sequencing and the
//! `JobRunner` adapter that lets the scheduler dispatch through the
//! Upsert/Download Executors.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clash;
use crate::config::{ClashFixMode, Config, Validator};
use crate::conflict;
use crate::error::{RemoteErrorKind, SyncError};
use crate::executors::{self, DownloadArgs, UpsertArgs};
use crate::ignore::IgnoreMatcher;
use crate::index::{self, IndexStore};
use crate::logging::*;
use crate::mkdir_cache::MkdirCache;
use crate::pager::PageFetcher;
use crate::path::HIDDEN_DIR_NAME;
use crate::remote::RemoteClient;
use crate::resolve::{self, ChangeListResolve, Direction, OperationMask};
use crate::schedule::{self, CancelToken, JobRunner, ProgressSender, ScheduleOutcome};
use crate::types::{BlobLocation, Change, ChangeFlags, File, Index, Operation};
use crate::utils;

/// Result of one full sync invocation.
pub struct EngineOutcome {
	pub schedule: ScheduleOutcome,
	/// Clashes renamed or coerced to trash before dispatch.
	pub clashes_fixed: usize,
}

fn to_remote_error_kind(e: SyncError) -> RemoteErrorKind {
	RemoteErrorKind::Unknown { message: e.to_string() }
}

fn local_path_for(root: &Path, change_path: &str) -> PathBuf {
	let mut p = root.to_path_buf();
	for component in change_path.split('/').filter(|c| !c.is_empty()) {
		p.push(component);
	}
	p
}

fn ancestor_components(parent_path: &str) -> Vec<String> {
	parent_path.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect()
}

fn now_epoch_seconds() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Builds the `Index` record a completed non-delete `Change` implies.
/// `None` when the change never learned a remote identifier (a fresh
/// Add whose created-file response this engine does not thread back in).
fn index_record_for(change: &Change, direction: Direction) -> Option<Index> {
	let remote_side = match direction {
		Direction::Push => change.dest.as_ref(),
		Direction::Pull => change.src.as_ref(),
	};
	let remote_side = remote_side.filter(|f| !f.id.is_empty())?;
	let content_side = change.src.as_ref().or(change.dest.as_ref())?;
	Some(Index {
		id: remote_side.id.clone(),
		etag: content_side.content_hash.clone().unwrap_or_default(),
		content_hash: content_side.content_hash.clone().unwrap_or_default(),
		mime_type: content_side.mime_type.clone().unwrap_or_default(),
		mtime: content_side.mtime,
		version: remote_side.version,
		index_time: now_epoch_seconds(),
	})
}

/// The side of a `Change` a `Delete` should actually remove: whichever
/// side still holds an entry (`dest`, `src` is always `None` for deletes).
fn delete_target(change: &Change) -> Option<&File> {
	change.dest.as_ref()
}

/// Dispatches one resolved `Change` to the appropriate executor: local
/// filesystem removal or remote trash for a `Delete`, upload or download
/// for everything else, keyed off which side's `BlobLocation` is local.
struct EngineRunner {
	root: PathBuf,
	remote_root: File,
	client: Arc<dyn RemoteClient>,
	mkdir: MkdirCache,
	cfg: Config,
}

impl EngineRunner {
	async fn do_upload(&self, change: &Change) -> Result<u64, RemoteErrorKind> {
		let src = change.src.as_ref().expect("Add/Mod/ModConflict always carries src");
		let mask = match (&change.src, &change.dest) {
			(Some(s), Some(d)) => crate::diff::file_differences(s, d, change.flags.ignore_checksum),
			_ => crate::types::DiffMask::NONE,
		};
		let scratch_dir = self.root.join(HIDDEN_DIR_NAME);
		let components = ancestor_components(&change.parent_path);
		let args = UpsertArgs {
			change,
			root: &self.remote_root,
			ancestor_components: &components,
			mask,
			mime_override: None,
			bandwidth_limit_kib_s: None,
			crypto_password: self.cfg.crypto_password.as_deref(),
			scratch_dir: &scratch_dir,
		};
		let file = executors::upsert_by_comparison(args, self.client.as_ref(), &self.mkdir).await.map_err(to_remote_error_kind)?;
		Ok(src.size.max(file.size))
	}

	async fn do_download(&self, change: &Change) -> Result<u64, RemoteErrorKind> {
		let src = change.src.as_ref().expect("Add/Mod/ModConflict always carries src");
		let local_path = local_path_for(&self.root, &change.path);

		if src.is_dir {
			tokio::fs::create_dir_all(&local_path).await.map_err(|e| RemoteErrorKind::Unknown { message: e.to_string() })?;
			return Ok(0);
		}

		let scratch_dir = self.root.join(HIDDEN_DIR_NAME);
		let exports_dir = scratch_dir.join("exports");
		let args = DownloadArgs {
			change,
			local_path: &local_path,
			exports_dir: &exports_dir,
			requested_export_extensions: &self.cfg.export_extensions,
			crypto_password: self.cfg.crypto_password.as_deref(),
			scratch_dir: &scratch_dir,
		};
		executors::download(args, self.client.as_ref()).await.map_err(to_remote_error_kind)
	}

	async fn do_delete(&self, change: &Change) -> Result<u64, RemoteErrorKind> {
		let target = delete_target(change).ok_or(RemoteErrorKind::Unknown { message: "delete with no dest".into() })?;
		match &target.blob_location {
			BlobLocation::Local(path) => {
				let result = if target.is_dir { tokio::fs::remove_dir_all(path).await } else { tokio::fs::remove_file(path).await };
				result.map(|_| 0u64).map_err(|e| RemoteErrorKind::Unknown { message: e.to_string() })
			}
			_ => self.client.trash(&target.id, change.permanent).await.map(|_| 0u64),
		}
	}
}

impl JobRunner for EngineRunner {
	fn run<'a>(&'a self, change: &'a Change) -> Pin<Box<dyn Future<Output = Result<u64, RemoteErrorKind>> + Send + 'a>> {
		Box::pin(async move {
			match change.operation {
				Operation::None | Operation::IndexAddition => Ok(0),
				Operation::Delete => self.do_delete(change).await,
				Operation::Add | Operation::Mod | Operation::ModConflict => {
					let src = change.src.as_ref().ok_or(RemoteErrorKind::Unknown { message: "change has no src".into() })?;
					match &src.blob_location {
						BlobLocation::Local(_) => self.do_upload(change).await,
						_ => self.do_download(change).await,
					}
				}
			}
		})
	}
}

/// Build the local-side root `File` entry resolve_node's top frame needs,
/// by stat-ing `root` itself.
fn local_root_entry(root: &Path) -> std::io::Result<File> {
	let metadata = std::fs::metadata(root)?;
	let mtime = metadata.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
	Ok(File {
		id: String::new(),
		name: String::new(),
		is_dir: true,
		size: 0,
		mtime,
		content_hash: None,
		mime_type: None,
		version: 0,
		export_formats: Default::default(),
		blob_location: BlobLocation::Local(root.to_path_buf()),
		owner: None,
		labels: Default::default(),
	})
}

/// Apply clashes per `cfg.clash_fix_mode` before the plan is dispatched.
/// `Off` surfaces `ClashesDetected` to the caller; `Rename` renames every
/// clashing entry but the first directly through `client`; `Trash`
/// coerces every clash into a non-permanent delete folded into `plan`.
async fn fix_clashes(
	clashes: &[resolve::ClashRecord],
	plan: &mut Vec<Change>,
	cfg: &Config,
	client: &dyn RemoteClient,
) -> Result<usize, SyncError> {
	if clashes.is_empty() {
		return Ok(0);
	}

	match cfg.clash_fix_mode {
		ClashFixMode::Off => Err(SyncError::ClashesDetected { count: clashes.len() }),
		ClashFixMode::Rename => {
			let renames = clash::plan_renames(clashes, &HashSet::new());
			for rename in &renames {
				client
					.rename(&rename.file.id, &rename.new_name)
					.await
					.map_err(|e| SyncError::RemoteLookupFailed { path: rename.file.name.clone(), message: e.message().to_string() })?;
			}
			Ok(renames.len())
		}
		ClashFixMode::Trash => {
			let trashed = clash::plan_trash(clashes);
			let count = trashed.len();
			plan.extend(trashed);
			Ok(count)
		}
	}
}

/// Run one full sync invocation: resolve `root` against `remote_root`,
/// fix clashes, classify conflicts against the Index Store, and dispatch
/// the resulting plan. Installs a signal handler that flips a fresh
/// `CancelToken` shared with the scheduler, and holds a `FileLock` on the
/// sync-state directory for the duration of the call.
pub async fn sync(
	root: &Path,
	remote_root: File,
	direction: Direction,
	client: Arc<dyn RemoteClient>,
	fetcher: Arc<dyn PageFetcher>,
	cfg: &Config,
	progress: Option<ProgressSender>,
) -> Result<EngineOutcome, SyncError> {
	cfg.validate().map_err(|e| SyncError::InvalidArguments { message: e.to_string() })?;

	let state_dir = root.join(HIDDEN_DIR_NAME);
	tokio::fs::create_dir_all(&state_dir).await?;

	let _lock = utils::FileLock::acquire(&state_dir).map_err(|e| SyncError::Other { message: e.to_string() })?;

	let cancel: CancelToken = schedule::new_cancel_token();
	utils::setup_signal_handlers(cancel.clone());

	let ignore = IgnoreMatcher::load(root)?;
	let index = IndexStore::open(&state_dir.join(index::INDEX_DB_NAME))?;

	let local_root = local_root_entry(root)?;
	let frame = ChangeListResolve {
		local_path: root.to_path_buf(),
		remote_path: String::new(),
		depth_remaining: cfg.recursion_depth,
		direction,
		local_file: Some(local_root),
		remote_file: Some(remote_root.clone()),
		mask: OperationMask::default(),
		flags: ChangeFlags { force: false, no_clobber: false, ignore_checksum: false },
		ignore_conflict: cfg.ignore_conflict,
		want_exports: !cfg.export_extensions.is_empty(),
		child_chunk_size: cfg.child_chunk_size,
	};

	let resolved = resolve::resolve_node(frame, &ignore, fetcher, cfg.requests_per_second).await;
	for err in &resolved.per_file_errors {
		warn!(error = %err, "per-file error during resolution");
	}
	// `resolved.error` also carries `ClashesDetected` (step 13 of the Change
	// Resolver) when nothing deeper failed; that case is handled below via
	// `resolved.clashes` instead, through `cfg.clash_fix_mode`.
	if let Some(err) = resolved.error {
		if !matches!(err, SyncError::ClashesDetected { .. }) {
			return Err(err);
		}
	}

	let mut plan = resolved.plan;
	let clashes_fixed = fix_clashes(&resolved.clashes, &mut plan, cfg, client.as_ref()).await?;

	let conflict_outcome = conflict::classify(plan, &index, direction);
	let mut exec_plan = conflict_outcome.resolved;
	if !conflict_outcome.real_conflicts.is_empty() {
		if cfg.ignore_conflict {
			exec_plan.extend(conflict_outcome.real_conflicts);
		} else {
			return Err(SyncError::UnresolvedConflicts { count: conflict_outcome.real_conflicts.len() });
		}
	}

	let runner = Arc::new(EngineRunner { root: root.to_path_buf(), remote_root, client, mkdir: MkdirCache::new(), cfg: cfg.clone() });

	let outcome = schedule::execute(exec_plan, runner, cfg, progress, &cancel).await;

	for change in &outcome.completed {
		match change.operation {
			Operation::Delete => {
				let remote_side = match direction {
					Direction::Push => change.dest.as_ref(),
					Direction::Pull => change.src.as_ref(),
				};
				if let Some(f) = remote_side.filter(|f| !f.id.is_empty()) {
					if let Err(e) = index.delete(&f.id) {
						warn!(error = %e, id = %f.id, "failed to remove completed delete from index");
					}
				}
			}
			_ => {
				if let Some(record) = index_record_for(change, direction) {
					if let Err(e) = index.put(&record) {
						warn!(error = %e, id = %record.id, "failed to persist index record for completed change");
					}
				}
			}
		}
	}

	Ok(EngineOutcome { schedule: outcome, clashes_fixed })
}

// vim: ts=4
