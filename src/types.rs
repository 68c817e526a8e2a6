//! Core data types shared by every component of the sync engine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A canonical file entity, local or remote.
///
/// `id` is empty for a local-only file that has never been uploaded.
/// A file with a non-empty `export_formats` map has no raw byte stream
/// and must never be uploaded as bytes — it is a Drive-style "export-only"
/// document (spreadsheet, doc, etc).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
	pub id: String,
	pub name: String,
	pub is_dir: bool,
	pub size: u64,
	/// Second-granularity, UTC-normalized modification time (epoch seconds).
	pub mtime: i64,
	/// Hex content hash. Lazily computed for local files; see `diff::content_hash`.
	pub content_hash: Option<String>,
	pub mime_type: Option<String>,
	/// Monotonically increasing server version.
	pub version: u64,
	/// mime-type -> export URL. Non-empty means export-only.
	pub export_formats: BTreeMap<String, String>,
	pub blob_location: BlobLocation,
	pub owner: Option<String>,
	pub labels: Labels,
}

impl File {
	pub fn is_export_only(&self) -> bool {
		!self.export_formats.is_empty()
	}

	pub fn is_local_only(&self) -> bool {
		self.id.is_empty()
	}
}

/// Where a file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobLocation {
	Local(PathBuf),
	Remote(String),
	/// Export-only entries and not-yet-created directories have neither.
	None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
	pub starred: bool,
	pub trashed: bool,
	pub viewed: bool,
}

/// A bit-union describing which attributes of two files differ.
///
/// See `diff::file_differences`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffMask(u8);

impl DiffMask {
	pub const NONE: DiffMask = DiffMask(0);
	pub const DIR_TYPE: DiffMask = DiffMask(1 << 0);
	pub const MOD_TIME: DiffMask = DiffMask(1 << 1);
	pub const SIZE: DiffMask = DiffMask(1 << 2);
	pub const CHECKSUM: DiffMask = DiffMask(1 << 3);

	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn contains(self, bit: DiffMask) -> bool {
		self.0 & bit.0 != 0
	}

	pub fn union(self, other: DiffMask) -> DiffMask {
		DiffMask(self.0 | other.0)
	}

	pub fn remove(self, other: DiffMask) -> DiffMask {
		DiffMask(self.0 & !other.0)
	}
}

impl std::ops::BitOr for DiffMask {
	type Output = DiffMask;
	fn bitor(self, rhs: DiffMask) -> DiffMask {
		self.union(rhs)
	}
}

impl std::ops::BitOrAssign for DiffMask {
	fn bitor_assign(&mut self, rhs: DiffMask) {
		*self = self.union(rhs);
	}
}

/// The derived action for a `Change`.
///
/// Precedence order for execution: `Delete < Mod < ModConflict < Add`.
/// `None` changes are dropped before scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	None,
	Delete,
	Mod,
	ModConflict,
	Add,
	/// Indexing-only mode: src exists but no upload is needed, only a
	/// fresh Index Store record.
	IndexAddition,
}

impl Operation {
	fn precedence_rank(self) -> u8 {
		match self {
			Operation::None => 0,
			Operation::Delete => 1,
			Operation::Mod => 2,
			Operation::ModConflict => 3,
			Operation::Add => 4,
			Operation::IndexAddition => 4,
		}
	}
}

impl PartialOrd for Operation {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Operation {
	fn cmp(&self, other: &Self) -> Ordering {
		self.precedence_rank().cmp(&other.precedence_rank())
	}
}

/// Policy flags attached to a planned `Change`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
	pub force: bool,
	pub no_clobber: bool,
	pub ignore_checksum: bool,
}

/// A single unit of planned work produced by the Change Resolver.
#[derive(Debug, Clone)]
pub struct Change {
	/// Path relative to the sync root, using `/` as separator.
	pub path: String,
	/// Parent path, same convention as `path`.
	pub parent_path: String,
	/// New desired state, or `None` for a deletion.
	pub src: Option<File>,
	/// Current state, or `None` for a creation.
	pub dest: Option<File>,
	pub flags: ChangeFlags,
	/// Set by the Conflict Engine when a `ModConflict` turns out spurious.
	pub ignore_conflict: bool,
	/// The derived action. Stored rather than recomputed so the Conflict
	/// Engine and Execution Scheduler agree on what the Change Resolver saw.
	pub operation: Operation,
	/// For `Delete`: whether this bypasses the remote trash. The Clash
	/// Handler's trash strategy always coerces with `permanent = false`.
	pub permanent: bool,
}

impl Change {
	pub fn new(path: impl Into<String>, parent_path: impl Into<String>) -> Self {
		Change {
			path: path.into(),
			parent_path: parent_path.into(),
			src: None,
			dest: None,
			flags: ChangeFlags::default(),
			ignore_conflict: false,
			operation: Operation::None,
			permanent: false,
		}
	}
}

/// Persisted last-known-synced record, keyed by remote identifier.
///
/// Field tags are stable across implementations (see on-disk layout):
/// `id`, `etag`, `md5`, `mtype`, `mtime`, `version`, `itime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
	pub id: String,
	pub etag: String,
	#[serde(rename = "md5")]
	pub content_hash: String,
	#[serde(rename = "mtype")]
	pub mime_type: String,
	/// Epoch seconds.
	pub mtime: i64,
	pub version: u64,
	/// Epoch seconds, when this record was written.
	#[serde(rename = "itime")]
	pub index_time: i64,
}

/// OAuth credentials or a service-account JWT config for one root.
#[derive(Debug, Clone)]
pub enum Credentials {
	OAuth { client_id: String, client_secret: String, refresh_token: String },
	ServiceAccount { jwt_config: String },
}

/// Per-root configuration, discovered by walking upward from the working
/// directory until the hidden sync-state directory is found.
#[derive(Debug, Clone)]
pub struct Context {
	pub root: PathBuf,
	pub credentials: Credentials,
}

/// A single mount point: an ephemeral symlink from an external path into
/// the sync root.
#[derive(Debug, Clone)]
pub struct MountPoint {
	pub source: PathBuf,
	pub target: PathBuf,
	pub mounted: bool,
}

/// Ephemeral bindings of external local paths into the root, plus cleanup
/// bookkeeping. Cleared on all exit paths (normal return and signal
/// interception).
#[derive(Debug, Clone, Default)]
pub struct Mount {
	pub created_mount_dir: Option<PathBuf>,
	pub shortest_mount_root: Option<PathBuf>,
	pub points: Vec<MountPoint>,
}

impl Mount {
	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}
}

/// A single-name entry after merging local and remote listings at one
/// directory level. At most one side is absent.
#[derive(Debug, Clone)]
pub struct DirList {
	pub name: String,
	pub remote: Option<File>,
	pub local: Option<File>,
}

impl DirList {
	pub fn is_dir(&self) -> bool {
		self.remote.as_ref().or(self.local.as_ref()).map(|f| f.is_dir).unwrap_or(false)
	}
}


// vim: ts=4
