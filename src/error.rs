//! Error types for the sync engine

use std::error::Error;
use std::fmt;
use std::io;

/// Helper to reduce `Box::new()` boilerplate when wrapping errors into a
/// variant field.
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Unified error type for sync operations.
///
/// Each variant corresponds to one of the error kinds surfaced by the core
/// (see the error-handling design): some are batch-fatal, some are
/// per-file, some are absorbed by lower layers and only become errors at
/// the top level.
#[derive(Debug)]
pub enum SyncError {
	/// No ancestor of the working directory holds the hidden sync-state directory.
	NotInContext { cwd: String },

	/// Missing or malformed source arguments.
	InvalidArguments { message: String },

	/// A remote lookup completed with zero results.
	///
	/// Absorbed by the resolver (treated as "remote absent"); an error only
	/// at the top level of a direct lookup.
	PathNotExists { path: String },

	/// One or more clashes were detected in the plan.
	ClashesDetected { count: usize },

	/// One or more real (non-spurious) conflicts remain in the plan.
	UnresolvedConflicts { count: usize },

	/// A no-clobber violation.
	OverwriteAttempted { path: String },

	/// Directory-type mismatch, self-move, or other bug-assertion failure.
	IllogicalState { path: String, message: String },

	/// Remote lookup failed (network or API failure) after exhausting retries.
	RemoteLookupFailed { path: String, message: String },

	/// Download failed (non-2xx or transport) after exhausting retries.
	DownloadFailed { path: String, message: String },

	/// HMAC verification failed while decrypting.
	AuthenticationFailed { path: String },

	/// File exceeds the diff size limit.
	ContentTooLarge { path: String, size: u64 },

	/// Source is a named pipe (FIFO); reading it would block indefinitely.
	NamedPipeReadAttempt { path: String },

	/// The clash fixer succeeded; the caller should retry the command.
	ClashesFixed { count: usize },

	/// I/O error.
	Io(io::Error),

	/// Index Store error (nested).
	Index(IndexError),

	/// Crypto pipeline error (nested).
	Crypto(CryptoError),

	/// Remote pager error (nested).
	Pager(PagerError),

	/// MkdirAll cache error (nested).
	Mkdir(MkdirError),

	/// Path/context resolution error (nested).
	Path(PathError),

	/// Generic error message, for call sites that have no dedicated variant.
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::NotInContext { cwd } => {
				write!(f, "not in a sync context: no ancestor of {} holds the sync directory", cwd)
			}
			SyncError::InvalidArguments { message } => write!(f, "invalid arguments: {}", message),
			SyncError::PathNotExists { path } => write!(f, "path does not exist: {}", path),
			SyncError::ClashesDetected { count } => {
				write!(f, "{} clash(es) detected in plan", count)
			}
			SyncError::UnresolvedConflicts { count } => {
				write!(f, "{} unresolved conflict(s) in plan", count)
			}
			SyncError::OverwriteAttempted { path } => {
				write!(f, "overwrite attempted under no-clobber: {}", path)
			}
			SyncError::IllogicalState { path, message } => {
				write!(f, "illogical state at {}: {}", path, message)
			}
			SyncError::RemoteLookupFailed { path, message } => {
				write!(f, "remote lookup failed for {}: {}", path, message)
			}
			SyncError::DownloadFailed { path, message } => {
				write!(f, "download failed for {}: {}", path, message)
			}
			SyncError::AuthenticationFailed { path } => {
				write!(f, "authentication failed for {}: message corrupt or incorrect password", path)
			}
			SyncError::ContentTooLarge { path, size } => {
				write!(f, "{} is too large to diff ({} bytes)", path, size)
			}
			SyncError::NamedPipeReadAttempt { path } => {
				write!(f, "refusing to read named pipe: {}", path)
			}
			SyncError::ClashesFixed { count } => {
				write!(f, "fixed {} clash(es); retry the command", count)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Index(e) => write!(f, "index store error: {}", e),
			SyncError::Crypto(e) => write!(f, "crypto error: {}", e),
			SyncError::Pager(e) => write!(f, "remote pager error: {}", e),
			SyncError::Mkdir(e) => write!(f, "mkdir error: {}", e),
			SyncError::Path(e) => write!(f, "path error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<IndexError> for SyncError {
	fn from(e: IndexError) -> Self {
		SyncError::Index(e)
	}
}

impl From<CryptoError> for SyncError {
	fn from(e: CryptoError) -> Self {
		SyncError::Crypto(e)
	}
}

impl From<PagerError> for SyncError {
	fn from(e: PagerError) -> Self {
		SyncError::Pager(e)
	}
}

impl From<MkdirError> for SyncError {
	fn from(e: MkdirError) -> Self {
		SyncError::Mkdir(e)
	}
}

impl From<PathError> for SyncError {
	fn from(e: PathError) -> Self {
		SyncError::Path(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

/// Classification of a remote error for the execution scheduler's retry logic.
///
/// Status-code driven: 5xx and 401/403 are retryable (token refresh may
/// have elapsed for the latter), other 4xx are not, a known
/// non-mutable-file message is never retryable, and an untyped/unknown
/// error defaults to retryable.
#[derive(Debug, Clone)]
pub enum RemoteErrorKind {
	Status { code: u16, message: String },
	NonMutableFile { message: String },
	Unknown { message: String },
}

impl RemoteErrorKind {
	pub fn is_retryable(&self) -> bool {
		match self {
			RemoteErrorKind::Status { code, .. } => matches!(code, 500..=599 | 401 | 403),
			RemoteErrorKind::NonMutableFile { .. } => false,
			RemoteErrorKind::Unknown { .. } => true,
		}
	}

	pub fn message(&self) -> &str {
		match self {
			RemoteErrorKind::Status { message, .. } => message,
			RemoteErrorKind::NonMutableFile { message } => message,
			RemoteErrorKind::Unknown { message } => message,
		}
	}
}

impl fmt::Display for RemoteErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteErrorKind::Status { code, message } => write!(f, "HTTP {}: {}", code, message),
			RemoteErrorKind::NonMutableFile { message } => write!(f, "{}", message),
			RemoteErrorKind::Unknown { message } => write!(f, "{}", message),
		}
	}
}

/// Index Store (C2) errors. All three are non-fatal to the caller: they
/// surface as "no prior index" and trigger conservative behavior in the
/// Conflict Engine.
#[derive(Debug)]
pub enum IndexError {
	NoSuchBucket,
	NoSuchKey { id: String },
	EmptyIdentifier,
	Backend { source: Box<dyn Error + Send + Sync> },
}

impl fmt::Display for IndexError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			IndexError::NoSuchBucket => write!(f, "index bucket does not exist"),
			IndexError::NoSuchKey { id } => write!(f, "no index for id {}", id),
			IndexError::EmptyIdentifier => write!(f, "refusing to index an empty identifier"),
			IndexError::Backend { source } => write!(f, "index store backend error: {}", source),
		}
	}
}

impl Error for IndexError {}

/// Crypto Pipeline (C3) errors.
#[derive(Debug)]
pub enum CryptoError {
	KdfFailed { message: String },
	RandomSourceExhausted,
	AuthenticationFailed,
	UnknownVersion { version: u32 },
	Io(io::Error),
}

impl fmt::Display for CryptoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CryptoError::KdfFailed { message } => write!(f, "key derivation failed: {}", message),
			CryptoError::RandomSourceExhausted => write!(f, "random source exhausted"),
			CryptoError::AuthenticationFailed => {
				write!(f, "message corrupt or incorrect password")
			}
			CryptoError::UnknownVersion { version } => {
				write!(f, "unknown crypto pipeline version {}", version)
			}
			CryptoError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for CryptoError {}

impl From<io::Error> for CryptoError {
	fn from(e: io::Error) -> Self {
		CryptoError::Io(e)
	}
}

/// Remote Pager (C4) errors.
#[derive(Debug)]
pub enum PagerError {
	Remote { source: RemoteErrorKind },
	PromptDeclined,
}

impl fmt::Display for PagerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PagerError::Remote { source } => write!(f, "{}", source),
			PagerError::PromptDeclined => write!(f, "pagination declined at page boundary"),
		}
	}
}

impl Error for PagerError {}

/// MkdirAll Cache (C11) errors.
#[derive(Debug)]
pub enum MkdirError {
	Failed { path: String, message: String },
}

impl fmt::Display for MkdirError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MkdirError::Failed { path, message } => {
				write!(f, "failed to create {}: {}", path, message)
			}
		}
	}
}

impl Error for MkdirError {}

/// Path & Ignore (C1) errors.
#[derive(Debug)]
pub enum PathError {
	NotInContext,
	PathOutsideRoot { path: String },
	InvalidArguments { message: String },
	InvalidPattern { pattern: String, message: String },
}

impl fmt::Display for PathError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PathError::NotInContext => write!(f, "not in a sync context"),
			PathError::PathOutsideRoot { path } => write!(f, "{} escapes the sync root", path),
			PathError::InvalidArguments { message } => write!(f, "invalid arguments: {}", message),
			PathError::InvalidPattern { pattern, message } => {
				write!(f, "invalid ignore pattern {:?}: {}", pattern, message)
			}
		}
	}
}

impl Error for PathError {}


// vim: ts=4
