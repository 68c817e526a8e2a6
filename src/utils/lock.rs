//! File locking mechanism for sync state management

use std::error::Error;
use std::path;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::schedule::CancelToken;

/// Global lock file path - used for signal handler cleanup
static LOCK_FILE_PATH: OnceLock<std::sync::Mutex<Option<path::PathBuf>>> = OnceLock::new();

/// File locking mechanism to prevent concurrent sync operations
/// Automatically cleaned up on drop or on signal termination
pub struct FileLock {
	path: path::PathBuf,
}

impl FileLock {
	/// Acquire an exclusive lock on the sync state directory
	pub fn acquire(sync_dir: &path::Path) -> Result<Self, Box<dyn Error>> {
		let lock_path = sync_dir.join(".drivesync-LOCK");

		// Check if lock file already exists
		if lock_path.exists() {
			let _pid_str = std::fs::read_to_string(&lock_path)?;
			return Err(format!(
				"Sync already in progress (lock file exists at {}). \
                 If this is stale, delete the lock file manually.",
				lock_path.display()
			)
			.into());
		}

		// Create lock file with our PID
		let pid = std::process::id();
		std::fs::write(&lock_path, pid.to_string())?;

		// Register global lock path for signal handlers
		let lock_storage_mutex = LOCK_FILE_PATH.get_or_init(|| std::sync::Mutex::new(None));
		if let Ok(mut lock_storage) = lock_storage_mutex.lock() {
			*lock_storage = Some(lock_path.clone());
		}

		Ok(FileLock { path: lock_path })
	}

	/// Remove the lock file immediately (used by signal handlers)
	fn remove_now(&self) {
		let _ = std::fs::remove_file(&self.path);
		// Clear the global lock path
		if let Ok(mut lock_storage) = LOCK_FILE_PATH.get().unwrap().lock() {
			*lock_storage = None;
		}
	}
}

impl Drop for FileLock {
	fn drop(&mut self) {
		// Remove lock file on drop (whether success or failure)
		self.remove_now();
	}
}

/// Setup signal handlers for graceful cleanup on termination.
///
/// A caught signal stores `true` into `cancel` (the same token handed to
/// `schedule::execute` for this invocation) and cleans up the lock file;
/// it does not exit the process, since in-flight jobs are left to the
/// scheduler to drain and an embedding CLI front end owns the final exit
/// code.
pub fn setup_signal_handlers(cancel: CancelToken) {
	// Spawn a task to handle signals
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}", e);
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => {
				debug!("Received SIGTERM, requesting cancellation...");
				cancel.store(true, Ordering::SeqCst);
				cleanup_lock_file();
			}
			_ = sigint.recv() => {
				debug!("Received SIGINT, requesting cancellation...");
				cancel.store(true, Ordering::SeqCst);
				cleanup_lock_file();
			}
		}
	});
}

/// Clean up the lock file if it exists
fn cleanup_lock_file() {
	if let Some(lock_storage_mutex) = LOCK_FILE_PATH.get() {
		if let Ok(lock_storage) = lock_storage_mutex.lock() {
			if let Some(lock_path) = lock_storage.as_ref() {
				let _ = std::fs::remove_file(lock_path);
				info!("Lock file cleaned up on signal termination: {}", lock_path.display());
			}
		}
	}
}


// vim: ts=4
