//! MkdirAll Cache (C11): memoized, process-exclusive recursive directory
//! creation.
//!
//! Two workers racing to create the same remote parent directory produce
//! duplicate sibling folders — a recurring historical bug. Serializing the
//! whole walk behind one process-wide lock, and re-checking the remote
//! inside that lock before creating anything, closes the race.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::MkdirError;
use crate::remote::RemoteClient;
use crate::types::File;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
	file: File,
	expires_at: Instant,
}

/// One cache per command invocation; ancestors discovered in this run stay
/// warm until `ttl` elapses or an event invalidates them.
pub struct MkdirCache {
	lock: Mutex<()>,
	cache: Mutex<HashMap<String, CacheEntry>>,
	ttl: Duration,
}

impl MkdirCache {
	pub fn new() -> Self {
		Self::with_ttl(DEFAULT_TTL)
	}

	pub fn with_ttl(ttl: Duration) -> Self {
		MkdirCache { lock: Mutex::new(()), cache: Mutex::new(HashMap::new()), ttl }
	}

	fn cache_key(parent_id: &str, name: &str) -> String {
		format!("{}/{}", parent_id, name)
	}

	async fn cached(&self, key: &str) -> Option<File> {
		let cache = self.cache.lock().await;
		cache.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.file.clone())
	}

	async fn insert(&self, key: String, file: File) {
		let mut cache = self.cache.lock().await;
		cache.insert(key, CacheEntry { file, expires_at: Instant::now() + self.ttl });
	}

	/// Drop a cached entry, called when C8/C9 publish a trash or delete
	/// event for that directory.
	pub async fn invalidate(&self, parent_id: &str, name: &str) {
		self.cache.lock().await.remove(&Self::cache_key(parent_id, name));
	}

	/// Ensure every path component exists under `root`, in order, returning
	/// the `File` for the terminal directory.
	///
	/// The whole walk runs under one lock: by the time a worker reaches a
	/// given component, any sibling worker that got there first has already
	/// released the lock with that component created and cached.
	pub async fn ensure_path(&self, client: &dyn RemoteClient, root: &File, components: &[String]) -> Result<File, MkdirError> {
		let _guard = self.lock.lock().await;
		let mut current = root.clone();
		for name in components {
			current = self.ensure_child_locked(client, &current, name).await?;
		}
		Ok(current)
	}

	async fn ensure_child_locked(&self, client: &dyn RemoteClient, parent: &File, name: &str) -> Result<File, MkdirError> {
		let key = Self::cache_key(&parent.id, name);

		if let Some(f) = self.cached(&key).await {
			return Ok(f);
		}

		// Re-check the remote before creating: another worker may have won
		// this exact segment between our cache miss and this lookup.
		match client.lookup_child(&parent.id, name).await {
			Ok(Some(f)) => {
				self.insert(key, f.clone()).await;
				return Ok(f);
			}
			Ok(None) => {}
			Err(e) => {
				return Err(MkdirError::Failed { path: name.to_string(), message: e.message().to_string() });
			}
		}

		match client.create_folder(&parent.id, name, 0).await {
			Ok(f) => {
				self.insert(key, f.clone()).await;
				Ok(f)
			}
			Err(e) => Err(MkdirError::Failed { path: name.to_string(), message: e.message().to_string() }),
		}
	}
}

impl Default for MkdirCache {
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
