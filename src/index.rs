//! Index Store (C2): persistent last-synced record keyed by remote id.
//!
//! Backed by `redb`, one table named `indices`. Each operation opens the
//! database, performs its transaction, and closes; concurrent in-process
//! callers serialize through redb's own transaction discipline.

use redb::TableDefinition;
use std::path::Path;

use crate::error::IndexError;
use crate::types::Index;

const INDICES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("indices");

/// On-disk file name under the sync root's hidden directory.
pub const INDEX_DB_NAME: &str = "drivedb";

pub struct IndexStore {
	db: redb::Database,
}

impl IndexStore {
	/// Open (creating if missing) the index database at `db_path` and
	/// ensure the `indices` bucket exists.
	pub fn open(db_path: &Path) -> Result<Self, IndexError> {
		let db = redb::Database::create(db_path)
			.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		let store = IndexStore { db };
		store.create_bucket_if_missing()?;
		Ok(store)
	}

	pub fn create_bucket_if_missing(&self) -> Result<(), IndexError> {
		let write_txn =
			self.db.begin_write().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		{
			write_txn
				.open_table(INDICES_TABLE)
				.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		}
		write_txn.commit().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	/// Persist `index`, keyed by its identifier. Rejects an empty identifier
	/// — such entries would collide.
	pub fn put(&self, index: &Index) -> Result<(), IndexError> {
		if index.id.is_empty() {
			return Err(IndexError::EmptyIdentifier);
		}
		let json = serde_json::to_string(index)
			.map_err(|e| IndexError::Backend { source: Box::new(e) })?;

		let write_txn =
			self.db.begin_write().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		{
			let mut table = write_txn
				.open_table(INDICES_TABLE)
				.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
			table
				.insert(index.id.as_str(), json.as_str())
				.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		}
		write_txn.commit().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	/// Look up the last-synced record for `id`.
	pub fn get(&self, id: &str) -> Result<Index, IndexError> {
		let read_txn =
			self.db.begin_read().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		let table = read_txn
			.open_table(INDICES_TABLE)
			.map_err(|e| IndexError::Backend { source: Box::new(e) })?;

		match table.get(id).map_err(|e| IndexError::Backend { source: Box::new(e) })? {
			Some(value) => serde_json::from_str(value.value())
				.map_err(|e| IndexError::Backend { source: Box::new(e) }),
			None => Err(IndexError::NoSuchKey { id: id.to_string() }),
		}
	}

	/// Same as `get`, but absorbs `NoSuchKey`/`NoSuchBucket`/`EmptyIdentifier`
	/// into `None` — the shape the Conflict Engine wants (§4.2: all three
	/// are non-fatal, "no prior index").
	pub fn get_opt(&self, id: &str) -> Result<Option<Index>, IndexError> {
		match self.get(id) {
			Ok(index) => Ok(Some(index)),
			Err(IndexError::NoSuchKey { .. }) | Err(IndexError::NoSuchBucket) => Ok(None),
			Err(other) => Err(other),
		}
	}

	pub fn delete(&self, id: &str) -> Result<(), IndexError> {
		let write_txn =
			self.db.begin_write().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		{
			let mut table = write_txn
				.open_table(INDICES_TABLE)
				.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
			table.remove(id).map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		}
		write_txn.commit().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		Ok(())
	}

	/// All keyed identifiers currently stored.
	pub fn list_keys(&self) -> Result<Vec<String>, IndexError> {
		let read_txn =
			self.db.begin_read().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		let table = read_txn
			.open_table(INDICES_TABLE)
			.map_err(|e| IndexError::Backend { source: Box::new(e) })?;

		let mut keys = Vec::new();
		let mut iter = table.iter().map_err(|e| IndexError::Backend { source: Box::new(e) })?;
		while let Some(entry) = iter.next() {
			let (key, _) = entry.map_err(|e| IndexError::Backend { source: Box::new(e) })?;
			keys.push(key.value().to_string());
		}
		Ok(keys)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn sample_index(id: &str) -> Index {
		Index {
			id: id.to_string(),
			etag: "etag1".into(),
			content_hash: "deadbeef".into(),
			mime_type: "text/plain".into(),
			mtime: 1000,
			version: 1,
			index_time: 1001,
		}
	}

	#[test]
	fn test_put_and_get_roundtrip() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		let idx = sample_index("file1");
		store.put(&idx).unwrap();
		assert_eq!(store.get("file1").unwrap(), idx);
	}

	#[test]
	fn test_get_missing_key() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		assert!(matches!(store.get("nope"), Err(IndexError::NoSuchKey { .. })));
	}

	#[test]
	fn test_get_opt_absorbs_missing_key() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		assert_eq!(store.get_opt("nope").unwrap(), None);
	}

	#[test]
	fn test_put_rejects_empty_identifier() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		let idx = sample_index("");
		assert!(matches!(store.put(&idx), Err(IndexError::EmptyIdentifier)));
	}

	#[test]
	fn test_delete_removes_entry() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		let idx = sample_index("file1");
		store.put(&idx).unwrap();
		store.delete("file1").unwrap();
		assert_eq!(store.get_opt("file1").unwrap(), None);
	}

	#[test]
	fn test_list_keys() {
		let tmp = TempDir::new().unwrap();
		let store = IndexStore::open(&tmp.path().join(INDEX_DB_NAME)).unwrap();
		store.put(&sample_index("a")).unwrap();
		store.put(&sample_index("b")).unwrap();
		let mut keys = store.list_keys().unwrap();
		keys.sort();
		assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
	}
}

// vim: ts=4
