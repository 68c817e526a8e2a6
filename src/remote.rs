//! Remote collaborator boundary (C10's counterpart to `pager::PageFetcher`).
//!
//! Concrete wire protocol, OAuth2 bootstrap, and HTTP transport are out of
//! scope here — this trait is the seam an external client implements. The
//! sync engine depends only on this trait, never on a concrete transport.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RemoteErrorKind;
use crate::types::File;

pub type RemoteResult<T> = Result<T, RemoteErrorKind>;

/// Parameters for a body upload, gathered by `executors::upsert_by_comparison`
/// before handing off to the remote client.
pub struct UploadRequest<'a> {
	pub parent_id: &'a str,
	pub name: &'a str,
	pub size: u64,
	/// Src mod-time; always wins over the server clock.
	pub mtime: i64,
	pub mime_type: &'a str,
	pub convert: bool,
	pub ocr: bool,
	pub pin: bool,
	pub indexable: bool,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
	/// Create a directory entity with no body, returning the new `File`.
	async fn create_folder(&self, parent_id: &str, name: &str, mtime: i64) -> RemoteResult<File>;

	/// Upload `body`'s bytes as the content of `req`, returning the new or
	/// updated `File`. `body` has already been wrapped by the caller with
	/// C3's encrypter and a bandwidth throttle, as applicable.
	async fn upload(&self, req: UploadRequest<'_>, body: &mut (dyn AsyncRead + Send + Unpin)) -> RemoteResult<File>;

	/// Update metadata only (mod-time, mime-type coercion) with no body
	/// transfer — used for metadata-only `Mod` changes.
	async fn update_metadata(&self, id: &str, mtime: i64, mime_type: &str) -> RemoteResult<File>;

	/// Stream the bytes at `blob_url` into `dst`.
	async fn download_blob(&self, blob_url: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()>;

	/// Stream an export-format URL into `dst`.
	async fn download_export(&self, export_url: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()>;

	/// Move `id` to the trash (`permanent = false`) or erase it outright.
	async fn trash(&self, id: &str, permanent: bool) -> RemoteResult<()>;

	async fn rename(&self, id: &str, new_name: &str) -> RemoteResult<()>;

	/// Look up a single named child of `parent_id`, `None` if absent.
	async fn lookup_child(&self, parent_id: &str, name: &str) -> RemoteResult<Option<File>>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	use crate::types::BlobLocation;

	#[derive(Default)]
	struct RecordingClient {
		created: Mutex<Vec<(String, String)>>,
	}

	#[async_trait]
	impl RemoteClient for RecordingClient {
		async fn create_folder(&self, parent_id: &str, name: &str, _mtime: i64) -> RemoteResult<File> {
			self.created.lock().unwrap().push((parent_id.to_string(), name.to_string()));
			Ok(File {
				id: format!("{}/{}", parent_id, name),
				name: name.to_string(),
				is_dir: true,
				size: 0,
				mtime: 0,
				content_hash: None,
				mime_type: None,
				version: 1,
				export_formats: BTreeMap::new(),
				blob_location: BlobLocation::None,
				owner: None,
				labels: Default::default(),
			})
		}

		async fn upload(&self, _req: UploadRequest<'_>, _body: &mut (dyn AsyncRead + Send + Unpin)) -> RemoteResult<File> {
			Err(RemoteErrorKind::Unknown { message: "not implemented in test double".into() })
		}

		async fn update_metadata(&self, _id: &str, _mtime: i64, _mime_type: &str) -> RemoteResult<File> {
			Err(RemoteErrorKind::Unknown { message: "not implemented in test double".into() })
		}

		async fn download_blob(&self, _blob_url: &str, _dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()> {
			Ok(())
		}

		async fn download_export(&self, _export_url: &str, _dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()> {
			Ok(())
		}

		async fn trash(&self, _id: &str, _permanent: bool) -> RemoteResult<()> {
			Ok(())
		}

		async fn rename(&self, _id: &str, _new_name: &str) -> RemoteResult<()> {
			Ok(())
		}

		async fn lookup_child(&self, _parent_id: &str, _name: &str) -> RemoteResult<Option<File>> {
			Ok(None)
		}
	}

	#[tokio::test]
	async fn test_create_folder_records_parent_and_name() {
		let client = RecordingClient::default();
		let f = client.create_folder("root", "sub", 0).await.unwrap();
		assert_eq!(f.name, "sub");
		assert!(f.is_dir);
		assert_eq!(client.created.lock().unwrap()[0], ("root".to_string(), "sub".to_string()));
	}
}

// vim: ts=4
