//! Upsert / Download Executors (C10): applies one resolved `Change` against
//! the remote, through C3's crypto pipeline and a bandwidth throttle when
//! configured, and through C11 for parent directory creation.

use std::future::Future as _;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::{Instant as TokioInstant, Sleep};

use crate::crypto;
use crate::error::{CryptoError, SyncError};
use crate::mkdir_cache::MkdirCache;
use crate::remote::{RemoteClient, UploadRequest};
use crate::types::{BlobLocation, Change, DiffMask, File};

/// Directory entities have no mime type of their own; this sentinel marks
/// one when no override or inferred type applies.
pub const DIRECTORY_MIME_TYPE: &str = "application/x-drivesync-folder";

/// `shouldUploadBody`: re-upload the body iff src is a file and either this
/// is a fresh upload (no dest, or the local stat failed) or the diff mask's
/// checksum bit is set. A mod-time-only change must never re-upload.
pub fn should_upload_body(src: Option<&File>, dest: Option<&File>, src_unstatable: bool, mask: DiffMask) -> bool {
	let fresh_non_dir = src.map(|s| !s.is_dir).unwrap_or(false) && (dest.is_none() || src_unstatable);
	fresh_non_dir || mask.contains(DiffMask::CHECKSUM)
}

/// Mime-type coercion precedence: explicit override, then the src's own
/// mime type, then extension inference, then the directory sentinel.
fn coerce_mime_type(explicit_override: Option<&str>, src_mime: Option<&str>, path: Option<&Path>, is_dir: bool) -> String {
	if let Some(m) = explicit_override {
		return m.to_string();
	}
	if let Some(m) = src_mime {
		return m.to_string();
	}
	if is_dir {
		return DIRECTORY_MIME_TYPE.to_string();
	}
	match path {
		Some(p) => mime_guess::from_path(p).first_or_octet_stream().to_string(),
		None => "application/octet-stream".to_string(),
	}
}

/// Flags derived from the coerced mime type. No policy surface in this
/// crate assigns `convert` or `pin`, so they are always false; `ocr` fires
/// for image types, `indexable` for anything that isn't a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadTypeFlags {
	pub convert: bool,
	pub ocr: bool,
	pub pin: bool,
	pub indexable: bool,
}

fn derive_type_flags(mime_type: &str, is_dir: bool) -> UploadTypeFlags {
	UploadTypeFlags { convert: false, ocr: mime_type.starts_with("image/"), pin: false, indexable: !is_dir }
}

fn local_path(file: &File) -> Option<&Path> {
	match &file.blob_location {
		BlobLocation::Local(p) => Some(p.as_path()),
		_ => None,
	}
}

/// Wraps a reader with a KiB/s ceiling, delaying the read *following* the
/// one that crossed the per-second byte budget rather than the current one
/// — simple, and sufficiently accurate for a best-effort throttle.
struct ThrottledReader<R> {
	inner: R,
	bytes_per_sec: u64,
	window_start: TokioInstant,
	window_bytes: u64,
	sleep: Option<Pin<Box<Sleep>>>,
}

impl<R: AsyncRead + Unpin> ThrottledReader<R> {
	fn new(inner: R, kib_per_sec: u32) -> Self {
		ThrottledReader {
			inner,
			bytes_per_sec: kib_per_sec as u64 * 1024,
			window_start: TokioInstant::now(),
			window_bytes: 0,
			sleep: None,
		}
	}
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
	fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
		if self.bytes_per_sec == 0 {
			return Pin::new(&mut self.inner).poll_read(cx, buf);
		}

		if let Some(sleep) = self.sleep.as_mut() {
			match sleep.as_mut().poll(cx) {
				Poll::Pending => return Poll::Pending,
				Poll::Ready(()) => {
					self.sleep = None;
					self.window_start = TokioInstant::now();
					self.window_bytes = 0;
				}
			}
		}

		let before = buf.filled().len();
		let res = Pin::new(&mut self.inner).poll_read(cx, buf);
		if res.is_ready() {
			let produced = (buf.filled().len() - before) as u64;
			self.window_bytes += produced;
			let elapsed = self.window_start.elapsed();
			if self.window_bytes >= self.bytes_per_sec && elapsed < Duration::from_secs(1) {
				self.sleep = Some(Box::pin(tokio::time::sleep(Duration::from_secs(1) - elapsed)));
			}
		}
		res
	}
}

/// Everything `upsert_by_comparison` needs beyond the `Change` itself.
pub struct UpsertArgs<'a> {
	pub change: &'a Change,
	pub root: &'a File,
	/// Remote path components from `root` down to (not including) the
	/// change's own parent — ensured via C11 before upload.
	pub ancestor_components: &'a [String],
	pub mask: DiffMask,
	pub mime_override: Option<&'a str>,
	pub bandwidth_limit_kib_s: Option<u32>,
	pub crypto_password: Option<&'a str>,
	pub scratch_dir: &'a Path,
}

fn remote_error(path: &str, e: crate::error::RemoteErrorKind) -> SyncError {
	SyncError::RemoteLookupFailed { path: path.to_string(), message: e.message().to_string() }
}

pub async fn upsert_by_comparison(args: UpsertArgs<'_>, client: &dyn RemoteClient, mkdir: &MkdirCache) -> Result<File, SyncError> {
	let src = args.change.src.as_ref().ok_or_else(|| SyncError::InvalidArguments { message: "upsert requires a src".into() })?;

	let parent = mkdir.ensure_path(client, args.root, args.ancestor_components).await?;

	if src.is_dir {
		return client.create_folder(&parent.id, &src.name, src.mtime).await.map_err(|e| remote_error(&args.change.path, e));
	}

	let mime_type = coerce_mime_type(args.mime_override, src.mime_type.as_deref(), local_path(src), false);
	let type_flags = derive_type_flags(&mime_type, false);

	if !should_upload_body(Some(src), args.change.dest.as_ref(), false, args.mask) {
		let id = args.change.dest.as_ref().map(|d| d.id.as_str()).unwrap_or("");
		return client.update_metadata(id, src.mtime, &mime_type).await.map_err(|e| remote_error(&args.change.path, e));
	}

	let path = local_path(src).ok_or_else(|| SyncError::InvalidArguments { message: format!("{} has no local path", args.change.path) })?;
	let plain = tokio::fs::File::open(path).await?;

	let req = UploadRequest {
		parent_id: &parent.id,
		name: &src.name,
		size: src.size,
		mtime: src.mtime,
		mime_type: &mime_type,
		convert: type_flags.convert,
		ocr: type_flags.ocr,
		pin: type_flags.pin,
		indexable: type_flags.indexable,
	};

	if let Some(password) = args.crypto_password {
		let scratch = args.scratch_dir.join(format!(".drivesync-up-{}-{}", std::process::id(), src.name));
		{
			let scratch_out = tokio::fs::File::create(&scratch).await?;
			crypto::encrypt(plain, scratch_out, password).await?;
		}
		let encrypted = tokio::fs::File::open(&scratch).await?;
		let mut reader = ThrottledReader::new(encrypted, args.bandwidth_limit_kib_s.unwrap_or(0));
		let result = client.upload(req, &mut reader).await.map_err(|e| remote_error(&args.change.path, e));
		let _ = tokio::fs::remove_file(&scratch).await;
		result
	} else {
		let mut reader = ThrottledReader::new(plain, args.bandwidth_limit_kib_s.unwrap_or(0));
		client.upload(req, &mut reader).await.map_err(|e| remote_error(&args.change.path, e))
	}
}

pub struct DownloadArgs<'a> {
	pub change: &'a Change,
	pub local_path: &'a Path,
	pub exports_dir: &'a Path,
	pub requested_export_extensions: &'a [String],
	pub crypto_password: Option<&'a str>,
	pub scratch_dir: &'a Path,
}

async fn touch_empty(path: &Path) -> std::io::Result<()> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	tokio::fs::File::create(path).await?;
	Ok(())
}

fn propagate_mtime(path: &Path, mtime: i64) -> std::io::Result<()> {
	let ft = filetime::FileTime::from_unix_time(mtime, 0);
	filetime::set_file_mtime(path, ft)
}

/// Returns bytes written to the local path (export bytes, for
/// export-only src; plaintext bytes, otherwise).
pub async fn download(args: DownloadArgs<'_>, client: &dyn RemoteClient) -> Result<u64, SyncError> {
	let src = args.change.src.as_ref().ok_or_else(|| SyncError::InvalidArguments { message: "download requires a src".into() })?;

	if src.is_export_only() {
		let mut total = 0u64;
		if let Some(parent) = args.local_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		for ext in args.requested_export_extensions {
			let mime = mime_guess::from_ext(ext).first_or_octet_stream().to_string();
			let url = match src.export_formats.get(&mime) {
				Some(url) => url,
				None => continue,
			};
			tokio::fs::create_dir_all(args.exports_dir).await?;
			let export_path = args.exports_dir.join(format!("{}.{}", src.name, ext));
			let mut out = tokio::fs::File::create(&export_path).await?;
			client.download_export(url, &mut out).await.map_err(|e| remote_error(&args.change.path, e))?;
			total += tokio::fs::metadata(&export_path).await.map(|m| m.len()).unwrap_or(0);
		}
		// The plaintext path is never written for export-only files; it
		// stays an empty touched file so the entry still exists locally.
		touch_empty(args.local_path).await?;
		propagate_mtime(args.local_path, src.mtime)?;
		return Ok(total);
	}

	let blob_url = match &src.blob_location {
		BlobLocation::Remote(url) => url.clone(),
		_ => return Err(SyncError::InvalidArguments { message: format!("{} has no remote blob location", args.change.path) }),
	};

	if let Some(parent) = args.local_path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	if let Some(password) = args.crypto_password {
		let cipher_scratch = args.scratch_dir.join(format!(".drivesync-dl-{}-{}", std::process::id(), src.name));
		{
			let mut cipher_out = tokio::fs::File::create(&cipher_scratch).await?;
			client.download_blob(&blob_url, &mut cipher_out).await.map_err(|e| remote_error(&args.change.path, e))?;
		}
		let cipher_in = tokio::fs::File::open(&cipher_scratch).await?;
		let dst = tokio::fs::File::create(args.local_path).await?;
		let decrypt_scratch = args.scratch_dir.join(format!(".drivesync-dec-{}-{}", std::process::id(), src.name));

		let decrypt_result = crypto::decrypt(cipher_in, dst, password, decrypt_scratch).await;
		let _ = tokio::fs::remove_file(&cipher_scratch).await;
		match decrypt_result {
			Ok(()) => {}
			Err(CryptoError::AuthenticationFailed) => {
				let _ = tokio::fs::remove_file(args.local_path).await;
				return Err(SyncError::AuthenticationFailed { path: args.change.path.clone() });
			}
			Err(other) => return Err(SyncError::Crypto(other)),
		}
	} else {
		let mut dst = tokio::fs::File::create(args.local_path).await?;
		client.download_blob(&blob_url, &mut dst).await.map_err(|e| remote_error(&args.change.path, e))?;
	}

	propagate_mtime(args.local_path, src.mtime)?;
	Ok(tokio::fs::metadata(args.local_path).await.map(|m| m.len()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::collections::BTreeMap;
	use tempfile::TempDir;

	use crate::error::RemoteErrorKind;
	use crate::remote::RemoteResult;
	use crate::types::{ChangeFlags, Labels};

	fn sample_file(is_dir: bool, size: u64, path: Option<PathBuf>) -> File {
		File {
			id: String::new(),
			name: "a.txt".into(),
			is_dir,
			size,
			mtime: 1_700_000_000,
			content_hash: None,
			mime_type: None,
			version: 1,
			export_formats: BTreeMap::new(),
			blob_location: path.map(BlobLocation::Local).unwrap_or(BlobLocation::None),
			owner: None,
			labels: Labels::default(),
		}
	}

	#[test]
	fn test_should_upload_body_true_for_fresh_file() {
		let src = sample_file(false, 10, None);
		assert!(should_upload_body(Some(&src), None, false, DiffMask::NONE));
	}

	#[test]
	fn test_should_upload_body_false_for_mod_time_only() {
		let src = sample_file(false, 10, None);
		let dest = sample_file(false, 10, None);
		assert!(!should_upload_body(Some(&src), Some(&dest), false, DiffMask::MOD_TIME));
	}

	#[test]
	fn test_should_upload_body_true_when_checksum_bit_set() {
		let src = sample_file(false, 10, None);
		let dest = sample_file(false, 10, None);
		assert!(should_upload_body(Some(&src), Some(&dest), false, DiffMask::CHECKSUM));
	}

	#[test]
	fn test_should_upload_body_false_for_directory() {
		let src = sample_file(true, 0, None);
		assert!(!should_upload_body(Some(&src), None, false, DiffMask::NONE));
	}

	#[test]
	fn test_mime_coercion_precedence() {
		assert_eq!(coerce_mime_type(Some("text/override"), Some("text/src"), None, false), "text/override");
		assert_eq!(coerce_mime_type(None, Some("text/src"), None, false), "text/src");
		assert_eq!(coerce_mime_type(None, None, None, true), DIRECTORY_MIME_TYPE);
	}

	struct NullClient;

	#[async_trait]
	impl RemoteClient for NullClient {
		async fn create_folder(&self, parent_id: &str, name: &str, _mtime: i64) -> RemoteResult<File> {
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
				labels: Labels::default(),
			})
		}
		async fn upload(&self, req: UploadRequest<'_>, body: &mut (dyn AsyncRead + Send + Unpin)) -> RemoteResult<File> {
			use tokio::io::AsyncReadExt;
			let mut buf = Vec::new();
			body.read_to_end(&mut buf).await.map_err(|e| RemoteErrorKind::Unknown { message: e.to_string() })?;
			Ok(File {
				id: format!("{}/{}", req.parent_id, req.name),
				name: req.name.to_string(),
				is_dir: false,
				size: buf.len() as u64,
				mtime: req.mtime,
				content_hash: None,
				mime_type: Some(req.mime_type.to_string()),
				version: 1,
				export_formats: BTreeMap::new(),
				blob_location: BlobLocation::None,
				owner: None,
				labels: Labels::default(),
			})
		}
		async fn update_metadata(&self, id: &str, mtime: i64, mime_type: &str) -> RemoteResult<File> {
			Ok(File {
				id: id.to_string(),
				name: "a.txt".into(),
				is_dir: false,
				size: 0,
				mtime,
				content_hash: None,
				mime_type: Some(mime_type.to_string()),
				version: 1,
				export_formats: BTreeMap::new(),
				blob_location: BlobLocation::None,
				owner: None,
				labels: Labels::default(),
			})
		}
		async fn download_blob(&self, _blob_url: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()> {
			dst.write_all(b"hello world").await.map_err(|e| RemoteErrorKind::Unknown { message: e.to_string() })?;
			Ok(())
		}
		async fn download_export(&self, _export_url: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> RemoteResult<()> {
			dst.write_all(b"exported").await.map_err(|e| RemoteErrorKind::Unknown { message: e.to_string() })?;
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
	async fn test_upsert_directory_creates_with_no_body() {
		let tmp = TempDir::new().unwrap();
		let client = NullClient;
		let mkdir = MkdirCache::new();
		let root = sample_file(true, 0, None);
		let mut src = sample_file(true, 0, None);
		src.name = "subdir".into();
		let mut change = Change::new("subdir", "");
		change.src = Some(src);
		let args = UpsertArgs {
			change: &change,
			root: &root,
			ancestor_components: &[],
			mask: DiffMask::NONE,
			mime_override: None,
			bandwidth_limit_kib_s: None,
			crypto_password: None,
			scratch_dir: tmp.path(),
		};
		let result = upsert_by_comparison(args, &client, &mkdir).await.unwrap();
		assert!(result.is_dir);
		assert_eq!(result.name, "subdir");
	}

	#[tokio::test]
	async fn test_upsert_file_uploads_body_when_checksum_differs() {
		let tmp = TempDir::new().unwrap();
		let file_path = tmp.path().join("a.txt");
		tokio::fs::write(&file_path, b"payload").await.unwrap();

		let client = NullClient;
		let mkdir = MkdirCache::new();
		let root = sample_file(true, 0, None);
		let src = sample_file(false, 7, Some(file_path));
		let mut change = Change::new("a.txt", "");
		change.src = Some(src);
		let args = UpsertArgs {
			change: &change,
			root: &root,
			ancestor_components: &[],
			mask: DiffMask::CHECKSUM,
			mime_override: None,
			bandwidth_limit_kib_s: None,
			crypto_password: None,
			scratch_dir: tmp.path(),
		};
		let result = upsert_by_comparison(args, &client, &mkdir).await.unwrap();
		assert_eq!(result.size, 7);
	}

	#[tokio::test]
	async fn test_upsert_skips_body_for_metadata_only_change() {
		let tmp = TempDir::new().unwrap();
		let file_path = tmp.path().join("a.txt");
		tokio::fs::write(&file_path, b"payload").await.unwrap();

		let client = NullClient;
		let mkdir = MkdirCache::new();
		let root = sample_file(true, 0, None);
		let src = sample_file(false, 7, Some(file_path));
		let dest = sample_file(false, 7, None);
		let mut change = Change::new("a.txt", "");
		change.src = Some(src);
		change.dest = Some(dest);
		change.flags = ChangeFlags::default();
		let args = UpsertArgs {
			change: &change,
			root: &root,
			ancestor_components: &[],
			mask: DiffMask::MOD_TIME,
			mime_override: None,
			bandwidth_limit_kib_s: None,
			crypto_password: None,
			scratch_dir: tmp.path(),
		};
		let result = upsert_by_comparison(args, &client, &mkdir).await.unwrap();
		assert_eq!(result.size, 0);
	}

	#[tokio::test]
	async fn test_download_plain_blob_writes_bytes_and_propagates_mtime() {
		let tmp = TempDir::new().unwrap();
		let dest_path = tmp.path().join("out.txt");
		let client = NullClient;

		let mut src = sample_file(false, 11, None);
		src.blob_location = BlobLocation::Remote("https://example/blob".into());
		let mut change = Change::new("out.txt", "");
		change.src = Some(src);

		let args = DownloadArgs {
			change: &change,
			local_path: &dest_path,
			exports_dir: tmp.path(),
			requested_export_extensions: &[],
			crypto_password: None,
			scratch_dir: tmp.path(),
		};
		let bytes = download(args, &client).await.unwrap();
		assert_eq!(bytes, 11);
		let meta = tokio::fs::metadata(&dest_path).await.unwrap();
		assert_eq!(filetime::FileTime::from_last_modification_time(&meta).unix_seconds(), 1_700_000_000);
	}

	#[tokio::test]
	async fn test_download_export_only_leaves_plaintext_empty() {
		let tmp = TempDir::new().unwrap();
		let dest_path = tmp.path().join("doc.gdoc");
		let exports_dir = tmp.path().join("exports");
		let client = NullClient;

		let mut src = sample_file(false, 0, None);
		src.export_formats.insert("application/pdf".into(), "https://example/export".into());
		let mut change = Change::new("doc.gdoc", "");
		change.src = Some(src);

		let args = DownloadArgs {
			change: &change,
			local_path: &dest_path,
			exports_dir: &exports_dir,
			requested_export_extensions: &["pdf".to_string()],
			crypto_password: None,
			scratch_dir: tmp.path(),
		};
		let bytes = download(args, &client).await.unwrap();
		assert_eq!(bytes, 8);
		assert_eq!(tokio::fs::metadata(&dest_path).await.unwrap().len(), 0);
		assert!(exports_dir.join("a.txt.pdf").exists());
	}

	#[tokio::test]
	async fn test_upsert_with_crypto_uploads_ciphertext_with_overhead() {
		let tmp = TempDir::new().unwrap();
		let src_path = tmp.path().join("secret.txt");
		tokio::fs::write(&src_path, b"top secret payload").await.unwrap();

		let client = NullClient;
		let mkdir = MkdirCache::new();
		let root = sample_file(true, 0, None);
		let src = sample_file(false, 19, Some(src_path));
		let mut change = Change::new("secret.txt", "");
		change.src = Some(src);

		let args = UpsertArgs {
			change: &change,
			root: &root,
			ancestor_components: &[],
			mask: DiffMask::CHECKSUM,
			mime_override: None,
			bandwidth_limit_kib_s: None,
			crypto_password: Some("hunter2"),
			scratch_dir: tmp.path(),
		};
		let uploaded = upsert_by_comparison(args, &client, &mkdir).await.unwrap();
		assert_eq!(uploaded.size, crate::crypto::OVERHEAD + 19);
	}
}

// vim: ts=4
