//! Remote Pagination Contract (C4): a streaming iterator over remote
//! listings that cannot silently coerce an error into "no results".
//!
//! Grounded on the listing-channel idiom: a background task drains pages
//! from a fetcher and forwards them over a bounded channel, with a
//! second channel dedicated to errors so a resolver can never confuse
//! "this page was empty" with "the lookup failed".

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::RemoteErrorKind;
use crate::types::File;

/// One page of a remote listing.
#[derive(Debug, Clone)]
pub struct RemotePage {
	pub files: Vec<File>,
	pub next_page_token: Option<String>,
}

/// The out-of-scope remote collaborator's page-fetching surface. A
/// concrete OAuth2/HTTP client implements this; the pager only ever
/// drives it through this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
	async fn fetch_page(
		&self,
		parent_id: &str,
		page_token: Option<String>,
	) -> Result<RemotePage, RemoteErrorKind>;
}

/// An emitted file-channel event.
#[derive(Debug, Clone)]
pub enum FileEvent {
	Entry(File),
	/// Emitted once, in place of any entries, when the first page was
	/// empty and the caller opted into nil-on-no-match semantics
	/// (`find_by_path`-style lookups).
	NotFound,
}

pub struct PaginationPair {
	pub files: mpsc::Receiver<FileEvent>,
	pub errors: mpsc::Receiver<RemoteErrorKind>,
}

pub struct PagerOptions {
	/// Throttle: at most this many page requests per second.
	pub requests_per_second: u32,
	/// Suppress names beginning with `.` unless set.
	pub include_hidden: bool,
	/// Emit `FileEvent::NotFound` instead of an empty sequence when the
	/// first page has zero entries.
	pub nil_on_no_match: bool,
	/// When set, block between pages for caller confirmation; declining
	/// ends the sequence early without an error.
	pub confirm_page: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl Default for PagerOptions {
	fn default() -> Self {
		PagerOptions {
			requests_per_second: 10,
			include_hidden: false,
			nil_on_no_match: false,
			confirm_page: None,
		}
	}
}

const CHANNEL_BUFFER: usize = 64;

fn is_hidden(name: &str) -> bool {
	name.starts_with('.')
}

/// Spawn the background pagination task and return its channel pair.
pub fn spawn_listing(
	fetcher: Arc<dyn PageFetcher>,
	parent_id: String,
	opts: PagerOptions,
) -> PaginationPair {
	let (files_tx, files_rx) = mpsc::channel(CHANNEL_BUFFER);
	let (errors_tx, errors_rx) = mpsc::channel(1);

	tokio::spawn(async move {
		let period = Duration::from_nanos(1_000_000_000 / opts.requests_per_second.max(1) as u64);
		let mut ticker = tokio::time::interval(period);
		let mut page_token: Option<String> = None;
		let mut first_page = true;

		loop {
			ticker.tick().await;
			let page = match fetcher.fetch_page(&parent_id, page_token.clone()).await {
				Ok(page) => page,
				Err(kind) => {
					let _ = errors_tx.send(kind).await;
					return;
				}
			};

			if first_page && page.files.is_empty() && opts.nil_on_no_match {
				let _ = files_tx.send(FileEvent::NotFound).await;
				return;
			}
			first_page = false;

			for file in page.files {
				if !opts.include_hidden && is_hidden(&file.name) {
					continue;
				}
				if files_tx.send(FileEvent::Entry(file)).await.is_err() {
					return;
				}
			}

			page_token = page.next_page_token;
			if page_token.is_none() {
				return;
			}

			if let Some(confirm) = &opts.confirm_page {
				if !confirm() {
					return;
				}
			}
		}
	});

	PaginationPair { files: files_rx, errors: errors_rx }
}

/// Drain a `PaginationPair` to completion, selecting between both
/// channels until the files channel closes or an error arrives.
pub async fn drain(mut pair: PaginationPair) -> Result<Vec<File>, RemoteErrorKind> {
	let mut out = Vec::new();
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
					Some(FileEvent::Entry(file)) => out.push(file),
					Some(FileEvent::NotFound) | None => return Ok(out),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::BlobLocation;
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	fn sample_file(name: &str) -> File {
		File {
			id: name.to_string(),
			name: name.to_string(),
			is_dir: false,
			size: 0,
			mtime: 0,
			content_hash: None,
			mime_type: None,
			version: 1,
			export_formats: BTreeMap::new(),
			blob_location: BlobLocation::None,
			owner: None,
			labels: Default::default(),
		}
	}

	struct FixedFetcher {
		pages: Mutex<Vec<Result<RemotePage, RemoteErrorKind>>>,
	}

	#[async_trait]
	impl PageFetcher for FixedFetcher {
		async fn fetch_page(
			&self,
			_parent_id: &str,
			_page_token: Option<String>,
		) -> Result<RemotePage, RemoteErrorKind> {
			self.pages.lock().unwrap().remove(0)
		}
	}

	#[tokio::test]
	async fn test_drains_all_pages() {
		let fetcher = Arc::new(FixedFetcher {
			pages: Mutex::new(vec![
				Ok(RemotePage { files: vec![sample_file("a")], next_page_token: Some("p2".into()) }),
				Ok(RemotePage { files: vec![sample_file("b")], next_page_token: None }),
			]),
		});
		let pair = spawn_listing(fetcher, "root".into(), PagerOptions::default());
		let files = drain(pair).await.unwrap();
		assert_eq!(files.len(), 2);
	}

	#[tokio::test]
	async fn test_hidden_files_suppressed_by_default() {
		let fetcher = Arc::new(FixedFetcher {
			pages: Mutex::new(vec![Ok(RemotePage {
				files: vec![sample_file(".git"), sample_file("README.md")],
				next_page_token: None,
			})]),
		});
		let pair = spawn_listing(fetcher, "root".into(), PagerOptions::default());
		let files = drain(pair).await.unwrap();
		assert_eq!(files.len(), 1);
		assert_eq!(files[0].name, "README.md");
	}

	#[tokio::test]
	async fn test_error_propagates_and_terminates() {
		let fetcher = Arc::new(FixedFetcher {
			pages: Mutex::new(vec![Err(RemoteErrorKind::Status {
				code: 500,
				message: "boom".into(),
			})]),
		});
		let pair = spawn_listing(fetcher, "root".into(), PagerOptions::default());
		let result = drain(pair).await;
		assert!(matches!(result, Err(RemoteErrorKind::Status { code: 500, .. })));
	}

	#[tokio::test]
	async fn test_empty_first_page_with_nil_on_no_match() {
		let fetcher = Arc::new(FixedFetcher {
			pages: Mutex::new(vec![Ok(RemotePage { files: vec![], next_page_token: None })]),
		});
		let opts = PagerOptions { nil_on_no_match: true, ..PagerOptions::default() };
		let pair = spawn_listing(fetcher, "root".into(), opts);
		let files = drain(pair).await.unwrap();
		assert!(files.is_empty());
	}
}

// vim: ts=4
