//! Execution Scheduler (C9): bounded-parallelism dispatch of a resolved plan.
//!
//! A dispatcher sorts the plan by `Operation` precedence, then streams jobs
//! into a bounded worker pool under a rate limiter. Each job is retried with
//! exponential backoff, bounded by `Config::retry_limit`, when its error is
//! classified retryable.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use crate::config::Config;
use crate::error::{RemoteErrorKind, SyncError};
use crate::types::Change;

/// One unit of billable progress: bytes moved by a single completed job.
pub type ProgressSender = mpsc::Sender<u64>;

/// Executes one `Change`. Implemented by the Upsert/Download Executors;
/// this trait is the seam the scheduler dispatches through.
pub trait JobRunner: Send + Sync {
	fn run<'a>(&'a self, change: &'a Change) -> Pin<Box<dyn Future<Output = Result<u64, RemoteErrorKind>> + Send + 'a>>;
}

#[derive(Debug)]
pub struct ScheduleOutcome {
	pub completed: Vec<Change>,
	pub failed: Vec<(Change, SyncError)>,
	/// Set when a cancellation request cut dispatch short; remaining plan
	/// entries are in neither `completed` nor `failed`.
	pub cancelled: bool,
}

/// Cooperative cancellation flag for one `execute` call. Owned by the
/// caller (one per invocation, not a process-wide singleton) and shared
/// with whatever installs a signal handler via a clone of the `Arc`.
/// Checked before each job is dispatched; jobs already in flight are
/// allowed to finish.
pub type CancelToken = Arc<AtomicBool>;

pub fn new_cancel_token() -> CancelToken {
	Arc::new(AtomicBool::new(false))
}

fn backoff_delay(attempt: u32) -> Duration {
	let capped = attempt.min(10);
	Duration::from_millis(100u64.saturating_mul(1u64 << capped))
}

async fn run_with_retry(runner: Arc<dyn JobRunner>, change: Change, retry_limit: u32) -> (Change, Result<u64, SyncError>) {
	let mut attempt = 0u32;
	loop {
		match runner.run(&change).await {
			Ok(bytes) => return (change, Ok(bytes)),
			Err(e) => {
				if attempt >= retry_limit || !e.is_retryable() {
					return (change, Err(SyncError::RemoteLookupFailed { path: change.path.clone(), message: e.message().to_string() }));
				}
				tokio::time::sleep(backoff_delay(attempt)).await;
				attempt += 1;
			}
		}
	}
}

/// Sort by `Operation` precedence (see `types::Operation`'s `Ord` impl),
/// stable so same-precedence jobs keep their resolver-discovery order.
fn sort_by_precedence(plan: &mut [Change]) {
	plan.sort_by(|a, b| a.operation.cmp(&b.operation));
}

/// Dispatch `plan` onto a bounded worker pool of `cfg`'s resolved worker
/// count, one dequeue every `1e9 / N` ns, retrying per `cfg.retry_limit`.
/// Progress (bytes per completed job) is posted onto `progress` if given.
/// `cancel` is checked before each dispatch; pass `&new_cancel_token()` if
/// the caller has no external cancellation source.
pub async fn execute(
	mut plan: Vec<Change>,
	runner: Arc<dyn JobRunner>,
	cfg: &Config,
	progress: Option<ProgressSender>,
	cancel: &CancelToken,
) -> ScheduleOutcome {
	sort_by_precedence(&mut plan);

	let worker_count = crate::config::resolved_worker_count(cfg).max(1);
	let semaphore = Arc::new(Semaphore::new(worker_count));
	let period = Duration::from_nanos(1_000_000_000 / worker_count as u64);

	let mut handles = Vec::with_capacity(plan.len());
	let mut cancelled = false;

	// Idle-liveness ticks: a consumer watching only the progress channel
	// would otherwise see no traffic during a run of metadata-only (no
	// body) changes and might mistake that for a stall.
	let heartbeat = progress.clone().map(|tx| {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(2));
			tick.tick().await; // first tick fires immediately; skip it
			loop {
				tick.tick().await;
				if tx.send(0).await.is_err() {
					break;
				}
			}
		})
	});

	for change in plan {
		if cancel.load(Ordering::SeqCst) {
			cancelled = true;
			break;
		}

		let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
		let runner = runner.clone();
		let retry_limit = cfg.retry_limit;
		let progress = progress.clone();

		let handle = tokio::spawn(async move {
			let (change, result) = run_with_retry(runner, change, retry_limit).await;
			if let (Ok(bytes), Some(tx)) = (&result, progress) {
				let _ = tx.send(*bytes).await;
			}
			drop(permit);
			(change, result)
		});
		handles.push(handle);

		tokio::time::sleep(period).await;
	}

	let mut completed = Vec::new();
	let mut failed = Vec::new();
	for handle in handles {
		match handle.await {
			Ok((change, Ok(_))) => completed.push(change),
			Ok((change, Err(e))) => failed.push((change, e)),
			Err(join_err) => {
				tracing::error!(error = %join_err, "scheduler worker task panicked");
			}
		}
	}

	if let Some(h) = heartbeat {
		h.abort();
	}

	ScheduleOutcome { completed, failed, cancelled }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::Operation;
	use std::sync::atomic::AtomicU32;

	struct CountingRunner {
		calls: AtomicU32,
		fail_until: u32,
	}

	impl JobRunner for CountingRunner {
		fn run<'a>(&'a self, _change: &'a Change) -> Pin<Box<dyn Future<Output = Result<u64, RemoteErrorKind>> + Send + 'a>> {
			Box::pin(async move {
				let n = self.calls.fetch_add(1, Ordering::SeqCst);
				if n < self.fail_until {
					Err(RemoteErrorKind::Status { code: 503, message: "busy".into() })
				} else {
					Ok(42)
				}
			})
		}
	}

	struct AlwaysNotFound;

	impl JobRunner for AlwaysNotFound {
		fn run<'a>(&'a self, _change: &'a Change) -> Pin<Box<dyn Future<Output = Result<u64, RemoteErrorKind>> + Send + 'a>> {
			Box::pin(async move { Err(RemoteErrorKind::Status { code: 404, message: "gone".into() }) })
		}
	}

	fn change_with_op(path: &str, op: Operation) -> Change {
		let mut c = Change::new(path, "");
		c.operation = op;
		c
	}

	#[test]
	fn test_sort_by_precedence_orders_delete_before_add() {
		let mut plan = vec![change_with_op("b", Operation::Add), change_with_op("a", Operation::Delete)];
		sort_by_precedence(&mut plan);
		assert_eq!(plan[0].path, "a");
		assert_eq!(plan[1].path, "b");
	}

	#[tokio::test]
	async fn test_execute_retries_until_success() {
		let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail_until: 2 });
		let cfg = Config { retry_limit: 5, ..Config::default() };
		let plan = vec![change_with_op("f", Operation::Add)];
		let outcome = execute(plan, runner, &cfg, None, &new_cancel_token()).await;
		assert_eq!(outcome.completed.len(), 1);
		assert!(outcome.failed.is_empty());
	}

	#[tokio::test]
	async fn test_execute_gives_up_on_non_retryable_error() {
		let runner = Arc::new(AlwaysNotFound);
		let cfg = Config { retry_limit: 5, ..Config::default() };
		let plan = vec![change_with_op("f", Operation::Add)];
		let outcome = execute(plan, runner, &cfg, None, &new_cancel_token()).await;
		assert!(outcome.completed.is_empty());
		assert_eq!(outcome.failed.len(), 1);
	}

	#[tokio::test]
	async fn test_execute_reports_progress_bytes() {
		let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail_until: 0 });
		let cfg = Config::default();
		let plan = vec![change_with_op("f", Operation::Add)];
		let (tx, mut rx) = mpsc::channel(4);
		let outcome = execute(plan, runner, &cfg, Some(tx), &new_cancel_token()).await;
		assert_eq!(outcome.completed.len(), 1);
		assert_eq!(rx.recv().await, Some(42));
	}

	#[tokio::test]
	async fn test_execute_honors_cancellation_before_dispatch() {
		let cancel = new_cancel_token();
		cancel.store(true, Ordering::SeqCst);
		let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail_until: 0 });
		let cfg = Config::default();
		let plan = vec![change_with_op("f", Operation::Add)];
		let outcome = execute(plan, runner, &cfg, None, &cancel).await;
		assert!(outcome.cancelled);
		assert!(outcome.completed.is_empty());
	}

	#[tokio::test]
	async fn test_execute_cancellation_does_not_affect_other_calls() {
		// Regression: cancellation used to be a process-wide static, which
		// made this test and `test_execute_retries_until_success` order-
		// dependent under parallel `cargo test` execution.
		let cancel_a = new_cancel_token();
		cancel_a.store(true, Ordering::SeqCst);
		let cancel_b = new_cancel_token();

		let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail_until: 0 });
		let cfg = Config::default();

		let outcome_a = execute(vec![change_with_op("a", Operation::Add)], runner.clone(), &cfg, None, &cancel_a).await;
		let outcome_b = execute(vec![change_with_op("b", Operation::Add)], runner, &cfg, None, &cancel_b).await;

		assert!(outcome_a.cancelled);
		assert!(!outcome_b.cancelled);
		assert_eq!(outcome_b.completed.len(), 1);
	}

	#[test]
	fn test_backoff_grows_and_caps() {
		assert!(backoff_delay(0) < backoff_delay(1));
		assert_eq!(backoff_delay(10), backoff_delay(20));
	}
}

// vim: ts=4
