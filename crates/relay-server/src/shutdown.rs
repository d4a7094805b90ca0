//! Shutdown for one relay instance.
//!
//! The coordinator owns the instance's background tasks (the listener and
//! the store purger) and counts open event streams. On shutdown every
//! stream sends `reconnect` and ends, so browsers move to another instance.
//! Tasks still running when the grace period lapses are aborted.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period when the caller gives none.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct StreamCount {
    open: AtomicUsize,
    idle: Notify,
}

/// Held by an open event stream. Dropping it marks the stream closed.
#[derive(Debug)]
pub struct StreamLease {
    count: Arc<StreamCount>,
    token: CancellationToken,
}

impl StreamLease {
    /// Resolves once shutdown starts.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if self.count.open.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.count.idle.notify_waiters();
        }
    }
}

/// What a shutdown left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Event streams open when shutdown began.
    pub streams_at_start: usize,
    /// Streams still open when the grace period ran out.
    pub streams_left: usize,
    /// Tasks that finished in time.
    pub tasks_finished: usize,
    /// Tasks aborted after the grace period, by name.
    pub tasks_aborted: Vec<&'static str>,
}

impl ShutdownReport {
    /// Everything stopped within the grace period.
    pub fn is_clean(&self) -> bool {
        self.streams_left == 0 && self.tasks_aborted.is_empty()
    }
}

/// Shutdown signal, stream accounting and background tasks for one instance.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    streams: Arc<StreamCount>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            streams: Arc::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register an event stream for the lifetime of the returned lease.
    pub fn open_stream(&self) -> StreamLease {
        let _ = self.streams.open.fetch_add(1, Ordering::AcqRel);
        StreamLease {
            count: Arc::clone(&self.streams),
            token: self.token.clone(),
        }
    }

    /// Event streams currently open on this instance.
    pub fn open_streams(&self) -> usize {
        self.streams.open.load(Ordering::Acquire)
    }

    /// Spawn a background task that shutdown waits for. `task` receives the
    /// shutdown token and should return once it is cancelled.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token.clone()));
        debug!(task = name, "background task started");
        self.tasks.lock().push((name, handle));
    }

    /// Cancel the token, then wait up to `grace` for registered tasks and
    /// open streams. Tasks still running afterwards are aborted.
    pub async fn graceful_shutdown(&self, grace: Option<Duration>) -> ShutdownReport {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        let deadline = Instant::now() + grace;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = ShutdownReport {
            streams_at_start: self.open_streams(),
            ..ShutdownReport::default()
        };

        self.shutdown();
        info!(
            tasks = tasks.len(),
            open_streams = report.streams_at_start,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "shutting down"
        );

        for (name, mut handle) in tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                report.tasks_finished += 1;
            } else {
                handle.abort();
                report.tasks_aborted.push(name);
            }
        }
        let _ = tokio::time::timeout_at(deadline, self.streams_closed()).await;
        report.streams_left = self.open_streams();

        if report.is_clean() {
            info!(tasks = report.tasks_finished, "shutdown complete");
        } else {
            warn!(
                aborted = ?report.tasks_aborted,
                streams_left = report.streams_left,
                "grace period elapsed before everything stopped"
            );
        }
        report
    }

    async fn streams_closed(&self) {
        loop {
            let idle = self.streams.idle.notified();
            if self.open_streams() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
