//! File-growth monitoring.
//!
//! A [`ProgressMonitor`] polls the size of a local file while something else
//! (a download, a dump subprocess) is writing it. When the size stops changing
//! for `stability_threshold` consecutive polls the monitor assumes the writer
//! is done and returns. That is a heuristic for the log only; nothing may treat
//! it as proof that the transfer succeeded.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument, Span};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 10;

/// One observation of how far a transfer has come.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub path: PathBuf,
    pub transferred: u64,
    /// `None` when the final size is not known up front (database dumps).
    pub total: Option<u64>,
    pub at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(path: impl Into<PathBuf>, transferred: u64, total: Option<u64>) -> Self {
        Self {
            path: path.into(),
            transferred,
            total,
            at: Utc::now(),
        }
    }

    /// Percentage of `total`, if known. An empty total counts as complete.
    pub fn percent(&self) -> Option<f64> {
        self.total.map(|t| {
            if t == 0 {
                100.0
            } else {
                self.transferred as f64 / t as f64 * 100.0
            }
        })
    }
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = display_name(&self.path);
        match (self.total, self.percent()) {
            (Some(total), Some(pct)) => write!(
                f,
                "{} | {} of {} bytes ({:.2}%)",
                name, self.transferred, total, pct
            ),
            _ => write!(f, "{} | {} bytes", name, self.transferred),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Polls a file's size until it stops growing.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    path: PathBuf,
    poll_interval: Duration,
    stability_threshold: u32,
    expected_total: Option<u64>,
}

impl ProgressMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            expected_total: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consecutive unchanged polls before the file counts as finished (min 1).
    pub fn stability_threshold(mut self, polls: u32) -> Self {
        self.stability_threshold = polls.max(1);
        self
    }

    pub fn expected_total(mut self, total: Option<u64>) -> Self {
        self.expected_total = total;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll until the size has been stable long enough; returns the final size.
    ///
    /// A path that does not exist yet is waited on without complaint, so this
    /// never returns for a file that never appears or never settles.
    pub async fn run(self) -> u64 {
        let mut last_size = 0u64;
        let mut stable_polls = 0u32;

        loop {
            if let Ok(meta) = tokio::fs::metadata(&self.path).await {
                let size = meta.len();
                if size == last_size {
                    stable_polls += 1;
                    debug!(
                        path = %self.path.display(),
                        size,
                        stable_polls,
                        "size unchanged"
                    );
                    if stable_polls >= self.stability_threshold {
                        info!(
                            "Assuming {} finished. Final size {} bytes",
                            display_name(&self.path),
                            size
                        );
                        return size;
                    }
                } else {
                    stable_polls = 0;
                    let record = ProgressRecord::new(&self.path, size, self.expected_total);
                    info!("{}", record);
                }
                last_size = size;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run in the background until the file settles or `token` is cancelled.
    ///
    /// The handle may be dropped; the task never blocks its parent.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        let span = Span::current();
        tokio::spawn(
            async move {
                let path = self.path.clone();
                tokio::select! {
                    _ = self.run() => {}
                    _ = token.cancelled() => {
                        debug!(path = %path.display(), "progress monitor stopped");
                    }
                }
            }
            .instrument(span),
        )
    }
}
