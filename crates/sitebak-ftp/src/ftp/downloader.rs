//! Download session: one control connection, a keep-alive task, retried
//! file transfers with size verification, and recursive mirroring.
//!
//! The client sits behind `Arc<Mutex<_>>` so the keep-alive task can share
//! the control channel. It only ever uses `try_lock`, so a NOOP never lands
//! in the middle of a command exchange; a busy tick is simply skipped.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpConnectionConfig;
use sitebak_core::{ensure_dir, remote_basename, remote_join, RetryPolicy, StepOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

pub struct FtpDownloader {
    config: FtpConnectionConfig,
    client: Option<Arc<Mutex<FtpClient>>>,
    keepalive: Option<CancellationToken>,
    shutdown: CancellationToken,
    span: Span,
}

impl FtpDownloader {
    pub fn new(config: FtpConnectionConfig) -> Self {
        let span = info_span!("ftp", host = %config.host);
        Self {
            config,
            client: None,
            keepalive: None,
            shutdown: CancellationToken::new(),
            span,
        }
    }

    /// Log under `span` instead of the default `ftp{host}` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Abort [`download`](Self::download) when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn transfer_policy(&self, max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, self.config.retry_delay())
    }

    fn connected_client(&self) -> FtpResult<Arc<Mutex<FtpClient>>> {
        self.client.clone().ok_or_else(FtpError::not_connected)
    }

    // ─── Connection ─────────────────────────────────────────────

    /// Open and log in, retrying the whole handshake, then start the
    /// keep-alive. A no-op when already connected.
    pub async fn connect(&mut self) -> FtpResult<()> {
        if self.client.is_some() {
            debug!("FTP connection already open");
            return Ok(());
        }

        let config = &self.config;
        info!("Connecting to FTP host {}...", config.host);
        let policy = RetryPolicy::new(config.connect_attempts, config.retry_delay());
        let client = policy
            .run(|| FtpClient::connect(config))
            .await
            .map_err(|e| {
                let cause = e.into_inner();
                let err = FtpError::connection_failed(format!(
                    "Connection to FTP host {} failed: {}",
                    config.host, cause
                ));
                match cause.code {
                    Some(code) => err.with_code(code),
                    None => err,
                }
            })?;

        info!(
            secure = client.is_secure(),
            "Connected to FTP host {}", config.host
        );
        let client = Arc::new(Mutex::new(client));
        self.start_keepalive(client.clone());
        self.client = Some(client);
        Ok(())
    }

    fn start_keepalive(&mut self, client: Arc<Mutex<FtpClient>>) {
        let period = Duration::from_secs(self.config.keepalive_interval_sec);
        if period.is_zero() {
            return;
        }
        let token = CancellationToken::new();
        let stop = token.clone();
        let reply_timeout = self.config.data_timeout();

        tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            let Ok(mut guard) = client.try_lock() else {
                                debug!("Control channel busy, skipping keep-alive");
                                continue;
                            };
                            match timeout(reply_timeout, guard.noop()).await {
                                Ok(Ok(())) => debug!("Keep-alive NOOP sent"),
                                Ok(Err(e)) => {
                                    warn!("Keep-alive failed, stopping: {}", e);
                                    break;
                                }
                                Err(_) => {
                                    // The NOOP reply may still arrive later.
                                    guard.invalidate();
                                    warn!("Keep-alive timed out, stopping");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(self.span.clone()),
        );
        self.keepalive = Some(token);
    }

    /// Stop the keep-alive and send QUIT. Never fails; safe to call twice.
    pub async fn disconnect(&mut self) {
        if let Some(token) = self.keepalive.take() {
            token.cancel();
        }
        match self.client.take() {
            Some(client) => {
                info!("Disconnecting from FTP host {}...", self.config.host);
                let mut guard = client.lock().await;
                match guard.quit().await {
                    Ok(()) => info!("Disconnected from FTP host {}", self.config.host),
                    Err(e) => error!(
                        "Error disconnecting from FTP host {}: {}",
                        self.config.host, e
                    ),
                }
            }
            None => info!("No active FTP connection to close."),
        }
    }

    // ─── Classification ──────────────────────────────────────────

    /// Whether `path` can be entered. Any failure, including not being
    /// connected, reads as "not a directory". The answer can be stale by the
    /// time the caller acts on it.
    pub async fn is_directory(&self, path: &str) -> bool {
        let Ok(client) = self.connected_client() else {
            return false;
        };
        let mut guard = client.lock().await;
        let Ok(current) = guard.pwd().await else {
            return false;
        };
        guard.cwd(path).await.is_ok() && guard.cwd(&current).await.is_ok()
    }

    // ─── Files ───────────────────────────────────────────────────

    /// Fetch one file with up to `max_retries` attempts, then check that the
    /// local size matches the remote SIZE. A mismatch is not retried and the
    /// downloaded file is left in place.
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        max_retries: u32,
    ) -> FtpResult<u64> {
        let result = self.fetch_verified(remote_path, local_path, max_retries).await;
        if let Err(ref e) = result {
            error!("Unable to download file {}: {}", remote_path, e);
        }
        result
    }

    async fn fetch_verified(
        &self,
        remote_path: &str,
        local_path: &Path,
        max_retries: u32,
    ) -> FtpResult<u64> {
        let client = self.connected_client()?;
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await?;
        }

        info!("Downloading {} to {}", remote_path, local_path.display());
        let config = &self.config;
        let written = self
            .transfer_policy(max_retries)
            .run(|| {
                let client = client.clone();
                async move {
                    let mut guard = client.lock().await;
                    if !guard.is_in_sync() {
                        warn!("Control channel out of step, reconnecting to {}", config.host);
                        *guard = FtpClient::connect(config).await?;
                    }
                    guard.retrieve_file(remote_path, local_path).await
                }
            })
            .await?;

        let remote_size = client.lock().await.size(remote_path).await?;
        let local_size = tokio::fs::metadata(local_path).await?.len();
        if remote_size != local_size {
            return Err(FtpError::size_mismatch(remote_path, remote_size, local_size));
        }

        info!(
            bytes = written,
            "Downloaded {} ({} bytes, size verified)", remote_path, local_size
        );
        Ok(local_size)
    }

    // ─── Directories ─────────────────────────────────────────────

    /// Mirror `remote_dir` into `local_dir`, depth first.
    ///
    /// File failures are logged and skipped. Listing or navigation errors
    /// abort the subtree. The remote working directory is restored on success.
    pub async fn download_directory(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        max_retries: u32,
    ) -> FtpResult<()> {
        ensure_dir(local_dir).await?;
        let client = self.connected_client()?;

        let (previous, entries) = {
            let mut guard = client.lock().await;
            let previous = guard.pwd().await?;
            guard.cwd(remote_dir).await?;
            (previous, guard.nlst(None).await?)
        };

        for entry in entries.iter().filter(|e| !matches!(e.as_str(), "." | "..")) {
            let local_path = local_dir.join(remote_basename(entry));
            if self.is_directory(entry).await {
                Box::pin(self.download_directory(entry, &local_path, max_retries)).await?;
            } else {
                // Logged by download_file; the mirror carries on.
                let _ = self.download_file(entry, &local_path, max_retries).await;
            }
        }

        client.lock().await.cwd(&previous).await?;
        Ok(())
    }

    // ─── Entry point ─────────────────────────────────────────────

    /// Connect, fetch `<host base>/<remote_name>` (file or tree) into
    /// `<local base>/<basename>`, and disconnect on every path.
    pub async fn download(&mut self, remote_name: &str) -> StepOutcome {
        let span = self.span.clone();
        async move {
            let remote_path = remote_join(&self.config.host_base_path, remote_name);
            let local_path = self.config.local_base_path.join(remote_basename(remote_name));
            let shutdown = self.shutdown.clone();

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                res = self.fetch(&remote_path, &local_path) => Some(res),
            };
            self.disconnect().await;

            match result {
                Some(Ok(())) => {
                    info!(
                        "Downloading {} from FTP host {} completed successfully.",
                        remote_name, self.config.host
                    );
                    StepOutcome::Completed
                }
                Some(Err(e)) => {
                    error!(
                        "Downloading {} from FTP host {} failed: {}",
                        remote_name, self.config.host, e
                    );
                    StepOutcome::failed(e)
                }
                None => {
                    error!(
                        "Downloading {} from FTP host {} was interrupted by user.",
                        remote_name, self.config.host
                    );
                    StepOutcome::Interrupted
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<()> {
        self.connect().await?;
        let retries = self.config.max_retries;
        if self.is_directory(remote_path).await {
            self.download_directory(remote_path, local_path, retries).await
        } else {
            self.download_file(remote_path, local_path, retries).await.map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::FtpErrorKind;
    use secrecy::SecretString;
    use tracing_test::traced_test;

    fn offline() -> FtpDownloader {
        let mut config = FtpConnectionConfig::new(
            "127.0.0.1",
            "nobody",
            SecretString::new("nothing".into()),
        );
        config.keepalive_interval_sec = 0;
        FtpDownloader::new(config)
    }

    #[tokio::test]
    #[traced_test]
    async fn disconnect_without_connection_is_a_logged_no_op() {
        let mut ftp = offline();
        ftp.disconnect().await;
        ftp.disconnect().await;
        assert!(!ftp.is_connected());
        assert!(logs_contain("No active FTP connection to close."));
    }

    #[tokio::test]
    async fn operations_need_a_connection() {
        let ftp = offline();
        let dir = tempfile::tempdir().unwrap();
        let err = ftp
            .download_file("/x", &dir.path().join("x"), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::NotConnected);
        assert!(!ftp.is_directory("/").await);
    }

    #[tokio::test]
    async fn cancelled_download_is_interrupted() {
        let token = CancellationToken::new();
        token.cancel();
        let mut ftp = offline().with_shutdown(token);
        assert_eq!(ftp.download("site.tar.gz").await, StepOutcome::Interrupted);
        assert!(!ftp.is_connected());
    }
}
