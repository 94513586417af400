//! # Backup Manager
//!
//! Runs a full website backup: archive the site on the server over SSH,
//! download the archive over FTPS, then dump the database locally. Every step
//! is optional; a missing component is logged and skipped.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use sitebak_core::StepOutcome;
use sitebak_ftp::FtpDownloader;
use sitebak_mysql::{DatabaseDumper, MysqlDumper};
use sitebak_ssh::RemoteArchiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::BackupConfig;

/// What happened to each step of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub archive: StepOutcome,
    pub download: StepOutcome,
    pub dump: StepOutcome,
    /// Set when the run was cut short by a panic in the step composition.
    pub aborted: Option<String>,
}

impl BackupReport {
    fn new() -> Self {
        // A step that never ran before an abort stays `Interrupted`.
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            archive: StepOutcome::Interrupted,
            download: StepOutcome::Interrupted,
            dump: StepOutcome::Interrupted,
            aborted: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn steps(&self) -> [(&'static str, &StepOutcome); 3] {
        [
            ("archive", &self.archive),
            ("download", &self.download),
            ("dump", &self.dump),
        ]
    }

    /// No step failed or was interrupted.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.steps().iter().all(|(_, o)| !o.is_failure())
    }
}

/// Owns the optional step components and the run's shutdown token.
pub struct BackupManager {
    downloader: Option<FtpDownloader>,
    archiver: Option<RemoteArchiver>,
    dumper: Option<Box<dyn DatabaseDumper>>,
    shutdown: CancellationToken,
    span: Span,
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl BackupManager {
    /// An empty manager; every step is skipped until a component is added.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            downloader: None,
            archiver: None,
            dumper: None,
            shutdown,
            span: info_span!("backup"),
        }
    }

    /// Build every component named in `config`, all sharing `shutdown`.
    pub fn from_config(config: BackupConfig, shutdown: CancellationToken) -> Self {
        let mut manager = Self::new(shutdown);
        if let Some(ftp) = config.ftp {
            manager = manager.with_downloader(FtpDownloader::new(ftp));
        }
        if let Some(ssh) = config.ssh {
            manager = manager.with_archiver(RemoteArchiver::new(ssh));
        }
        if let Some(db) = config.database {
            let dumper = MysqlDumper::new(db).with_shutdown(manager.shutdown.clone());
            manager = manager.with_dumper(Box::new(dumper));
        }
        manager
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_downloader(mut self, downloader: FtpDownloader) -> Self {
        self.downloader = Some(downloader.with_shutdown(self.shutdown.clone()));
        self
    }

    pub fn with_archiver(mut self, archiver: RemoteArchiver) -> Self {
        self.archiver = Some(archiver.with_shutdown(self.shutdown.clone()));
        self
    }

    /// The dumper carries its own token; build it with
    /// [`shutdown`](Self::shutdown) so Ctrl-C reaches the dump too.
    pub fn with_dumper(mut self, dumper: Box<dyn DatabaseDumper>) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn dumper(&self) -> Option<&dyn DatabaseDumper> {
        self.dumper.as_deref()
    }

    /// Archive `site_dir`, download the archive, dump the database.
    ///
    /// The archive is named `archive_name`, or the lower-cased `site_dir`, and
    /// the download fetches `<that name>.tar.gz`. `database` names the local
    /// `.sql` file. A failing step does not stop the later ones; an interrupt
    /// does.
    pub async fn full_backup(
        &mut self,
        site_dir: &str,
        database: &str,
        archive_name: Option<&str>,
    ) -> BackupReport {
        let mut report = BackupReport::new();
        let span = info_span!(parent: &self.span, "full_backup", run_id = %report.run_id);
        let started = Instant::now();

        async {
            info!("**** Full backup process started ****");

            let composed = AssertUnwindSafe(self.run_steps(
                &mut report,
                site_dir,
                database,
                archive_name,
            ))
            .catch_unwind()
            .await;

            if let Err(panic) = composed {
                let reason = panic_message(panic.as_ref());
                error!("Backup interrupted with this error: {}", reason);
                report.aborted = Some(reason);
            }

            report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(
                archive = %report.archive,
                download = %report.download,
                dump = %report.dump,
                "**** Backup completed in {} ****",
                format_elapsed(report.elapsed())
            );
        }
        .instrument(span)
        .await;

        report
    }

    async fn run_steps(
        &mut self,
        report: &mut BackupReport,
        site_dir: &str,
        database: &str,
        archive_name: Option<&str>,
    ) {
        let archive_name = archive_name
            .map(str::to_string)
            .unwrap_or_else(|| site_dir.to_lowercase());

        report.archive = self.create_remote_archive(site_dir, Some(&archive_name)).await;
        report.download = self.download_website_archive(&archive_name).await;
        report.dump = self.dump_database(database).await;
    }

    /// Archive `<remote base>/<remote_dir>` on the server.
    pub async fn create_remote_archive(
        &mut self,
        remote_dir: &str,
        archive_name: Option<&str>,
    ) -> StepOutcome {
        let Some(archiver) = self.archiver.as_mut() else {
            info!("No SSH archiver configured. Skipping remote archiving.");
            return StepOutcome::Skipped;
        };
        if interrupted(&self.shutdown, "remote archiving") {
            return StepOutcome::Interrupted;
        }
        info!("Creating archive for {}...", remote_dir);
        archiver.make_archive(remote_dir, archive_name).await
    }

    /// Download `<archive_name>.tar.gz` from the FTP base directory.
    pub async fn download_website_archive(&mut self, archive_name: &str) -> StepOutcome {
        self.download_from_ftp(&format!("{}.tar.gz", archive_name))
            .await
    }

    /// Download a file or directory tree relative to the FTP base directory.
    pub async fn download_from_ftp(&mut self, remote_path: &str) -> StepOutcome {
        let Some(downloader) = self.downloader.as_mut() else {
            info!("No FTP downloader configured. Skipping FTP download.");
            return StepOutcome::Skipped;
        };
        if interrupted(&self.shutdown, "FTP download") {
            return StepOutcome::Interrupted;
        }
        info!("Starting FTP download for: {}", remote_path);
        downloader.download(remote_path).await
    }

    /// Dump the configured database into `<local base>/<dump_name>.sql`.
    pub async fn dump_database(&self, dump_name: &str) -> StepOutcome {
        let Some(dumper) = self.dumper.as_deref() else {
            info!("No database dumper configured. Skipping database dump.");
            return StepOutcome::Skipped;
        };
        if interrupted(&self.shutdown, "database dump") {
            return StepOutcome::Interrupted;
        }
        info!("Initiating database dump: {}", dump_name);
        // Dropping the dump future kills the child process.
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                error!("Database dump process interrupted by user.");
                StepOutcome::Interrupted
            }
            outcome = dumper.dump(Some(dump_name)) => outcome,
        }
    }
}

fn interrupted(shutdown: &CancellationToken, step: &str) -> bool {
    if shutdown.is_cancelled() {
        warn!("Backup interrupted. Not starting {}.", step);
        true
    } else {
        false
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `H:MM:SS` with milliseconds once under a minute.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if secs < 60 {
        format!("{}:{:02}:{:02}.{:03}", h, m, s, elapsed.subsec_millis())
    } else {
        format!("{}:{:02}:{:02}", h, m, s)
    }
}
