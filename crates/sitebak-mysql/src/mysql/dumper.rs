//! The dump template shared by every backend, and its MySQL implementation.
//!
//! Backends only say how to build their commands. Spawning, streaming to
//! disk, progress reporting, interruption and logging live in the trait's
//! default methods.

use crate::mysql::error::{DbError, DbResult};
use crate::mysql::status::sum_data_length;
use crate::mysql::types::MysqlConnectionConfig;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sitebak_core::{ensure_dir, ProgressMonitor, RetryPolicy, StepOutcome};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Write buffer in front of the dump file (16 MiB).
pub const DUMP_BUFFER: usize = 16 * 1024 * 1024;

#[async_trait]
pub trait DatabaseDumper: Send + Sync {
    /// Backend name used in log lines, e.g. `MySQL`.
    fn kind(&self) -> &'static str;

    fn database(&self) -> &str;

    fn local_base_path(&self) -> &Path;

    fn shutdown(&self) -> &CancellationToken;

    fn span(&self) -> &Span;

    fn estimate_before_dump(&self) -> bool {
        false
    }

    /// Full dump of the database to stdout.
    fn dump_command(&self) -> Command;

    /// Cheap command that succeeds only if the server accepts our login.
    fn check_command(&self) -> Command;

    /// Structure-only dump to stdout.
    fn schema_command(&self) -> Command;

    /// `SHOW TABLE STATUS` as tab-separated batch output.
    fn table_status_command(&self) -> Command;

    /// `<local base>/<stem>.sql`; the stem is `output_name` up to its first
    /// `.`, or the database name.
    fn dump_path(&self, output_name: Option<&str>) -> PathBuf {
        let stem = match output_name {
            Some(name) => name.split('.').next().unwrap_or(name),
            None => self.database(),
        };
        self.local_base_path().join(format!("{}.sql", stem))
    }

    /// Check that the server accepts the credentials. The one database
    /// operation whose failure is returned rather than only logged.
    async fn test_connection(&self) -> DbResult<()> {
        let (kind, db) = (self.kind(), self.database());
        info!("Testing connection to {} '{}'...", kind, db);

        match RetryPolicy::single()
            .run(|| capture(self.check_command()))
            .await
        {
            Ok(_) => {
                info!("Testing connection to {} '{}' was successful.", kind, db);
                Ok(())
            }
            Err(e) => {
                let err = DbError::Connection(format!(
                    "Connection to {} '{}' failed: {}",
                    kind,
                    db,
                    e.into_inner()
                ));
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Rough size in bytes: structure-only dump plus the data length of
    /// every table. Zero when anything goes wrong.
    async fn estimate_size(&self) -> u64 {
        match estimate(self).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Size estimate unavailable: {}", e);
                0
            }
        }
    }

    /// Dump into [`dump_path`](Self::dump_path), watching the file grow.
    async fn dump(&self, output_name: Option<&str>) -> StepOutcome {
        let span = self.span().clone();
        async move {
            let path = self.dump_path(output_name);
            let shutdown = self.shutdown().clone();

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                res = run_dump(self, &path) => Some(res),
            };

            match result {
                Some(Ok(bytes)) => {
                    info!(bytes, "Database dump completed successfully: {}", path.display());
                    StepOutcome::Completed
                }
                Some(Err(e)) => {
                    error!("{}", e);
                    StepOutcome::failed(e)
                }
                None => {
                    error!("Database dump process interrupted by user.");
                    StepOutcome::Interrupted
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn run_dump<D: DatabaseDumper + ?Sized>(dumper: &D, path: &Path) -> DbResult<u64> {
    ensure_dir(dumper.local_base_path()).await?;

    let expected = if dumper.estimate_before_dump() {
        let estimate = dumper.estimate_size().await;
        info!("Estimated database size: {} bytes", estimate);
        Some(estimate).filter(|n| *n > 0)
    } else {
        None
    };

    info!("Starting database dump to {}...", path.display());
    let monitor = dumper.shutdown().child_token();
    let _stop_monitor = monitor.clone().drop_guard();
    ProgressMonitor::new(path)
        .expected_total(expected)
        .spawn(monitor);

    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::with_capacity(DUMP_BUFFER, file);

    let mut cmd = dumper.dump_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let program = program_name(&cmd);
    let mut child = cmd.spawn().map_err(|source| DbError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(DbError::Io(std::io::Error::other(format!(
            "{} output was not captured",
            program
        ))));
    };

    let copy = async {
        let n = tokio::io::copy(&mut stdout, &mut writer).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(n)
    };
    let errors = async {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };
    let (written, stderr) = tokio::try_join!(copy, errors)?;

    let status = child.wait().await?;
    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        return Err(DbError::DumpFailed(if stderr.is_empty() {
            status.to_string()
        } else {
            stderr
        }));
    }
    Ok(written)
}

async fn estimate<D: DatabaseDumper + ?Sized>(dumper: &D) -> DbResult<u64> {
    let schema = capture(dumper.schema_command()).await?;
    let status = RetryPolicy::single()
        .run(|| capture(dumper.table_status_command()))
        .await
        .map_err(|e| e.into_inner())?;
    Ok(schema.len() as u64 + sum_data_length(&String::from_utf8_lossy(&status)))
}

/// Run to completion and return stdout; a non-zero exit is an error.
async fn capture(mut cmd: Command) -> DbResult<Vec<u8>> {
    let program = program_name(&cmd);
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| DbError::Spawn {
            program: program.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(DbError::CommandFailed {
            program,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// [`DatabaseDumper`] for MySQL / MariaDB via `mysqldump` and `mysql`.
pub struct MysqlDumper {
    config: MysqlConnectionConfig,
    shutdown: CancellationToken,
    span: Span,
}

impl MysqlDumper {
    pub fn new(config: MysqlConnectionConfig) -> Self {
        let span = info_span!("mysql", db = %config.db_name, host = %config.host);
        Self {
            config,
            shutdown: CancellationToken::new(),
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &MysqlConnectionConfig {
        &self.config
    }

    /// Login arguments shared by every tool. The password travels in
    /// `MYSQL_PWD` so it never shows up in the process list.
    fn base_command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-u")
            .arg(&self.config.username)
            .arg("-h")
            .arg(&self.config.host)
            .arg("-P")
            .arg(self.config.port.to_string())
            .env("MYSQL_PWD", self.config.password.expose_secret());
        cmd
    }
}

#[async_trait]
impl DatabaseDumper for MysqlDumper {
    fn kind(&self) -> &'static str {
        "MySQL"
    }

    fn database(&self) -> &str {
        &self.config.db_name
    }

    fn local_base_path(&self) -> &Path {
        &self.config.local_base_path
    }

    fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn estimate_before_dump(&self) -> bool {
        self.config.estimate_before_dump
    }

    fn dump_command(&self) -> Command {
        let mut cmd = self.base_command(&self.config.dump_program);
        cmd.args([
            "--single-transaction",
            "--quick",
            "--max-allowed-packet=512M",
            self.config.db_name.as_str(),
        ]);
        cmd
    }

    fn check_command(&self) -> Command {
        let mut cmd = self.base_command(&self.config.client_program);
        cmd.args(["-e", "SHOW DATABASES;"]);
        cmd
    }

    fn schema_command(&self) -> Command {
        let mut cmd = self.base_command(&self.config.dump_program);
        cmd.args(["--no-data", self.config.db_name.as_str()]);
        cmd
    }

    fn table_status_command(&self) -> Command {
        let mut cmd = self.base_command(&self.config.client_program);
        cmd.args(["-D", self.config.db_name.as_str(), "-e", "SHOW TABLE STATUS"]);
        cmd
    }
}
