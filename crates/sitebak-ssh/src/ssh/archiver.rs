//! Remote `tar.gz` creation over SSH.

use crate::ssh::error::{SshError, SshResult};
use crate::ssh::session::ShellSession;
use crate::ssh::types::SshConnectionConfig;
use shell_escape::unix::escape;
use sitebak_core::{remote_join, StepOutcome};
use std::borrow::Cow;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Span};

pub struct RemoteArchiver {
    shell: ShellSession,
    shutdown: CancellationToken,
    span: Span,
}

impl RemoteArchiver {
    pub fn new(config: SshConnectionConfig) -> Self {
        let span = info_span!("ssh", host = %config.host);
        Self {
            shell: ShellSession::new(config),
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

    pub fn shell(&self) -> &ShellSession {
        &self.shell
    }

    fn base_path(&self) -> &str {
        &self.shell.config().remote_base_path
    }

    /// Remote path of the archive called `archive_name`.
    pub fn archive_path(&self, archive_name: &str) -> String {
        remote_join(self.base_path(), &format!("{}.tar.gz", archive_name))
    }

    /// Fail unless `ls <path>` succeeds on the server.
    pub async fn validate_directory(&self, path: &str) -> SshResult<()> {
        let output = self.shell.execute(&format!("ls {}", escape(Cow::from(path)))).await?;
        if !output.success() {
            return Err(SshError::RemoteDirectoryNotFound {
                path: path.to_string(),
                stderr: output.stderr.trim_end().to_string(),
            });
        }
        Ok(())
    }

    /// Archive the contents of `path` into `<base>/<archive_name>.tar.gz`.
    ///
    /// Unreadable files and files changing during the run are tolerated.
    pub async fn create_archive(&self, path: &str, archive_name: &str) -> SshResult<String> {
        self.validate_directory(path).await?;

        let archive_path = self.archive_path(archive_name);
        info!("Creating archive: {}...", archive_path);
        let output = self.shell.execute(&tar_command(&archive_path, path)).await?;
        if !output.success() {
            return Err(SshError::ArchiveCreation(output.stderr.trim_end().to_string()));
        }

        info!(
            "Archive {}.tar.gz created successfully at {}.",
            archive_name, archive_path
        );
        Ok(archive_path)
    }

    /// Connect, archive `<base>/<remote_dir_name>`, and always disconnect.
    ///
    /// The archive name defaults to the lower-cased directory name.
    pub async fn make_archive(
        &mut self,
        remote_dir_name: &str,
        archive_name: Option<&str>,
    ) -> StepOutcome {
        let span = self.span.clone();
        async move {
            let remote_path = remote_join(self.base_path(), remote_dir_name);
            let archive_name = archive_name
                .map(str::to_string)
                .unwrap_or_else(|| remote_dir_name.to_lowercase());
            let shutdown = self.shutdown.clone();

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                res = self.connect_and_archive(&remote_path, &archive_name) => Some(res),
            };
            match result {
                // A still-running `tar` holds the session; don't wait for it.
                None => self.shell.abort(),
                Some(_) => self.shell.disconnect().await,
            }

            match result {
                Some(Ok(_)) => StepOutcome::Completed,
                Some(Err(e)) => {
                    error!("An error occurred: {}", e);
                    StepOutcome::failed(e)
                }
                None => {
                    error!("Archiving {} was interrupted by user.", remote_path);
                    StepOutcome::Interrupted
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn connect_and_archive(&mut self, path: &str, archive_name: &str) -> SshResult<String> {
        self.shell.connect().await?;
        self.create_archive(path, archive_name).await
    }
}

/// `tar` invocation writing `archive_path` from the contents of `dir`.
pub fn tar_command(archive_path: &str, dir: &str) -> String {
    format!(
        "tar -czf {} -C {} . --ignore-failed-read --warning=no-file-changed",
        escape(Cow::from(archive_path)),
        escape(Cow::from(dir))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tracing_test::traced_test;

    fn archiver(base: &str, port: u16) -> RemoteArchiver {
        let mut config =
            SshConnectionConfig::new("127.0.0.1", "deploy", SecretString::new("pw".into()));
        config.remote_base_path = base.into();
        config.port = port;
        config.connect_timeout_sec = 2;
        RemoteArchiver::new(config)
    }

    fn closed_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn tar_command_is_escaped() {
        assert_eq!(
            tar_command("/var/www/mysite.tar.gz", "/var/www/MySite"),
            "tar -czf /var/www/mysite.tar.gz -C /var/www/MySite . --ignore-failed-read --warning=no-file-changed"
        );
        assert_eq!(
            tar_command("/srv/a b.tar.gz", "/srv/x;rm -rf ~"),
            "tar -czf '/srv/a b.tar.gz' -C '/srv/x;rm -rf ~' . --ignore-failed-read --warning=no-file-changed"
        );
    }

    #[test]
    fn archive_lands_in_the_base_path() {
        assert_eq!(archiver("/var/www", 22).archive_path("site"), "/var/www/site.tar.gz");
        assert_eq!(archiver("/var/www/", 22).archive_path("site"), "/var/www/site.tar.gz");
    }

    #[tokio::test]
    async fn validate_needs_a_connection() {
        let a = archiver("/var/www", 22);
        assert!(matches!(
            a.validate_directory("/var/www/site").await,
            Err(SshError::NotConnected)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_host_fails_and_disconnects() {
        let mut a = archiver("/var/www", closed_port());
        let outcome = a.make_archive("MySite", None).await;
        assert!(matches!(outcome, StepOutcome::Failed(_)));
        assert!(!a.shell().is_connected());
        assert!(logs_contain("No active SSH connection to close."));
    }

    #[tokio::test]
    #[traced_test]
    async fn cancelled_archive_is_interrupted() {
        let token = CancellationToken::new();
        token.cancel();
        let mut a = archiver("/var/www", closed_port()).with_shutdown(token);
        assert_eq!(a.make_archive("MySite", None).await, StepOutcome::Interrupted);
        assert!(logs_contain("interrupted by user"));
    }

    #[tokio::test]
    #[traced_test]
    async fn interrupt_tears_down_a_stalled_connection() {
        // Never answers, so the blocking handshake would wait forever.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            // Returns once the client side shuts the socket.
            while tokio::io::AsyncReadExt::read(&mut sock, &mut buf).await.unwrap_or(0) > 0 {}
        });

        let token = CancellationToken::new();
        let mut a = archiver("/var/www", port).with_shutdown(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            token.cancel();
        });

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            a.make_archive("MySite", None),
        )
        .await
        .expect("interrupt should not wait for the blocked handshake");
        assert_eq!(outcome, StepOutcome::Interrupted);
        assert!(logs_contain("SSH connection attempt aborted."));

        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("socket should be shut down")
            .unwrap();
        canceller.await.unwrap();
    }
}
