//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → banner → AUTH TLS upgrade → USER/PASS →
//! PBSZ/PROT → TYPE I.
//!
//! The client exposes the command helpers used by `file_ops.rs` and the
//! downloader.

use crate::ftp::connection::{self, ControlConnection};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataStream};
use crate::ftp::types::*;
use secrecy::ExposeSecret;
use std::net::IpAddr;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A logged-in FTP control connection.
pub struct FtpClient {
    codec: FtpCodec,
    host: String,
    peer_ip: IpAddr,
    data_channel_mode: DataChannelMode,
    data_timeout: Duration,
    /// Shared by the control and data channels when the session is secured.
    tls: Option<TlsConnector>,
    /// Cleared when a reply may still be pending on the control channel.
    in_sync: bool,
}

impl FtpClient {
    /// Open the control connection and log in.
    pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<Self> {
        if config.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }

        let tls = match config.security {
            FtpSecurityMode::None => None,
            _ => Some(tls::build_tls_connector(config.accept_invalid_certs)?),
        };

        let ControlConnection {
            mut codec,
            banner,
            peer_ip,
        } = connection::connect(config, tls.as_ref()).await?;
        debug!("Server banner: {}", banner.text());

        // ── Explicit FTPS: AUTH TLS ──────────────────────────────
        if let (FtpSecurityMode::Explicit, Some(connector)) = (config.security, tls.as_ref()) {
            let resp = codec.execute("AUTH TLS").await?;
            if !resp.is_completion() {
                return Err(FtpError::tls_failed(format!(
                    "AUTH TLS rejected: {}",
                    resp.text()
                ))
                .with_code(resp.code));
            }
            codec = tls::upgrade_to_tls(codec, &config.host, connector).await?;
        }

        // ── Authenticate ─────────────────────────────────────────
        let user_resp = codec.execute(&format!("USER {}", config.username)).await?;
        if user_resp.code == 331 {
            let pass_resp = codec
                .execute(&format!("PASS {}", config.password.expose_secret()))
                .await?;
            if !pass_resp.is_completion() {
                return Err(FtpError::auth_failed(format!(
                    "Login failed: {}",
                    pass_resp.text()
                ))
                .with_code(pass_resp.code));
            }
        } else if !user_resp.is_completion() {
            return Err(FtpError::auth_failed(format!(
                "USER rejected: {}",
                user_resp.text()
            ))
            .with_code(user_resp.code));
        }

        // ── Protection level ─────────────────────────────────────
        if tls.is_some() {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
        }

        codec.expect_ok("TYPE I").await?;

        Ok(Self {
            codec,
            host: config.host.clone(),
            peer_ip,
            data_channel_mode: config.data_channel_mode,
            data_timeout: config.data_timeout(),
            tls,
            in_sync: true,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.codec.is_tls()
    }

    /// False once the control channel may be out of step with the server.
    /// Such a client must be replaced by a fresh connection.
    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }

    /// Mark the control channel as out of step, e.g. after a command was
    /// abandoned halfway through reading its reply.
    pub fn invalidate(&mut self) {
        self.in_sync = false;
    }

    /// Send a NOOP to keep the control connection alive.
    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("NOOP").await?;
        Ok(())
    }

    // ─── PWD / CWD ──────────────────────────────────────────────

    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect_ok("PWD").await?;
        parse_pwd(&resp.text())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("CWD {}", path)).await?;
        Ok(())
    }

    // ─── SIZE ───────────────────────────────────────────────────

    /// Get the size of a remote file (RFC 3659 SIZE).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let resp = self.codec.expect_ok(&format!("SIZE {}", path)).await?;
        parse_size(&resp.text())
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// Bare names from NLST, for the current directory if `path` is `None`.
    pub async fn nlst(&mut self, path: Option<&str>) -> FtpResult<Vec<String>> {
        let cmd = match path {
            Some(p) => format!("NLST {}", p),
            None => "NLST".to_string(),
        };
        let mut ds = self.begin_transfer(&cmd).await?;
        let raw = match ds.read_all().await {
            Ok(raw) => raw,
            Err(e) => {
                drop(ds);
                self.abandon_transfer().await;
                return Err(e.into());
            }
        };
        drop(ds);
        self.finish_transfer().await?;

        let text = String::from_utf8(raw)
            .map_err(|e| FtpError::protocol_error(format!("Listing not UTF-8: {}", e)))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    // ─── Data channel helpers ────────────────────────────────────

    /// Open a passive connection, issue `cmd` and wait for its 1xx reply.
    pub(crate) async fn begin_transfer(&mut self, cmd: &str) -> FtpResult<DataStream> {
        let tcp = transfer::open_passive(
            &mut self.codec,
            self.data_channel_mode,
            self.peer_ip,
            self.data_timeout,
        )
        .await?;

        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let Some(connector) = self.tls.clone() else {
            return Ok(DataStream::Plain(tcp));
        };
        match tls::connect_tls(&connector, &self.host, tcp).await {
            Ok(stream) => Ok(DataStream::Tls(Box::new(stream))),
            Err(e) => {
                self.abandon_transfer().await;
                Err(e)
            }
        }
    }

    /// Consume the final reply of a transfer whose data stream was dropped
    /// early (typically 426), so the next command reads its own reply.
    ///
    /// The data stream must already be closed. If no reply arrives within the
    /// data timeout the client is invalidated.
    pub(crate) async fn abandon_transfer(&mut self) {
        match timeout(self.data_timeout, self.codec.read_response()).await {
            Ok(Ok(resp)) => debug!(code = resp.code, "Abandoned transfer closed: {}", resp.text()),
            Ok(Err(e)) => {
                warn!("Control channel lost after aborted transfer: {}", e);
                self.in_sync = false;
            }
            Err(_) => {
                warn!("No reply after aborted transfer, control channel out of step");
                self.in_sync = false;
            }
        }
    }

    /// Read the completion reply that follows a finished data transfer.
    pub(crate) async fn finish_transfer(&mut self) -> FtpResult<FtpResponse> {
        let done = self.codec.read_response().await?;
        if !done.is_completion() {
            return Err(FtpError::from_reply(done.code, &done.text()));
        }
        Ok(done)
    }

    // ─── QUIT ────────────────────────────────────────────────────

    /// Gracefully close the session.
    pub async fn quit(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("QUIT").await?;
        Ok(())
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Parse `257 "/some/path"` into the path string.
fn parse_pwd(text: &str) -> FtpResult<String> {
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].rfind('"') {
            // RFC 959 doubles embedded quotes.
            return Ok(text[start + 1..start + 1 + end].replace("\"\"", "\""));
        }
    }
    Err(FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))
}

/// Parse `213 12345`.
fn parse_size(text: &str) -> FtpResult<u64> {
    text.split_whitespace()
        .nth(1)
        .and_then(|n| n.trim().parse::<u64>().ok())
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse SIZE: {}", text)))
}
