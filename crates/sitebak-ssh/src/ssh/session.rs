//! A single password-authenticated SSH session.
//!
//! libssh2 is blocking, so every call that touches the wire runs on
//! `spawn_blocking` with a clone of the `Session` handle. A blocked call
//! holds the session lock until it returns; [`SessionAbort`] unblocks it by
//! shutting down the socket underneath.

use crate::ssh::error::{SshError, SshResult};
use crate::ssh::types::{CommandOutput, HostKeyPolicy, SshConnectionConfig};
use secrecy::ExposeSecret;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::Read;
use std::net::Shutdown;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Cloneable handle that tears down a session's socket from any task.
#[derive(Debug, Clone, Default)]
pub struct SessionAbort {
    socket: Arc<Mutex<Option<std::net::TcpStream>>>,
}

impl SessionAbort {
    fn arm(&self, stream: &std::net::TcpStream) {
        match stream.try_clone() {
            Ok(clone) => self.replace(Some(clone)),
            Err(e) => warn!("Cannot keep an abort handle on the SSH socket: {}", e),
        }
    }

    fn disarm(&self) {
        self.replace(None);
    }

    fn replace(&self, socket: Option<std::net::TcpStream>) {
        if let Ok(mut slot) = self.socket.lock() {
            *slot = socket;
        }
    }

    /// Shut the socket down so any blocked libssh2 call fails at once.
    /// Returns whether there was a socket to shut.
    pub fn abort(&self) -> bool {
        let socket = self.socket.lock().ok().and_then(|mut slot| slot.take());
        match socket {
            Some(socket) => {
                if let Err(e) = socket.shutdown(Shutdown::Both) {
                    debug!("SSH socket shutdown: {}", e);
                }
                true
            }
            None => false,
        }
    }
}

pub struct ShellSession {
    config: Arc<SshConnectionConfig>,
    /// `Some` exactly while connected.
    session: Option<Session>,
    abort: SessionAbort,
}

impl ShellSession {
    pub fn new(config: SshConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            session: None,
            abort: SessionAbort::default(),
        }
    }

    /// Handle for tearing the connection down while a call is in flight,
    /// including a handshake that has not completed yet.
    pub fn abort_handle(&self) -> SessionAbort {
        self.abort.clone()
    }

    pub fn config(&self) -> &SshConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub async fn connect(&mut self) -> SshResult<()> {
        if self.session.is_some() {
            info!("Already connected to the server.");
            return Ok(());
        }

        info!("Establishing SSH connection to {}...", self.config.host);
        match self.open().await {
            Ok(session) => {
                self.session = Some(session);
                info!("SSH connection established.");
                Ok(())
            }
            Err(e) => {
                self.abort.disarm();
                error!(critical = true, "Error establishing SSH connection: {}", e);
                Err(e)
            }
        }
    }

    async fn open(&self) -> SshResult<Session> {
        let addr = self.config.address();
        let tcp = timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                SshError::Connection(format!(
                    "Connection timeout after {} seconds to {}",
                    self.config.connect_timeout_sec, addr
                ))
            })?
            .map_err(|e| SshError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

        let stream = tcp
            .into_std()
            .and_then(|s| s.set_nonblocking(false).map(|_| s))
            .map_err(|e| SshError::Connection(format!("Failed to prepare socket: {}", e)))?;

        self.abort.arm(&stream);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || establish(stream, &config))
            .await
            .map_err(|e| SshError::Connection(format!("SSH worker failed: {}", e)))?
    }

    /// Run `command` and collect its exit status and output.
    pub async fn execute(&self, command: &str) -> SshResult<CommandOutput> {
        let session = self.session.clone().ok_or(SshError::NotConnected)?;
        let command = command.to_string();
        debug!("Executing remote command: {}", command);
        tokio::task::spawn_blocking(move || run_command(&session, &command)).await?
    }

    /// Close the session if one is open. Errors are logged, never returned.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            info!("No active SSH connection to close.");
            return;
        };

        info!("Closing SSH connection...");
        let closed =
            tokio::task::spawn_blocking(move || session.disconnect(None, "backup finished", None))
                .await;
        self.abort.disarm();
        match closed {
            Ok(Ok(())) => info!("SSH connection closed."),
            Ok(Err(e)) => error!("Error closing connection: {}", e),
            Err(e) => error!("Error closing connection: {}", e),
        }
    }

    /// Drop the connection without the SSH goodbye. Used on interrupt, when
    /// a remote command may still hold the session; the socket shutdown
    /// makes that command fail instead of waiting for it to finish.
    pub fn abort(&mut self) {
        let had_socket = self.abort.abort();
        match self.session.take() {
            Some(_) => warn!("SSH connection aborted."),
            None if had_socket => warn!("SSH connection attempt aborted."),
            None => info!("No active SSH connection to close."),
        }
    }
}

fn establish(stream: std::net::TcpStream, config: &SshConnectionConfig) -> SshResult<Session> {
    let connection = |what: &str, e: ssh2::Error| SshError::Connection(format!("{}: {}", what, e));

    let mut sess = Session::new().map_err(|e| connection("Failed to create session", e))?;
    sess.set_tcp_stream(stream);
    sess.handshake()
        .map_err(|e| connection("SSH handshake failed", e))?;

    verify_host_key(&sess, config)?;

    sess.userauth_password(&config.username, config.password.expose_secret())
        .map_err(|e| connection("Password authentication failed", e))?;
    if !sess.authenticated() {
        return Err(SshError::Connection(format!(
            "Authentication as {} was not accepted",
            config.username
        )));
    }
    Ok(sess)
}

fn verify_host_key(sess: &Session, config: &SshConnectionConfig) -> SshResult<()> {
    if config.host_key_policy == HostKeyPolicy::AcceptAny {
        return Ok(());
    }

    let (key, _) = sess
        .host_key()
        .ok_or_else(|| SshError::Connection("No host key available".into()))?;
    let path = known_hosts_path(config)?;
    let mut known = sess
        .known_hosts()
        .map_err(|e| SshError::Connection(format!("known_hosts unavailable: {}", e)))?;
    known
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            SshError::Connection(format!("Failed to read {}: {}", path.display(), e))
        })?;

    match known.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(SshError::Connection(format!(
            "Host key for {} not found in {}",
            config.host,
            path.display()
        ))),
        CheckResult::Mismatch => Err(SshError::Connection(format!(
            "Host key for {} does not match {}",
            config.host,
            path.display()
        ))),
        CheckResult::Failure => Err(SshError::Connection(format!(
            "Host key check for {} failed",
            config.host
        ))),
    }
}

fn known_hosts_path(config: &SshConnectionConfig) -> SshResult<PathBuf> {
    config
        .known_hosts_path
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
        .ok_or_else(|| SshError::Connection("No known_hosts file available".into()))
}

fn run_command(session: &Session, command: &str) -> SshResult<CommandOutput> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = Vec::new();
    channel.read_to_end(&mut stdout)?;
    let mut stderr = Vec::new();
    channel.stderr().read_to_end(&mut stderr)?;

    channel.wait_close()?;
    Ok(CommandOutput {
        exit_status: channel.exit_status()?,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}
