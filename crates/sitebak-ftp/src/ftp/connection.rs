//! TCP + TLS transport: establishes the FTP control connection.
//!
//! Handles plain-TCP connect, implicit-FTPS wrapping, and the connect
//! timeout from `FtpConnectionConfig`. Established connections carry no
//! read timeout: a stalled server stalls the caller.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::types::{FtpConnectionConfig, FtpResponse, FtpSecurityMode};
use std::net::IpAddr;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// An open control connection before login.
pub struct ControlConnection {
    pub codec: FtpCodec,
    pub banner: FtpResponse,
    /// Address the control socket reached; passive data connections go here.
    pub peer_ip: IpAddr,
}

/// Establish the control connection and read the server welcome banner.
///
/// For Explicit FTPS the caller must later issue AUTH TLS themselves
/// (handled in `client.rs`).
pub async fn connect(
    config: &FtpConnectionConfig,
    connector: Option<&TlsConnector>,
) -> FtpResult<ControlConnection> {
    let addr = config.address();

    let tcp = timeout(config.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;

    tcp.set_nodelay(true).ok();
    let peer_ip = tcp.peer_addr()?.ip();

    let mut codec = match (config.security, connector) {
        (FtpSecurityMode::Implicit, Some(connector)) => {
            FtpCodec::from_tls(tls::connect_tls(connector, &config.host, tcp).await?)
        }
        (FtpSecurityMode::Implicit, None) => {
            return Err(FtpError::invalid_config("Implicit FTPS needs a TLS connector"))
        }
        // Explicit upgrades later.
        _ => FtpCodec::from_tcp(tcp),
    };

    let banner = codec.read_response().await?;
    if !banner.is_completion() {
        return Err(FtpError::from_reply(banner.code, &banner.text()));
    }

    Ok(ControlConnection {
        codec,
        banner,
        peer_ip,
    })
}
