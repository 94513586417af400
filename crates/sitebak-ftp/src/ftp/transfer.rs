//! Data-channel management for FTP transfers.
//!
//! Supports the two passive modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//!
//! The socket is connected before the transfer command is sent and is
//! TLS-wrapped (PROT P) only after the server's preliminary reply, since
//! servers start the data-channel handshake at that point.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::DataChannelMode;
use regex::Regex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;

/// Abstraction over a plain or TLS-wrapped data stream.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl DataStream {
    /// Read whatever is available. A TLS peer that closes without
    /// `close_notify` reads as end-of-stream.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DataStream::Plain(tcp) => tcp.read(buf).await,
            DataStream::Tls(tls) => match tls.read(buf).await {
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
                other => other,
            },
        }
    }

    /// Fill `buf` completely unless the stream ends first.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Drain the stream into memory.
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read_some(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// Ask the server for a passive port and connect to it.
pub async fn open_passive(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    peer_ip: IpAddr,
    data_timeout: Duration,
) -> FtpResult<TcpStream> {
    let addr = match mode {
        DataChannelMode::Passive => {
            let resp = codec.expect_ok("PASV").await?;
            // The advertised host is ignored; NATed servers often send a
            // private address.
            let advertised = parse_pasv_response(&resp.text())?;
            SocketAddr::new(peer_ip, advertised.port())
        }
        DataChannelMode::ExtendedPassive => {
            let resp = codec.expect_ok("EPSV").await?;
            SocketAddr::new(peer_ip, parse_epsv_response(&resp.text())?)
        }
    };

    timeout(data_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("Data connect to {} timed out", addr)))?
        .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", addr, e)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 response.
pub fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").expect("valid PASV regex")
    });
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok(SocketAddr::new(ip, port))
}

/// Parse the port from `229 Entering Extended Passive Mode (|||port|)`.
pub fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\|\|\|(\d+)\|").expect("valid EPSV regex"));
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply_is_parsed() {
        let addr =
            parse_pasv_response("227 Entering Passive Mode (192,168,1,20,195,80).").unwrap();
        assert_eq!(addr, "192.168.1.20:50000".parse().unwrap());
        assert!(parse_pasv_response("227 Entering Passive Mode").is_err());
        assert!(parse_pasv_response("227 (1,2,3,4,300,1)").is_err());
    }

    #[test]
    fn epsv_reply_is_parsed() {
        assert_eq!(
            parse_epsv_response("229 Entering Extended Passive Mode (|||6446|)").unwrap(),
            6446
        );
        assert!(parse_epsv_response("229 nope").is_err());
    }
}
