//! # FTP/FTPS download client
//!
//! A download-only subset of RFC 959 with the FTPS extensions from
//! RFC 2228 / 4217 (AUTH TLS, PBSZ, PROT) and passive data channels
//! (PASV, RFC 2428 EPSV).
//!
//! Architecture:
//! - `types`: config and reply types
//! - `error`: FTP-specific error type
//! - `protocol`: low-level command/response codec
//! - `connection`: TCP + implicit TLS transport
//! - `tls`: rustls connector, AUTH TLS upgrade, data-channel wrapping
//! - `transfer`: passive data channels
//! - `client`: stateful control connection (login, CWD, PWD, SIZE, NLST)
//! - `file_ops`: streaming RETR into a local file
//! - `downloader`: session with keep-alive, retries, verification and
//!   recursive mirroring

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod tls;
pub mod transfer;
pub mod client;
pub mod file_ops;
pub mod downloader;

pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use client::FtpClient;
pub use downloader::FtpDownloader;
