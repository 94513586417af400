//! # SiteBak – FTP
//!
//! FTPS download sessions used to fetch the website archive.

pub mod ftp;

pub use ftp::*;
