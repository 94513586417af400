//! # SiteBak
//!
//! Website backup driven by three optional components: a
//! [`RemoteArchiver`](sitebak_ssh::RemoteArchiver) that packs the site on the
//! server, an [`FtpDownloader`](sitebak_ftp::FtpDownloader) that fetches the
//! archive, and a [`DatabaseDumper`](sitebak_mysql::DatabaseDumper) that dumps
//! the database locally. [`BackupManager`] runs them in that order.

pub mod backup;
pub mod config;
pub mod logging;

pub use backup::{format_elapsed, BackupManager, BackupReport};
pub use config::{BackupConfig, ConfigError, ConfigResult};
pub use logging::init_logging;

pub use sitebak_core::StepOutcome;
pub use sitebak_ftp::{FtpConnectionConfig, FtpDownloader};
pub use sitebak_mysql::{DatabaseDumper, MysqlConnectionConfig, MysqlDumper};
pub use sitebak_ssh::{RemoteArchiver, SshConnectionConfig};
