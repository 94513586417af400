//! Backup configuration.
//!
//! A [`BackupConfig`] is read from a JSON file or, when no file is given, from
//! the environment. Each section is optional; the backup skips the step whose
//! section is missing.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use sitebak_ftp::FtpConnectionConfig;
use sitebak_mysql::MysqlConnectionConfig;
use sitebak_ssh::SshConnectionConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {name} is required when {section} is configured")]
    MissingVar { name: &'static str, section: &'static str },
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default)]
    pub ftp: Option<FtpConnectionConfig>,
    #[serde(default)]
    pub ssh: Option<SshConnectionConfig>,
    #[serde(default)]
    pub database: Option<MysqlConnectionConfig>,
    /// Shared local directory for downloads and dumps. Overrides the
    /// per-section `localBasePath` when set.
    #[serde(default)]
    pub local_base_path: Option<PathBuf>,
}

impl BackupConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(serde_json::from_str::<Self>(raw)?.resolved())
    }

    /// Read `FTP_*`, `SSH_*`, `DB_*` and `LOCAL_BASE_PATH`.
    pub fn from_environment() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    ///
    /// The FTP and SSH sections exist when their `*_HOST` variable is set; the
    /// database section exists when `DB_NAME` is set (its host defaults to
    /// `localhost`).
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let ftp = match get("FTP_HOST") {
            Some(host) => {
                let mut cfg = FtpConnectionConfig::new(
                    host,
                    required(&get, "FTP_USER", "FTP")?,
                    secret(&get, "FTP_PASS", "FTP")?,
                );
                if let Some(port) = port(&get, "FTP_PORT")? {
                    cfg.port = port;
                }
                if let Some(base) = get("FTP_BASE_PATH") {
                    cfg.host_base_path = base;
                }
                Some(cfg)
            }
            None => None,
        };

        let ssh = match get("SSH_HOST") {
            Some(host) => {
                let mut cfg = SshConnectionConfig::new(
                    host,
                    required(&get, "SSH_USER", "SSH")?,
                    secret(&get, "SSH_PASS", "SSH")?,
                );
                if let Some(port) = port(&get, "SSH_PORT")? {
                    cfg.port = port;
                }
                if let Some(base) = get("SSH_BASE_PATH") {
                    cfg.remote_base_path = base;
                }
                Some(cfg)
            }
            None => None,
        };

        let database = match get("DB_NAME") {
            Some(name) => {
                let mut cfg = MysqlConnectionConfig::new(
                    name,
                    required(&get, "DB_USER", "database")?,
                    secret(&get, "DB_PASS", "database")?,
                );
                if let Some(host) = get("DB_HOST") {
                    cfg.host = host;
                }
                if let Some(port) = port(&get, "DB_PORT")? {
                    cfg.port = port;
                }
                Some(cfg)
            }
            None => None,
        };

        Ok(Self {
            ftp,
            ssh,
            database,
            local_base_path: get("LOCAL_BASE_PATH").map(PathBuf::from),
        }
        .resolved())
    }

    /// Push the shared local base path down into the sections that write locally.
    fn resolved(mut self) -> Self {
        if let Some(base) = &self.local_base_path {
            if let Some(ftp) = self.ftp.as_mut() {
                ftp.local_base_path = base.clone();
            }
            if let Some(db) = self.database.as_mut() {
                db.local_base_path = base.clone();
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ftp.is_none() && self.ssh.is_none() && self.database.is_none()
    }
}

fn required<G>(get: &G, name: &'static str, section: &'static str) -> ConfigResult<String>
where
    G: Fn(&str) -> Option<String>,
{
    get(name).ok_or(ConfigError::MissingVar { name, section })
}

fn secret<G>(get: &G, name: &'static str, section: &'static str) -> ConfigResult<SecretString>
where
    G: Fn(&str) -> Option<String>,
{
    required(get, name, section).map(SecretString::new)
}

fn port<G>(get: &G, name: &'static str) -> ConfigResult<Option<u16>>
where
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|value| {
            value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidVar { name, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_configures_nothing() {
        let cfg = BackupConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.is_empty());
        assert!(cfg.local_base_path.is_none());
    }

    #[test]
    fn sections_follow_their_host_variables() {
        let cfg = BackupConfig::from_lookup(lookup(&[
            ("FTP_HOST", "ftp.example.com"),
            ("FTP_USER", "ftpuser"),
            ("FTP_PASS", "ftppass"),
            ("FTP_BASE_PATH", "./wp-content/"),
            ("DB_NAME", "shop"),
            ("DB_USER", "dbuser"),
            ("DB_PASS", "dbpass"),
            ("DB_PORT", "3307"),
            ("LOCAL_BASE_PATH", "/srv/backups"),
        ]))
        .unwrap();

        let ftp = cfg.ftp.as_ref().unwrap();
        assert_eq!(ftp.host, "ftp.example.com");
        assert_eq!(ftp.port, 21);
        assert_eq!(ftp.password.expose_secret(), "ftppass");
        assert_eq!(ftp.host_base_path, "./wp-content/");
        assert_eq!(ftp.local_base_path, PathBuf::from("/srv/backups"));

        assert!(cfg.ssh.is_none());

        let db = cfg.database.as_ref().unwrap();
        assert_eq!(db.db_name, "shop");
        assert_eq!(db.host, "localhost");
        assert_eq!(db.port, 3307);
        assert_eq!(db.local_base_path, PathBuf::from("/srv/backups"));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = BackupConfig::from_lookup(lookup(&[("SSH_HOST", "box"), ("SSH_USER", "me")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar { name: "SSH_PASS", section: "SSH" }
        ));
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = BackupConfig::from_lookup(lookup(&[
            ("SSH_HOST", "box"),
            ("SSH_USER", "me"),
            ("SSH_PASS", "pw"),
            ("SSH_PORT", "twenty-two"),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable SSH_PORT has invalid value \"twenty-two\""
        );
    }

    #[test]
    fn json_sections_and_shared_base() {
        let cfg = BackupConfig::from_json(
            r#"{
                "ssh": {"host": "box", "username": "me", "password": "pw",
                        "remoteBasePath": "/home/me/sites"},
                "database": {"dbName": "shop", "username": "u", "password": "p",
                             "localBasePath": "/tmp/ignored"},
                "localBasePath": "/srv/backups"
            }"#,
        )
        .unwrap();
        assert!(cfg.ftp.is_none());
        assert_eq!(cfg.ssh.as_ref().unwrap().remote_base_path, "/home/me/sites");
        assert_eq!(
            cfg.database.as_ref().unwrap().local_base_path,
            PathBuf::from("/srv/backups")
        );
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = BackupConfig::from_file(Path::new("/nonexistent/sitebak.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sitebak.json"));
    }
}
