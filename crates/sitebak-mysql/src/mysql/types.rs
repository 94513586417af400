use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;

/// Connection and tooling settings for one database.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MysqlConnectionConfig {
    pub db_name: String,
    pub username: String,
    pub password: SecretString,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory the `.sql` dumps are written to.
    #[serde(default = "default_local_base")]
    pub local_base_path: PathBuf,
    #[serde(default = "default_dump_program")]
    pub dump_program: String,
    #[serde(default = "default_client_program")]
    pub client_program: String,
    /// Log a size estimate before dumping and report progress against it.
    #[serde(default)]
    pub estimate_before_dump: bool,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    3306
}
fn default_local_base() -> PathBuf {
    PathBuf::from(".")
}
fn default_dump_program() -> String {
    "mysqldump".into()
}
fn default_client_program() -> String {
    "mysql".into()
}

impl MysqlConnectionConfig {
    pub fn new(
        db_name: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            username: username.into(),
            password,
            host: default_host(),
            port: default_port(),
            local_base_path: default_local_base(),
            dump_program: default_dump_program(),
            client_program: default_client_program(),
            estimate_before_dump: false,
        }
    }

    pub fn with_local_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_base_path = path.into();
        self
    }

    pub fn with_programs(mut self, dump: impl Into<String>, client: impl Into<String>) -> Self {
        self.dump_program = dump.into();
        self.client_program = client.into();
        self
    }
}
