use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Connection(String),

    #[error("Database dump process failed: {0}")]
    DumpFailed(String),

    #[error("{program} exited unsuccessfully: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
