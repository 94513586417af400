use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH connection failed: {0}")]
    Connection(String),

    #[error("Not connected to the server.")]
    NotConnected,

    #[error("{stderr} or SSH may be inactive on server (path: {path})")]
    RemoteDirectoryNotFound { path: String, stderr: String },

    #[error("Error creating archive: {0}")]
    ArchiveCreation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SshResult<T> = Result<T, SshError>;

impl From<ssh2::Error> for SshError {
    fn from(e: ssh2::Error) -> Self {
        SshError::Io(e.into())
    }
}

impl From<tokio::task::JoinError> for SshError {
    fn from(e: tokio::task::JoinError) -> Self {
        SshError::Io(std::io::Error::other(e))
    }
}
