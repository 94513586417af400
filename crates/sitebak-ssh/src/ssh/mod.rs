pub mod archiver;
pub mod error;
pub mod session;
pub mod types;

pub use archiver::RemoteArchiver;
pub use error::{SshError, SshResult};
pub use session::{SessionAbort, ShellSession};
pub use types::*;
