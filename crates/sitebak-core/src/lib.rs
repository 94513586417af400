//! # SiteBak – Core
//!
//! Building blocks shared by the archive, transfer and dump crates:
//! bounded retry, file-growth monitoring, step outcomes and path helpers.

pub mod outcome;
pub mod paths;
pub mod progress;
pub mod retry;

pub use outcome::StepOutcome;
pub use paths::{ensure_dir, remote_basename, remote_join};
pub use progress::{ProgressMonitor, ProgressRecord};
pub use retry::{RetryExhausted, RetryPolicy};
