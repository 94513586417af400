//! # SiteBak – SSH
//!
//! Password-authenticated SSH sessions and remote archive creation.

pub mod ssh;

pub use ssh::*;
