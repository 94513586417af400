//! # SiteBak – MySQL
//!
//! Database dumps driven by the vendor's command-line tools.

pub mod mysql;

pub use mysql::*;
