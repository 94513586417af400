mod dumper;
mod error;
mod status;
mod types;

pub use dumper::{DatabaseDumper, MysqlDumper, DUMP_BUFFER};
pub use error::{DbError, DbResult};
pub use status::sum_data_length;
pub use types::*;
