pub mod binlog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod replicator;
pub mod sql;
pub mod target;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;
