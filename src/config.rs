use mysql_async::{Opts, OptsBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::BinlogPosition;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source_mysql_settings: MysqlSettings,
    pub source_server_id: u32,
    pub binlog_file: String,
    pub binlog_pos: u64,
    pub target_mysql_settings: MysqlSettings,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MysqlSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_source_retry_secs")]
    pub source_retry_secs: u64,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MYSQL_REPLAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// The position replication starts from when no checkpoint exists.
    pub fn initial_position(&self) -> BinlogPosition {
        BinlogPosition::new(self.binlog_file.clone(), self.binlog_pos)
    }
}

impl MysqlSettings {
    pub fn opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .db_name(self.database.clone())
            .into()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ReplicationConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn source_retry_interval(&self) -> Duration {
        Duration::from_secs(self.source_retry_secs)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            checkpoint_file: default_checkpoint_file(),
            max_queue_size: default_max_queue_size(),
            drain_timeout_secs: default_drain_timeout_secs(),
            source_retry_secs: default_source_retry_secs(),
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("binlog_info.txt")
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_source_retry_secs() -> u64 {
    5
}
