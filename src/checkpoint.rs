//! Durable binlog position tracking.
//!
//! The replicator persists the last consumed binlog position after every
//! event so that a restart resumes where the previous run left off instead
//! of re-reading the whole log. The record is deliberately simple: a
//! two-line text file holding the binlog file name and the byte offset.

use crate::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A resumption point in the source binlog stream.
///
/// Positions are monotonically non-decreasing within a single stream: the
/// file name advances on log rotation and the offset advances with every
/// event inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogPosition {
    /// Binlog file name, e.g. `mysql-bin.000042`
    pub file: String,
    /// Byte offset within the file
    pub pos: u64,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, pos: u64) -> Self {
        Self {
            file: file.into(),
            pos,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.pos)
    }
}

/// Persists the current [`BinlogPosition`] to disk.
///
/// Saves are atomic: the record is written to a temporary file, synced,
/// and renamed over the final path, so a crash mid-write never leaves a
/// partially-written record behind.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    /// Loads the stored position, falling back to `default` when no record
    /// exists or the record cannot be parsed.
    ///
    /// A corrupt or unreadable checkpoint is logged and treated the same as
    /// a missing one: replication starts from the configured default rather
    /// than refusing to start.
    pub async fn load(&self, default: BinlogPosition) -> BinlogPosition {
        let content = match fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint file at {:?}, using configured position", self.file_path);
                return default;
            }
            Err(e) => {
                warn!("Failed to read checkpoint file {:?}: {}", self.file_path, e);
                return default;
            }
        };

        match parse_record(&content) {
            Some(position) => {
                info!("Loaded checkpoint: {}", position);
                position
            }
            None => {
                warn!(
                    "Checkpoint file {:?} is malformed, using configured position",
                    self.file_path
                );
                default
            }
        }
    }

    /// Saves the position, overwriting any prior record.
    ///
    /// The caller observes completion: when this returns `Ok` the record is
    /// durably on disk.
    pub async fn save(&self, position: &BinlogPosition) -> Result<()> {
        debug!("Saving checkpoint: {}", position);

        let temp_path = self.file_path.with_extension("tmp");

        let record = format!("{}\n{}", position.file, position.pos);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(record.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        debug!("Checkpoint saved");
        Ok(())
    }
}

fn parse_record(content: &str) -> Option<BinlogPosition> {
    let mut lines = content.lines();
    let file = lines.next()?.trim();
    let pos = lines.next()?.trim().parse::<u64>().ok()?;
    if file.is_empty() {
        return None;
    }
    Some(BinlogPosition::new(file, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn default_position() -> BinlogPosition {
        BinlogPosition::new("mysql-bin.000001", 4)
    }

    #[tokio::test]
    async fn test_checkpoint_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("binlog_info.txt");

        let manager = CheckpointManager::new(&checkpoint_path);

        // Initially falls back to the default
        let loaded = manager.load(default_position()).await;
        assert_eq!(loaded, default_position());

        // Save and reload
        let position = BinlogPosition::new("mysql-bin.000007", 154);
        manager.save(&position).await.unwrap();

        let loaded = manager.load(default_position()).await;
        assert_eq!(loaded, position);
    }

    #[tokio::test]
    async fn test_checkpoint_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("binlog_info.txt");

        let manager = CheckpointManager::new(&checkpoint_path);

        manager
            .save(&BinlogPosition::new("mysql-bin.000001", 120))
            .await
            .unwrap();
        manager
            .save(&BinlogPosition::new("mysql-bin.000002", 4))
            .await
            .unwrap();

        let loaded = manager.load(default_position()).await;
        assert_eq!(loaded, BinlogPosition::new("mysql-bin.000002", 4));
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("binlog_info.txt");

        tokio::fs::write(&checkpoint_path, "not a valid record")
            .await
            .unwrap();

        let manager = CheckpointManager::new(&checkpoint_path);
        let loaded = manager.load(default_position()).await;
        assert_eq!(loaded, default_position());
    }

    #[tokio::test]
    async fn test_non_numeric_offset_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("binlog_info.txt");

        tokio::fs::write(&checkpoint_path, "mysql-bin.000009\nfour")
            .await
            .unwrap();

        let manager = CheckpointManager::new(&checkpoint_path);
        let loaded = manager.load(default_position()).await;
        assert_eq!(loaded, default_position());
    }

    #[test]
    fn test_parse_record_trims_whitespace() {
        let parsed = parse_record("mysql-bin.000010\n  1234  \n").unwrap();
        assert_eq!(parsed, BinlogPosition::new("mysql-bin.000010", 1234));
    }
}
