use mysql_replay::checkpoint::{BinlogPosition, CheckpointManager};
use tempfile::TempDir;

fn configured_default() -> BinlogPosition {
    BinlogPosition::new("mysql-bin.000001", 4)
}

#[tokio::test]
async fn test_checkpoint_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("binlog_info.txt");

    let manager = CheckpointManager::new(&checkpoint_path);

    // Create and save a position
    let position = BinlogPosition::new("mysql-bin.000042", 1000);
    manager.save(&position).await.unwrap();

    // Load it back
    let loaded = manager.load(configured_default()).await;
    assert_eq!(loaded, position);

    // The on-disk record is the documented two-line format
    let raw = tokio::fs::read_to_string(&checkpoint_path).await.unwrap();
    assert_eq!(raw, "mysql-bin.000042\n1000");

    // Update position
    let position2 = BinlogPosition::new("mysql-bin.000043", 4);
    manager.save(&position2).await.unwrap();

    let loaded2 = manager.load(configured_default()).await;
    assert_eq!(loaded2, position2);
}

#[tokio::test]
async fn test_checkpoint_recovery_simulation() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("binlog_info.txt");

    // Simulate first run
    {
        let manager = CheckpointManager::new(&checkpoint_path);

        // No checkpoint initially: the configured default applies
        assert_eq!(manager.load(configured_default()).await, configured_default());

        // Process some events and save
        manager
            .save(&BinlogPosition::new("mysql-bin.000005", 890))
            .await
            .unwrap();
    }

    // Simulate restart/recovery
    {
        let manager = CheckpointManager::new(&checkpoint_path);

        let recovered = manager.load(configured_default()).await;
        assert_eq!(recovered, BinlogPosition::new("mysql-bin.000005", 890));

        // Continue from the recovered position
        manager
            .save(&BinlogPosition::new("mysql-bin.000006", 4))
            .await
            .unwrap();
    }

    // Verify final state
    {
        let manager = CheckpointManager::new(&checkpoint_path);
        let final_position = manager.load(configured_default()).await;
        assert_eq!(final_position, BinlogPosition::new("mysql-bin.000006", 4));
    }
}

#[tokio::test]
async fn test_rapid_checkpoint_updates() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("binlog_info.txt");

    let manager = CheckpointManager::new(&checkpoint_path);

    // One save per consumed event; the last write wins
    for i in 0..10u64 {
        let position = BinlogPosition::new("mysql-bin.000099", 4 + i * 217);
        manager.save(&position).await.unwrap();
    }

    let final_position = manager.load(configured_default()).await;
    assert_eq!(final_position, BinlogPosition::new("mysql-bin.000099", 4 + 9 * 217));
}

#[tokio::test]
async fn test_corrupt_checkpoint_falls_back() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("binlog_info.txt");

    tokio::fs::write(&checkpoint_path, "one line only").await.unwrap();

    let manager = CheckpointManager::new(&checkpoint_path);
    assert_eq!(manager.load(configured_default()).await, configured_default());

    // A save repairs the record
    manager
        .save(&BinlogPosition::new("mysql-bin.000002", 120))
        .await
        .unwrap();
    assert_eq!(
        manager.load(configured_default()).await,
        BinlogPosition::new("mysql-bin.000002", 120)
    );
}
