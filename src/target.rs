//! Target database execution.
//!
//! The execution worker only needs one capability from the target: run a
//! single statement and commit it. [`SqlExecutor`] is that seam;
//! [`MysqlTarget`] is the production implementation over `mysql_async`.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, TxOpts};
use tokio::time::timeout;
use tracing::info;

use crate::config::MysqlSettings;
use crate::{Error, Result};

/// Executes one SQL statement with transaction semantics: a returned `Ok`
/// means the statement is committed and durable; a returned `Err` leaves
/// no partial effect.
#[async_trait]
pub trait SqlExecutor: Send {
    async fn execute(&mut self, sql: &str) -> Result<()>;
}

/// A live connection to the target MySQL server.
pub struct MysqlTarget {
    conn: Conn,
}

impl MysqlTarget {
    pub async fn connect(settings: &MysqlSettings) -> Result<Self> {
        let conn = timeout(settings.connect_timeout(), Conn::new(settings.opts()))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to target {}:{} timed out", settings.host, settings.port),
                ))
            })??;

        info!(
            host = %settings.host,
            port = settings.port,
            "Connected to target MySQL"
        );
        Ok(Self { conn })
    }

    /// Cleanly closes the connection. Consumes the target so it can only
    /// be released once.
    pub async fn disconnect(self) -> Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for MysqlTarget {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        let mut tx = self.conn.start_transaction(TxOpts::default()).await?;
        tx.query_drop(sql).await?;
        tx.commit().await?;
        Ok(())
    }
}
