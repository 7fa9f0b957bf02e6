//! Binlog event source.
//!
//! Wraps `mysql_async`'s binlog stream and turns raw replication events
//! into [`ChangeEvent`]s paired with the position they were read from.
//! The binlog wire format does not carry column names, so they are
//! resolved through `INFORMATION_SCHEMA.COLUMNS` on a separate metadata
//! connection and cached per table. Rotate events update the tracked file
//! name; transaction bookkeeping events are consumed here and never reach
//! the replication loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::binlog::event::{ChangeEvent, Row, SourcedEvent, SqlValue};
use crate::checkpoint::BinlogPosition;
use crate::config::MysqlSettings;
use crate::{Error, Result};

const COLUMN_NAMES_QUERY: &str = "SELECT COLUMN_NAME \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

enum RowsKind {
    Insert,
    Update,
    Delete,
}

/// A live binlog stream positioned at a [`BinlogPosition`].
pub struct BinlogSource {
    stream: BinlogStream,
    metadata: Conn,
    columns: HashMap<(String, String), Arc<Vec<String>>>,
    position: BinlogPosition,
}

impl BinlogSource {
    /// Connects to the source, registers with the given replica server id
    /// and starts streaming from `position`.
    pub async fn connect(
        settings: &MysqlSettings,
        server_id: u32,
        position: BinlogPosition,
    ) -> Result<Self> {
        let conn = Self::open_conn(settings).await?;
        let metadata = Self::open_conn(settings).await?;

        let request = BinlogStreamRequest::new(server_id)
            .with_filename(position.file.as_bytes())
            .with_pos(position.pos);
        let stream = conn.get_binlog_stream(request).await?;

        info!(
            host = %settings.host,
            port = settings.port,
            server_id,
            position = %position,
            "Binlog stream opened"
        );

        Ok(Self {
            stream,
            metadata,
            columns: HashMap::new(),
            position,
        })
    }

    /// Reconnects after a stream failure, retrying until the source comes
    /// back. Only returns once a stream is open again.
    pub async fn reconnect(
        settings: &MysqlSettings,
        server_id: u32,
        position: BinlogPosition,
        retry_interval: Duration,
    ) -> Self {
        loop {
            sleep(retry_interval).await;
            match Self::connect(settings, server_id, position.clone()).await {
                Ok(source) => return source,
                Err(e) => {
                    warn!(error = %e, "Source reconnect failed, retrying");
                }
            }
        }
    }

    async fn open_conn(settings: &MysqlSettings) -> Result<Conn> {
        timeout(settings.connect_timeout(), Conn::new(settings.opts()))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "connecting to source {}:{} timed out",
                        settings.host, settings.port
                    ),
                ))
            })?
            .map_err(Error::Mysql)
    }

    /// The position after the most recently delivered event.
    ///
    /// Valid even when [`next_event`](Self::next_event) just returned a
    /// decoding error: the failed event still advanced the position, so
    /// the caller can checkpoint past it.
    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }

    /// Returns the next change event, or `None` when the stream ends.
    ///
    /// Bookkeeping events (format description, rotate, table map, xid,
    /// heartbeat) are consumed internally. `Error::Decoding` means one
    /// event could not be interpreted; the stream itself is still good and
    /// the position has advanced past the bad event. Any other error means
    /// the stream is broken and the source must be reopened.
    pub async fn next_event(&mut self) -> Result<Option<SourcedEvent>> {
        loop {
            let event = match self.stream.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            };

            let header = event.header();
            let timestamp = i64::from(header.timestamp());
            let log_pos = u64::from(header.log_pos());
            if log_pos > 0 {
                self.position.pos = log_pos;
            }

            let data = match event
                .read_data()
                .map_err(|e| Error::decoding(format!("unreadable binlog event: {}", e)))?
            {
                Some(data) => data,
                None => continue,
            };

            match data {
                EventData::RotateEvent(rotate) => {
                    let file = rotate.name().into_owned();
                    debug!(file = %file, pos = rotate.position(), "Binlog rotate");
                    self.position.file = file;
                    self.position.pos = rotate.position();
                }
                EventData::QueryEvent(query) => {
                    let sql = query.query().into_owned();
                    if is_transaction_bookkeeping(&sql) {
                        continue;
                    }
                    // DDL can change any table's shape; cached column
                    // lists are no longer trustworthy.
                    self.columns.clear();

                    let schema = query.schema().into_owned();
                    let schema = (!schema.is_empty()).then_some(schema);
                    let event = ChangeEvent::Statement {
                        schema,
                        sql,
                        timestamp,
                    };
                    return Ok(Some(SourcedEvent {
                        event,
                        position: self.position.clone(),
                    }));
                }
                EventData::RowsEvent(rows_data) => {
                    let kind = match &rows_data {
                        RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
                            RowsKind::Insert
                        }
                        RowsEventData::UpdateRowsEvent(_) | RowsEventData::UpdateRowsEventV1(_) => {
                            RowsKind::Update
                        }
                        RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
                            RowsKind::Delete
                        }
                        _ => {
                            debug!("Skipping unsupported rows event variant");
                            continue;
                        }
                    };

                    let table_id = rows_data.table_id();
                    let (schema, table, column_count) = {
                        let tme = self.stream.get_tme(table_id).ok_or_else(|| {
                            Error::decoding(format!("no table map for table id {}", table_id))
                        })?;
                        (
                            tme.database_name().into_owned(),
                            tme.table_name().into_owned(),
                            tme.columns_count() as usize,
                        )
                    };

                    let names = self.column_names(&schema, &table, column_count).await?;
                    let tme = self.stream.get_tme(table_id).ok_or_else(|| {
                        Error::decoding(format!("no table map for table id {}", table_id))
                    })?;

                    let mut images: Vec<Row> = Vec::new();
                    let mut pairs: Vec<(Row, Row)> = Vec::new();
                    for row in rows_data.rows(tme) {
                        let (before, after) = row.map_err(|e| {
                            Error::decoding(format!(
                                "row image of {}.{} failed to parse: {}",
                                schema, table, e
                            ))
                        })?;
                        match kind {
                            RowsKind::Insert => {
                                images.push(decode_row(require(after.as_ref())?, tme, &names)?);
                            }
                            RowsKind::Update => {
                                pairs.push((
                                    decode_row(require(before.as_ref())?, tme, &names)?,
                                    decode_row(require(after.as_ref())?, tme, &names)?,
                                ));
                            }
                            RowsKind::Delete => {
                                images.push(decode_row(require(before.as_ref())?, tme, &names)?);
                            }
                        }
                    }

                    let schema = (!schema.is_empty()).then_some(schema);
                    let event = match kind {
                        RowsKind::Insert => ChangeEvent::Insert {
                            schema,
                            table,
                            timestamp,
                            rows: images,
                        },
                        RowsKind::Update => ChangeEvent::Update {
                            schema,
                            table,
                            timestamp,
                            rows: pairs,
                        },
                        RowsKind::Delete => ChangeEvent::Delete {
                            schema,
                            table,
                            timestamp,
                            rows: images,
                        },
                    };

                    return Ok(Some(SourcedEvent {
                        event,
                        position: self.position.clone(),
                    }));
                }
                // Table maps are tracked by the stream itself; xid, gtid,
                // format description and heartbeats carry no row data.
                _ => {}
            }
        }
    }

    /// Releases the stream and the metadata connection.
    pub async fn close(self) -> Result<()> {
        self.stream.close().await?;
        self.metadata.disconnect().await?;
        Ok(())
    }

    /// Ordinal-ordered column names for a table, cached after first use.
    ///
    /// `expected` is the column count from the table map; a stale cache
    /// entry (schema drift) is refreshed once before giving up.
    async fn column_names(
        &mut self,
        schema: &str,
        table: &str,
        expected: usize,
    ) -> Result<Arc<Vec<String>>> {
        let key = (schema.to_string(), table.to_string());
        if let Some(names) = self.columns.get(&key) {
            if names.len() == expected {
                return Ok(Arc::clone(names));
            }
            debug!(
                "Column cache for {}.{} is stale ({} cached vs {} in table map), refreshing",
                schema,
                table,
                names.len(),
                expected
            );
            self.columns.remove(&key);
        }

        let names: Vec<String> = self
            .metadata
            .exec(COLUMN_NAMES_QUERY, (schema, table))
            .await?;
        if names.len() != expected {
            return Err(Error::decoding(format!(
                "{}.{} has {} columns in INFORMATION_SCHEMA but {} in the table map",
                schema,
                table,
                names.len(),
                expected
            )));
        }

        debug!("Cached {} column names for {}.{}", names.len(), schema, table);
        let names = Arc::new(names);
        self.columns.insert(key, Arc::clone(&names));
        Ok(names)
    }
}

fn require(image: Option<&BinlogRow>) -> Result<&BinlogRow> {
    image.ok_or_else(|| {
        Error::decoding("row event is missing an expected row image (binlog_row_image=MINIMAL?)")
    })
}

fn decode_row(
    row: &BinlogRow,
    tme: &mysql_async::binlog::events::TableMapEvent<'_>,
    names: &[String],
) -> Result<Row> {
    if row.len() != names.len() {
        return Err(Error::decoding(format!(
            "row image has {} columns, expected {}",
            row.len(),
            names.len()
        )));
    }

    let mut decoded = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let value = row.as_ref(i).ok_or_else(|| {
            Error::decoding(format!("column `{}` is absent from the row image", name))
        })?;
        let column_type = tme
            .get_column_type(i)
            .map_err(|e| Error::decoding(format!("unknown type for column `{}`: {:?}", name, e)))?
            .ok_or_else(|| Error::decoding(format!("no type metadata for column `{}`", name)))?;
        decoded.push((name.clone(), decode_value(value, column_type)?));
    }
    Ok(decoded)
}

fn decode_value(value: &BinlogValue<'_>, column_type: ColumnType) -> Result<SqlValue> {
    match value {
        BinlogValue::Value(plain) => decode_plain(plain, column_type),
        BinlogValue::Jsonb(doc) => {
            let json = serde_json::Value::try_from(doc.clone())
                .map_err(|e| Error::decoding(format!("JSON column failed to decode: {}", e)))?;
            Ok(SqlValue::Json(json))
        }
        BinlogValue::JsonDiff(_) => Err(Error::decoding(
            "partial JSON updates are not supported (binlog_row_value_options=PARTIAL_JSON)",
        )),
    }
}

fn decode_plain(value: &Value, column_type: ColumnType) -> Result<SqlValue> {
    match value {
        Value::NULL => Ok(SqlValue::Null),
        Value::Int(n) => Ok(SqlValue::Int(*n)),
        Value::UInt(n) => Ok(SqlValue::UInt(*n)),
        Value::Float(f) => Ok(SqlValue::Float(*f)),
        Value::Double(f) => Ok(SqlValue::Double(*f)),
        Value::Bytes(bytes) => match column_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                let text = String::from_utf8(bytes.clone()).map_err(|e| {
                    Error::decoding(format!("decimal value is not valid UTF-8: {}", e))
                })?;
                Ok(SqlValue::Decimal(text))
            }
            _ => Ok(SqlValue::Bytes(bytes.clone())),
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                match date {
                    Some(date) => Ok(SqlValue::Date(date)),
                    // Zero dates don't fit chrono; keep their textual form.
                    None => Ok(SqlValue::Text(format!(
                        "{:04}-{:02}-{:02}",
                        year, month, day
                    ))),
                }
            } else {
                let time = NaiveTime::from_hms_micro_opt(
                    u32::from(*hour),
                    u32::from(*minute),
                    u32::from(*second),
                    *micros,
                );
                match (date, time) {
                    (Some(date), Some(time)) => {
                        Ok(SqlValue::DateTime(NaiveDateTime::new(date, time)))
                    }
                    _ => Ok(SqlValue::Text(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))),
                }
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => Ok(SqlValue::Time {
            negative: *negative,
            hours: days * 24 + u32::from(*hours),
            minutes: *minutes,
            seconds: *seconds,
            micros: *micros,
        }),
    }
}

fn is_transaction_bookkeeping(sql: &str) -> bool {
    let trimmed = sql.trim();
    trimmed.eq_ignore_ascii_case("BEGIN") || trimmed.eq_ignore_ascii_case("COMMIT")
}
