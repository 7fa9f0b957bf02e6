use chrono::{NaiveDate, NaiveDateTime};

use crate::checkpoint::BinlogPosition;

/// A decoded column value as it appears in a row image.
///
/// Variants mirror what the binlog actually carries: numeric values keep
/// their signedness, temporal values keep their components, and string-ish
/// columns arrive as raw bytes whose character set is unknown at this
/// layer. JSON documents are fully materialized with text keys before they
/// leave the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// Decimal rendered in its textual form, e.g. `123.45`
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time {
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        micros: u32,
    },
    Json(serde_json::Value),
}

/// A row image: column name/value pairs in table column order.
///
/// Order matters: it becomes the column order of generated statements.
pub type Row = Vec<(String, SqlValue)>;

/// A single decoded change from the source binlog.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A statement-level event (DDL or other raw SQL) replayed verbatim.
    Statement {
        schema: Option<String>,
        sql: String,
        timestamp: i64,
    },
    /// One or more inserted rows.
    Insert {
        schema: Option<String>,
        table: String,
        timestamp: i64,
        rows: Vec<Row>,
    },
    /// One or more updated rows as (before, after) image pairs.
    Update {
        schema: Option<String>,
        table: String,
        timestamp: i64,
        rows: Vec<(Row, Row)>,
    },
    /// One or more deleted rows.
    Delete {
        schema: Option<String>,
        table: String,
        timestamp: i64,
        rows: Vec<Row>,
    },
}

impl ChangeEvent {
    /// Seconds-since-epoch origin timestamp of the change.
    pub fn timestamp(&self) -> i64 {
        match self {
            ChangeEvent::Statement { timestamp, .. }
            | ChangeEvent::Insert { timestamp, .. }
            | ChangeEvent::Update { timestamp, .. }
            | ChangeEvent::Delete { timestamp, .. } => *timestamp,
        }
    }
}

/// A change event together with the binlog position it was read from.
#[derive(Debug, Clone)]
pub struct SourcedEvent {
    pub event: ChangeEvent,
    pub position: BinlogPosition,
}
