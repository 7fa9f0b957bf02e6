//! Column value to SQL literal rendering.
//!
//! Escaping is minimal on purpose: embedded single quotes are doubled and
//! nothing else is touched. That matches what the target parses for
//! ordinary string literals but is not a complete SQL-escaping strategy
//! (backslashes in `NO_BACKSLASH_ESCAPES`-off mode, control characters and
//! multibyte edge cases are not handled). Replication input comes from the
//! source database's own binlog, not from untrusted clients.

use crate::binlog::SqlValue;
use crate::{Error, Result};

/// Renders a single column value as a SQL literal fragment.
///
/// Numeric values are emitted unquoted in their natural decimal form,
/// everything else as a single-quoted literal with embedded quotes
/// doubled. Fails only when a byte value is not valid UTF-8.
pub fn encode(value: &SqlValue) -> Result<String> {
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Int(n) => Ok(n.to_string()),
        SqlValue::UInt(n) => Ok(n.to_string()),
        SqlValue::Float(f) => Ok(f.to_string()),
        SqlValue::Double(f) => Ok(f.to_string()),
        SqlValue::Decimal(d) => Ok(d.clone()),
        SqlValue::Text(s) => Ok(quoted(s)),
        SqlValue::Bytes(b) => {
            let text = std::str::from_utf8(b)
                .map_err(|e| Error::encoding(format!("byte value is not valid UTF-8: {}", e)))?;
            Ok(quoted(text))
        }
        SqlValue::Date(d) => Ok(quoted(&d.format("%Y-%m-%d").to_string())),
        SqlValue::DateTime(dt) => Ok(quoted(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
        SqlValue::Time {
            negative,
            hours,
            minutes,
            seconds,
            micros,
        } => {
            let sign = if *negative { "-" } else { "" };
            let text = if *micros > 0 {
                format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, minutes, seconds, micros)
            } else {
                format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds)
            };
            Ok(quoted(&text))
        }
        SqlValue::Json(doc) => {
            // serde_json keeps non-ASCII characters as-is rather than
            // escaping them to \uXXXX sequences.
            let json = serde_json::to_string(doc)
                .map_err(|e| Error::encoding(format!("JSON value failed to serialize: {}", e)))?;
            Ok(quoted(&json))
        }
    }
}

/// Doubles embedded single quotes. The sole escaping rule.
pub fn escape(text: &str) -> String {
    text.replace('\'', "''")
}

fn quoted(text: &str) -> String {
    format!("'{}'", escape(text))
}
