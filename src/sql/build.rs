//! Change event to SQL statement translation.
//!
//! Each row in an event becomes exactly one statement, in the event's row
//! order. The builder never executes or enqueues anything; it is a pure
//! transformation from decoded events to statement strings.

use crate::binlog::{ChangeEvent, Row, SqlValue};
use crate::sql::encode;
use crate::Result;

/// The unit handed to the execution worker. Immutable once built.
#[derive(Debug, Clone)]
pub struct ReplicationStatement {
    pub sql: String,
    /// Seconds-since-epoch origin timestamp of the change this statement
    /// replays.
    pub source_timestamp: i64,
}

/// Translates one change event into its statements, one entry per row.
///
/// A row whose values cannot be encoded yields an `Err` entry for that row
/// only; sibling rows still translate. Row order is preserved; the
/// serialized worker relies on it.
pub fn build(event: &ChangeEvent) -> Vec<Result<ReplicationStatement>> {
    match event {
        ChangeEvent::Statement { sql, timestamp, .. } => {
            vec![Ok(ReplicationStatement {
                sql: sql.clone(),
                source_timestamp: *timestamp,
            })]
        }
        ChangeEvent::Insert {
            schema,
            table,
            timestamp,
            rows,
        } => rows
            .iter()
            .map(|row| {
                build_insert(schema.as_deref(), table, row).map(|sql| ReplicationStatement {
                    sql,
                    source_timestamp: *timestamp,
                })
            })
            .collect(),
        ChangeEvent::Update {
            schema,
            table,
            timestamp,
            rows,
        } => rows
            .iter()
            .map(|(before, after)| {
                build_update(schema.as_deref(), table, before, after).map(|sql| {
                    ReplicationStatement {
                        sql,
                        source_timestamp: *timestamp,
                    }
                })
            })
            .collect(),
        ChangeEvent::Delete {
            schema,
            table,
            timestamp,
            rows,
        } => rows
            .iter()
            .map(|row| {
                build_delete(schema.as_deref(), table, row).map(|sql| ReplicationStatement {
                    sql,
                    source_timestamp: *timestamp,
                })
            })
            .collect(),
    }
}

fn build_insert(schema: Option<&str>, table: &str, row: &Row) -> Result<String> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (name, value) in row {
        columns.push(format!("`{}`", name));
        values.push(encode(value)?);
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({});",
        qualified_table(schema, table),
        columns.join(","),
        values.join(",")
    ))
}

fn build_update(schema: Option<&str>, table: &str, before: &Row, after: &Row) -> Result<String> {
    let mut assignments = Vec::with_capacity(after.len());
    for (name, value) in after {
        assignments.push(format!("`{}`={}", name, encode(value)?));
    }

    Ok(format!(
        "UPDATE {} SET {} WHERE {};",
        qualified_table(schema, table),
        assignments.join(","),
        where_clause(before)?
    ))
}

fn build_delete(schema: Option<&str>, table: &str, row: &Row) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE {};",
        qualified_table(schema, table),
        where_clause(row)?
    ))
}

fn where_clause(row: &Row) -> Result<String> {
    let mut predicates = Vec::with_capacity(row.len());
    for (name, value) in row {
        predicates.push(predicate(name, value)?);
    }
    Ok(predicates.join(" AND "))
}

/// Match predicate for one before-image column.
///
/// NULL columns compare with `IS NULL` (a `=NULL` predicate never matches).
/// JSON columns use `JSON_CONTAINS` because exact equality on JSON columns
/// is unreliable across normalization; containment can match more rows than
/// the original before-image did, so it is an approximation.
fn predicate(name: &str, value: &SqlValue) -> Result<String> {
    match value {
        SqlValue::Null => Ok(format!("`{}` IS NULL", name)),
        SqlValue::Json(_) => Ok(format!("JSON_CONTAINS(`{}`, {})", name, encode(value)?)),
        _ => Ok(format!("`{}`={}", name, encode(value)?)),
    }
}

fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("`{}`.`{}`", schema, table),
        None => format!("`{}`", table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn single(event: &ChangeEvent) -> ReplicationStatement {
        let mut built = build(event);
        assert_eq!(built.len(), 1);
        built.remove(0).unwrap()
    }

    #[test]
    fn insert_with_embedded_quote() {
        let event = ChangeEvent::Insert {
            schema: Some("s".to_string()),
            table: "t".to_string(),
            timestamp: 1_700_000_000,
            rows: vec![row(&[
                ("id", SqlValue::Int(1)),
                ("name", SqlValue::Text("a'b".to_string())),
            ])],
        };

        let stmt = single(&event);
        assert_eq!(
            stmt.sql,
            "INSERT INTO `s`.`t` (`id`,`name`) VALUES (1,'a''b');"
        );
        assert_eq!(stmt.source_timestamp, 1_700_000_000);
    }

    #[test]
    fn insert_without_schema_uses_bare_table() {
        let event = ChangeEvent::Insert {
            schema: None,
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![row(&[("id", SqlValue::Int(7))])],
        };

        assert_eq!(single(&event).sql, "INSERT INTO `t` (`id`) VALUES (7);");
    }

    #[test]
    fn update_set_and_where_clauses() {
        let event = ChangeEvent::Update {
            schema: Some("s".to_string()),
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![(
                row(&[("id", SqlValue::Int(1))]),
                row(&[
                    ("id", SqlValue::Int(1)),
                    ("name", SqlValue::Text("x".to_string())),
                ]),
            )],
        };

        let stmt = single(&event);
        assert_eq!(
            stmt.sql,
            "UPDATE `s`.`t` SET `id`=1,`name`='x' WHERE `id`=1;"
        );
    }

    #[test]
    fn update_set_renders_null_as_assignment() {
        let event = ChangeEvent::Update {
            schema: None,
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![(
                row(&[("id", SqlValue::Int(1))]),
                row(&[("id", SqlValue::Int(1)), ("note", SqlValue::Null)]),
            )],
        };

        assert_eq!(
            single(&event).sql,
            "UPDATE `t` SET `id`=1,`note`=NULL WHERE `id`=1;"
        );
    }

    #[test]
    fn delete_null_column_uses_is_null() {
        let event = ChangeEvent::Delete {
            schema: Some("s".to_string()),
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![row(&[
                ("id", SqlValue::Int(3)),
                ("note", SqlValue::Null),
            ])],
        };

        let sql = single(&event).sql;
        assert_eq!(
            sql,
            "DELETE FROM `s`.`t` WHERE `id`=3 AND `note` IS NULL;"
        );
        assert!(!sql.contains("`note`=NULL"));
    }

    #[test]
    fn json_before_image_uses_containment() {
        let event = ChangeEvent::Delete {
            schema: None,
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![row(&[("attrs", SqlValue::Json(json!({"a": 1})))])],
        };

        assert_eq!(
            single(&event).sql,
            r#"DELETE FROM `t` WHERE JSON_CONTAINS(`attrs`, '{"a":1}');"#
        );
    }

    #[test]
    fn raw_statement_passes_through_unmodified() {
        let event = ChangeEvent::Statement {
            schema: Some("s".to_string()),
            sql: "ALTER TABLE t ADD COLUMN c INT".to_string(),
            timestamp: 5,
        };

        let stmt = single(&event);
        assert_eq!(stmt.sql, "ALTER TABLE t ADD COLUMN c INT");
        assert_eq!(stmt.source_timestamp, 5);
    }

    #[test]
    fn multi_row_event_preserves_row_order() {
        let event = ChangeEvent::Insert {
            schema: None,
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![
                row(&[("id", SqlValue::Int(1))]),
                row(&[("id", SqlValue::Int(2))]),
                row(&[("id", SqlValue::Int(3))]),
            ],
        };

        let sqls: Vec<String> = build(&event)
            .into_iter()
            .map(|r| r.unwrap().sql)
            .collect();
        assert_eq!(
            sqls,
            vec![
                "INSERT INTO `t` (`id`) VALUES (1);",
                "INSERT INTO `t` (`id`) VALUES (2);",
                "INSERT INTO `t` (`id`) VALUES (3);",
            ]
        );
    }

    #[test]
    fn failing_row_does_not_fail_siblings() {
        let event = ChangeEvent::Insert {
            schema: None,
            table: "t".to_string(),
            timestamp: 0,
            rows: vec![
                row(&[("data", SqlValue::Bytes(vec![0xff]))]),
                row(&[("data", SqlValue::Text("ok".to_string()))]),
            ],
        };

        let built = build(&event);
        assert_eq!(built.len(), 2);
        assert!(built[0].is_err());
        assert_eq!(
            built[1].as_ref().unwrap().sql,
            "INSERT INTO `t` (`data`) VALUES ('ok');"
        );
    }
}
