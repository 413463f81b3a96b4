//! [`RecordSource`] over the upstream relational store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, FromQueryResult, JsonValue, Statement,
};
use serde_json::Value;

use super::catalog::TableSpec;
use super::{RecordSource, Row};
use crate::error::SyncError;

/// Reads catalog tables with parameterised SQL, decoding each row to JSON.
#[derive(Clone)]
pub struct SqlRecordSource {
    db: DatabaseConnection,
}

impl SqlRecordSource {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordSource for SqlRecordSource {
    async fn fetch(
        &self,
        spec: &TableSpec,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Row>, SyncError> {
        let backend = self.db.get_database_backend();
        let (sql, values) = spec.select_statement(backend, tenant_id, since);

        let rows = JsonValue::find_by_statement(Statement::from_sql_and_values(
            backend, sql, values,
        ))
        .all(&self.db)
        .await
        .map_err(|e| SyncError::Extraction(format!("{}: {}", spec.name, e)))?;

        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => {
                    ensure_declared_columns(spec, &map)?;
                    Ok(map)
                }
                other => Err(SyncError::Extraction(format!(
                    "{}: expected a row object, got {}",
                    spec.name, other
                ))),
            })
            .collect()
    }

    async fn count(
        &self,
        spec: &TableSpec,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, SyncError> {
        let backend = self.db.get_database_backend();
        let (sql, values) = spec.count_statement(backend, tenant_id, since);

        let row = self
            .db
            .query_one(Statement::from_sql_and_values(backend, sql, values))
            .await
            .map_err(|e| SyncError::Extraction(format!("{}: {}", spec.name, e)))?
            .ok_or_else(|| SyncError::Extraction(format!("{}: count returned no row", spec.name)))?;

        let n: i64 = row
            .try_get("", "n")
            .map_err(|e| SyncError::Extraction(format!("{}: {}", spec.name, e)))?;
        Ok(n.max(0) as u64)
    }
}

/// Every declared column must be in the row; the JSON decoder drops columns
/// whose type it cannot read.
fn ensure_declared_columns(spec: &TableSpec, row: &Row) -> Result<(), SyncError> {
    let missing: Vec<&str> = spec
        .columns
        .iter()
        .map(|c| c.name)
        .filter(|name| !row.contains_key(*name))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Extraction(format!(
            "{}: columns could not be decoded: {}",
            spec.name,
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::catalog::find;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn null_columns_count_as_present() {
        let spec = find("tags").unwrap();
        let mut map = Row::new();
        for column in spec.columns {
            map.insert(column.name.to_string(), Value::Null);
        }
        assert!(ensure_declared_columns(spec, &map).is_ok());
    }

    #[test]
    fn dropped_column_is_an_extraction_error() {
        let spec = find("question_tags").unwrap();
        let map = row(json!({ "id": 1, "question_id": 2, "created_date": null }));

        match ensure_declared_columns(spec, &map) {
            Err(SyncError::Extraction(message)) => {
                assert!(message.starts_with("question_tags:"), "{message}");
                assert!(message.contains("tag_id"), "{message}");
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }
}
