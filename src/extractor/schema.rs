//! Warehouse-facing table schemas.

use serde::Serialize;
use serde_json::Value;

use super::Row;

/// Column type in the target warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

/// Columns of one exported table plus its layout hints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
    /// Day-partitioning column, when the table has a `created_date` timestamp
    pub partition_field: Option<String>,
    pub clustering_fields: Vec<String>,
}

const PARTITION_COLUMN: &str = "created_date";

impl TableSchema {
    pub fn new(fields: Vec<FieldSchema>, clustering_fields: Vec<String>) -> Self {
        let partition_field = fields
            .iter()
            .find(|f| f.name == PARTITION_COLUMN && f.field_type == FieldType::Timestamp)
            .map(|f| f.name.clone());
        Self {
            fields,
            partition_field,
            clustering_fields,
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Derives a schema from record shapes.
    ///
    /// Every inferred column is nullable. Integer and float mix to float;
    /// any other conflict, and columns that are only ever null, become strings.
    pub fn infer(rows: &[Row]) -> Self {
        let mut columns: Vec<(String, Option<FieldType>)> = Vec::new();

        for row in rows {
            for (key, value) in row {
                let observed = infer_value_type(value);
                match columns.iter_mut().find(|(name, _)| name == key) {
                    Some((_, current)) => *current = merge_types(*current, observed),
                    None => columns.push((key.clone(), observed)),
                }
            }
        }

        let fields = columns
            .into_iter()
            .map(|(name, field_type)| FieldSchema {
                name,
                field_type: field_type.unwrap_or(FieldType::String),
                mode: FieldMode::Nullable,
            })
            .collect();

        Self::new(fields, Vec::new())
    }
}

fn infer_value_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        Value::Number(_) => Some(FieldType::Float),
        Value::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => {
            Some(FieldType::Timestamp)
        }
        Value::String(_) => Some(FieldType::String),
        Value::Array(_) | Value::Object(_) => Some(FieldType::Json),
    }
}

fn merge_types(current: Option<FieldType>, observed: Option<FieldType>) -> Option<FieldType> {
    match (current, observed) {
        (None, t) | (t, None) => t,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(FieldType::Integer), Some(FieldType::Float))
        | (Some(FieldType::Float), Some(FieldType::Integer)) => Some(FieldType::Float),
        _ => Some(FieldType::String),
    }
}
