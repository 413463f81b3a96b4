//! Exportable tables and how each one is scoped to a tenant.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseBackend, Value};

use super::schema::{FieldMode, FieldSchema, FieldType, TableSchema};
use FieldType::{Boolean as BOOL, Integer as INT, Json as JSON, String as STR, Timestamp as TS};

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub field_type: FieldType,
    pub mode: FieldMode,
}

const fn req(name: &'static str, field_type: FieldType) -> ColumnDef {
    ColumnDef {
        name,
        field_type,
        mode: FieldMode::Required,
    }
}

const fn opt(name: &'static str, field_type: FieldType) -> ColumnDef {
    ColumnDef {
        name,
        field_type,
        mode: FieldMode::Nullable,
    }
}

/// How rows of a source table are tied to a tenant.
#[derive(Debug, Clone, Copy)]
pub enum TenantScope {
    /// `t.<column> = tenant`
    Column(&'static str),
    /// Joins from `t` up to a table carrying the tenant column.
    Joined {
        joins: &'static str,
        tenant_column: &'static str,
    },
    /// Shared reference data; only active rows are exported.
    ActiveReference,
}

/// One exportable logical table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Logical name, also the target table name before any prefix
    pub name: &'static str,
    /// Upstream table, aliased `t` in generated SQL
    pub source: &'static str,
    pub columns: &'static [ColumnDef],
    pub scope: TenantScope,
    /// Compared against the watermark in incremental mode
    pub change_column: &'static str,
    pub distinct: bool,
    pub clustering: &'static [&'static str],
}

const CANDIDATE_TEST_CHAIN: &str = r#"JOIN candidatetest ct ON t.candidate_test_id = ct.id JOIN test tt ON ct.test_id = tt.id JOIN "user" u ON tt.created_by_id = u.id"#;

/// All tables exported for a tenant, in load order.
pub static CATALOG: &[TableSpec] = &[
    TableSpec {
        name: "users",
        source: r#""user""#,
        columns: &[
            req("id", INT),
            req("email", STR),
            opt("full_name", STR),
            opt("phone", STR),
            req("is_active", BOOL),
            opt("role_id", INT),
            opt("organization_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Column("organization_id"),
        change_column: "modified_date",
        distinct: false,
        clustering: &[],
    },
    TableSpec {
        name: "tests",
        source: "test",
        columns: &[
            req("id", INT),
            req("name", STR),
            opt("description", STR),
            opt("time_limit", INT),
            req("is_active", BOOL),
            opt("start_time", TS),
            opt("end_time", TS),
            opt("marks", INT),
            opt("created_by_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: r#"JOIN "user" u ON t.created_by_id = u.id"#,
            tenant_column: "u.organization_id",
        },
        change_column: "modified_date",
        distinct: false,
        clustering: &[],
    },
    TableSpec {
        name: "questions",
        source: "question",
        columns: &[
            req("id", INT),
            opt("last_revision_id", INT),
            req("is_active", BOOL),
            opt("organization_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Column("organization_id"),
        change_column: "modified_date",
        distinct: false,
        clustering: &[],
    },
    TableSpec {
        name: "question_revisions",
        source: "questionrevision",
        columns: &[
            req("id", INT),
            req("question_id", INT),
            req("created_by_id", INT),
            req("question_text", STR),
            opt("instructions", STR),
            req("question_type", STR),
            opt("options", JSON),
            opt("correct_answer", JSON),
            opt("subjective_answer_limit", INT),
            req("is_mandatory", BOOL),
            req("is_active", BOOL),
            opt("marking_scheme", JSON),
            opt("solution", STR),
            opt("media", JSON),
            req("is_deleted", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: "JOIN question q ON t.question_id = q.id",
            tenant_column: "q.organization_id",
        },
        change_column: "modified_date",
        distinct: false,
        clustering: &["question_id", "created_by_id"],
    },
    TableSpec {
        name: "candidates",
        source: "candidate",
        columns: &[
            req("id", INT),
            opt("identity", STR),
            opt("user_id", INT),
            req("is_active", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: r#"JOIN candidatetest ct ON ct.candidate_id = t.id JOIN test tt ON ct.test_id = tt.id JOIN "user" u ON tt.created_by_id = u.id"#,
            tenant_column: "u.organization_id",
        },
        change_column: "modified_date",
        distinct: true,
        clustering: &[],
    },
    TableSpec {
        name: "candidate_test_answers",
        source: "candidatetestanswer",
        columns: &[
            req("id", INT),
            req("candidate_test_id", INT),
            req("question_revision_id", INT),
            opt("response", JSON),
            opt("time_spent", INT),
            opt("visited", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: CANDIDATE_TEST_CHAIN,
            tenant_column: "u.organization_id",
        },
        change_column: "modified_date",
        distinct: false,
        clustering: &["candidate_test_id", "question_revision_id"],
    },
    TableSpec {
        name: "candidate_tests",
        source: "candidatetest",
        columns: &[
            req("id", INT),
            req("candidate_id", INT),
            req("test_id", INT),
            opt("start_time", TS),
            opt("end_time", TS),
            opt("is_submitted", BOOL),
            opt("consent", BOOL),
            opt("device", JSON),
            opt("question_revision_ids", JSON),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: r#"JOIN test tt ON t.test_id = tt.id JOIN "user" u ON tt.created_by_id = u.id"#,
            tenant_column: "u.organization_id",
        },
        change_column: "modified_date",
        distinct: false,
        clustering: &["candidate_id", "test_id"],
    },
    TableSpec {
        name: "candidate_test_profiles",
        source: "candidatetestprofile",
        columns: &[
            req("id", INT),
            req("candidate_test_id", INT),
            req("entity_id", INT),
            opt("created_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: CANDIDATE_TEST_CHAIN,
            tenant_column: "u.organization_id",
        },
        change_column: "created_date",
        distinct: false,
        clustering: &["candidate_test_id", "entity_id"],
    },
    TableSpec {
        name: "states",
        source: "state",
        columns: &[
            req("id", INT),
            req("name", STR),
            opt("country_id", INT),
            req("is_active", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::ActiveReference,
        change_column: "modified_date",
        distinct: false,
        clustering: &[],
    },
    TableSpec {
        name: "districts",
        source: "district",
        columns: &[
            req("id", INT),
            req("name", STR),
            req("state_id", INT),
            req("is_active", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::ActiveReference,
        change_column: "modified_date",
        distinct: false,
        clustering: &["state_id"],
    },
    TableSpec {
        name: "blocks",
        source: "block",
        columns: &[
            req("id", INT),
            req("name", STR),
            req("district_id", INT),
            req("is_active", BOOL),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::ActiveReference,
        change_column: "modified_date",
        distinct: false,
        clustering: &["district_id"],
    },
    TableSpec {
        name: "entities",
        source: "entity",
        columns: &[
            req("id", INT),
            req("name", STR),
            opt("description", STR),
            req("entity_type_id", INT),
            opt("state_id", INT),
            opt("district_id", INT),
            opt("block_id", INT),
            req("is_active", BOOL),
            opt("created_by_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: "JOIN entity_type et ON t.entity_type_id = et.id",
            tenant_column: "et.organization_id",
        },
        change_column: "modified_date",
        distinct: false,
        clustering: &["entity_type_id"],
    },
    TableSpec {
        name: "entity_types",
        source: "entity_type",
        columns: &[
            req("id", INT),
            req("name", STR),
            opt("description", STR),
            req("organization_id", INT),
            req("is_active", BOOL),
            opt("created_by_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Column("organization_id"),
        change_column: "modified_date",
        distinct: false,
        clustering: &["organization_id"],
    },
    TableSpec {
        name: "tags",
        source: "tag",
        columns: &[
            req("id", INT),
            req("name", STR),
            opt("description", STR),
            req("tag_type_id", INT),
            req("organization_id", INT),
            req("is_active", BOOL),
            opt("created_by_id", INT),
            opt("created_date", TS),
            opt("modified_date", TS),
        ],
        scope: TenantScope::Column("organization_id"),
        change_column: "modified_date",
        distinct: false,
        clustering: &["organization_id", "tag_type_id"],
    },
    TableSpec {
        name: "question_tags",
        source: "questiontag",
        columns: &[
            req("id", INT),
            req("question_id", INT),
            req("tag_id", INT),
            opt("created_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: "JOIN question q ON t.question_id = q.id",
            tenant_column: "q.organization_id",
        },
        change_column: "created_date",
        distinct: false,
        clustering: &["question_id", "tag_id"],
    },
    TableSpec {
        name: "test_questions",
        source: "test_question",
        columns: &[
            req("id", INT),
            req("test_id", INT),
            req("question_revision_id", INT),
            opt("created_date", TS),
        ],
        scope: TenantScope::Joined {
            joins: r#"JOIN test tt ON t.test_id = tt.id JOIN "user" u ON tt.created_by_id = u.id"#,
            tenant_column: "u.organization_id",
        },
        change_column: "created_date",
        distinct: false,
        clustering: &["test_id", "question_revision_id"],
    },
];

/// Catalog entry by logical name.
pub fn find(name: &str) -> Option<&'static TableSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

impl TableSpec {
    /// Declared warehouse schema for this table.
    pub fn schema(&self) -> TableSchema {
        let fields = self
            .columns
            .iter()
            .map(|c| FieldSchema {
                name: c.name.to_string(),
                field_type: c.field_type,
                mode: c.mode,
            })
            .collect();
        TableSchema::new(
            fields,
            self.clustering.iter().map(|c| c.to_string()).collect(),
        )
    }

    /// Parameterised `SELECT` for one tenant, optionally bounded below by `since`.
    pub fn select_statement(
        &self,
        backend: DatabaseBackend,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> (String, Vec<Value>) {
        let (from_where, values) = self.from_where(backend, tenant_id, since);
        let columns = self
            .columns
            .iter()
            .map(|c| select_column(backend, c))
            .collect::<Vec<_>>()
            .join(", ");
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        (
            format!("SELECT {}{} {} ORDER BY t.id", distinct, columns, from_where),
            values,
        )
    }

    /// `COUNT(*)` over exactly the rows [`Self::select_statement`] returns.
    pub fn count_statement(
        &self,
        backend: DatabaseBackend,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> (String, Vec<Value>) {
        let (from_where, values) = self.from_where(backend, tenant_id, since);
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        (
            format!(
                "SELECT COUNT(*) AS n FROM (SELECT {}t.id {}) scoped",
                distinct, from_where
            ),
            values,
        )
    }

    fn from_where(
        &self,
        backend: DatabaseBackend,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> (String, Vec<Value>) {
        let mut values: Vec<Value> = Vec::new();
        let mut sql = format!("FROM {} t", self.source);

        match self.scope {
            TenantScope::Column(column) => {
                values.push(tenant_id.into());
                sql.push_str(&format!(
                    " WHERE t.{} = {}",
                    column,
                    placeholder(backend, values.len())
                ));
            }
            TenantScope::Joined {
                joins,
                tenant_column,
            } => {
                values.push(tenant_id.into());
                sql.push_str(&format!(
                    " {} WHERE {} = {}",
                    joins,
                    tenant_column,
                    placeholder(backend, values.len())
                ));
            }
            TenantScope::ActiveReference => {
                sql.push_str(" WHERE t.is_active = TRUE");
            }
        }

        if let Some(watermark) = since {
            values.push(watermark.into());
            sql.push_str(&format!(
                " AND t.{} > {}",
                self.change_column,
                placeholder(backend, values.len())
            ));
        }

        (sql, values)
    }
}

// Postgres enums and domains decode as nothing unless read as text.
fn select_column(backend: DatabaseBackend, column: &ColumnDef) -> String {
    match (backend, column.field_type) {
        (DatabaseBackend::Postgres, FieldType::String) => {
            format!("CAST(t.{0} AS TEXT) AS {0}", column.name)
        }
        _ => format!("t.{}", column.name),
    }
}

fn placeholder(backend: DatabaseBackend, index: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${}", index),
        _ => "?".to_string(),
    }
}
