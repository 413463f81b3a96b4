//! Test utilities for database testing.
//!
//! Provides an in-memory metadata store with migrations applied, an
//! in-memory upstream store carrying every exported source table, and a
//! warehouse connector that records what it was asked to load.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use datasync::{
    config::SyncConfig,
    connectors::{
        Connector, ConnectorError, LoadOutcome, ProviderMetadata, ProviderType, Registry,
        bigquery::BigQueryConfig,
    },
    crypto::CryptoKey,
    error::SyncError,
    extractor::{ExtractMode, ExtractedDataset, SqlRecordSource},
    server::AppState,
    vault::ValidatedConfig,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};

pub const SERVICE_ACCOUNT_PEM: &str = include_str!("../fixtures/service_account_key.pem");

/// Timestamp every fixture row is created and modified at.
pub const FIXTURE_TS: &str = "2024-05-01T10:00:00+00:00";

/// Rows one seeded tenant exports, reference tables included.
pub const TENANT_FIXTURE_RECORDS: u64 = 18;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

const SOURCE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE "user" (id INTEGER PRIMARY KEY, email TEXT NOT NULL, full_name TEXT, phone TEXT, is_active BOOLEAN NOT NULL, role_id INTEGER, organization_id INTEGER, created_date TEXT, modified_date TEXT)"#,
    "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL, description TEXT, time_limit INTEGER, is_active BOOLEAN NOT NULL, start_time TEXT, end_time TEXT, marks INTEGER, created_by_id INTEGER, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE question (id INTEGER PRIMARY KEY, last_revision_id INTEGER, is_active BOOLEAN NOT NULL, organization_id INTEGER, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE questionrevision (id INTEGER PRIMARY KEY, question_id INTEGER NOT NULL, created_by_id INTEGER NOT NULL, question_text TEXT NOT NULL, instructions TEXT, question_type TEXT NOT NULL, options TEXT, correct_answer TEXT, subjective_answer_limit INTEGER, is_mandatory BOOLEAN NOT NULL, is_active BOOLEAN NOT NULL, marking_scheme TEXT, solution TEXT, media TEXT, is_deleted BOOLEAN NOT NULL, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE candidate (id INTEGER PRIMARY KEY, identity TEXT, user_id INTEGER, is_active BOOLEAN NOT NULL, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE candidatetestanswer (id INTEGER PRIMARY KEY, candidate_test_id INTEGER NOT NULL, question_revision_id INTEGER NOT NULL, response TEXT, time_spent INTEGER, visited BOOLEAN, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE candidatetest (id INTEGER PRIMARY KEY, candidate_id INTEGER NOT NULL, test_id INTEGER NOT NULL, start_time TEXT, end_time TEXT, is_submitted BOOLEAN, consent BOOLEAN, device TEXT, question_revision_ids TEXT, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE candidatetestprofile (id INTEGER PRIMARY KEY, candidate_test_id INTEGER NOT NULL, entity_id INTEGER NOT NULL, created_date TEXT)",
    "CREATE TABLE state (id INTEGER PRIMARY KEY, name TEXT NOT NULL, country_id INTEGER, is_active BOOLEAN NOT NULL, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE district (id INTEGER PRIMARY KEY, name TEXT NOT NULL, state_id INTEGER NOT NULL, is_active BOOLEAN NOT NULL, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE block (id INTEGER PRIMARY KEY, name TEXT NOT NULL, district_id INTEGER NOT NULL, is_active BOOLEAN NOT NULL, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE entity (id INTEGER PRIMARY KEY, name TEXT NOT NULL, description TEXT, entity_type_id INTEGER NOT NULL, state_id INTEGER, district_id INTEGER, block_id INTEGER, is_active BOOLEAN NOT NULL, created_by_id INTEGER, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE entity_type (id INTEGER PRIMARY KEY, name TEXT NOT NULL, description TEXT, organization_id INTEGER NOT NULL, is_active BOOLEAN NOT NULL, created_by_id INTEGER, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE tag (id INTEGER PRIMARY KEY, name TEXT NOT NULL, description TEXT, tag_type_id INTEGER NOT NULL, organization_id INTEGER NOT NULL, is_active BOOLEAN NOT NULL, created_by_id INTEGER, created_date TEXT, modified_date TEXT)",
    "CREATE TABLE questiontag (id INTEGER PRIMARY KEY, question_id INTEGER NOT NULL, tag_id INTEGER NOT NULL, created_date TEXT)",
    "CREATE TABLE test_question (id INTEGER PRIMARY KEY, test_id INTEGER NOT NULL, question_revision_id INTEGER NOT NULL, created_date TEXT)",
];

async fn execute(db: &DatabaseConnection, sql: String) -> Result<()> {
    db.execute(Statement::from_string(db.get_database_backend(), sql))
        .await?;
    Ok(())
}

/// Upstream store with every source table and the shared reference rows.
pub async fn setup_source_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    for ddl in SOURCE_SCHEMA {
        execute(&db, ddl.to_string()).await?;
    }

    let ts = FIXTURE_TS;
    execute(
        &db,
        format!(
            "INSERT INTO state VALUES (1, 'Karnataka', 1, 1, '{ts}', '{ts}'), (2, 'Retired State', 1, 0, '{ts}', '{ts}')"
        ),
    )
    .await?;
    execute(
        &db,
        format!("INSERT INTO district VALUES (1, 'Bengaluru Urban', 1, 1, '{ts}', '{ts}')"),
    )
    .await?;
    execute(
        &db,
        format!("INSERT INTO block VALUES (1, 'Yelahanka', 1, 1, '{ts}', '{ts}')"),
    )
    .await?;
    Ok(db)
}

/// Seeds one organisation's data. Ids are `org * 100 + n`.
///
/// The candidate sits two tests so candidate export must deduplicate.
pub async fn seed_tenant(db: &DatabaseConnection, org: i64) -> Result<()> {
    let b = org * 100;
    let ts = FIXTURE_TS;
    let statements = [
        format!(
            r#"INSERT INTO "user" VALUES ({a}, 'admin{org}@example.org', 'Admin {org}', NULL, 1, 1, {org}, '{ts}', '{ts}'), ({c}, 'candidate{org}@example.org', 'Candidate {org}', '+910000000000', 1, 2, {org}, '{ts}', '{ts}')"#,
            a = b + 1,
            c = b + 2,
        ),
        format!(
            "INSERT INTO test VALUES ({id}, 'Baseline {org}', NULL, 60, 1, NULL, NULL, 100, {u}, '{ts}', '{ts}')",
            id = b + 1,
            u = b + 1,
        ),
        format!(
            "INSERT INTO question VALUES ({id}, {id}, 1, {org}, '{ts}', '{ts}')",
            id = b + 1
        ),
        format!(
            r#"INSERT INTO questionrevision VALUES ({id}, {id}, {id}, 'What is 2 + 2?', NULL, 'single-choice', '[{{"id":1,"key":"A","value":"4"}}]', '[1]', NULL, 1, 1, NULL, NULL, NULL, 0, '{ts}', '{ts}')"#,
            id = b + 1
        ),
        format!(
            "INSERT INTO candidate VALUES ({id}, 'cand-{org}', {u}, 1, '{ts}', '{ts}')",
            id = b + 1,
            u = b + 2,
        ),
        format!(
            r#"INSERT INTO candidatetest VALUES ({a}, {c}, {t}, '{ts}', NULL, 1, 1, NULL, '[{t}]', '{ts}', '{ts}'), ({b2}, {c}, {t}, '{ts}', NULL, 0, 1, NULL, '[{t}]', '{ts}', '{ts}')"#,
            a = b + 1,
            b2 = b + 2,
            c = b + 1,
            t = b + 1,
        ),
        format!(
            r#"INSERT INTO candidatetestanswer VALUES ({id}, {id}, {id}, '[1]', 30, 1, '{ts}', '{ts}')"#,
            id = b + 1
        ),
        format!(
            "INSERT INTO candidatetestprofile VALUES ({id}, {id}, {id}, '{ts}')",
            id = b + 1
        ),
        format!(
            "INSERT INTO entity_type VALUES ({id}, 'School', NULL, {org}, 1, {id}, '{ts}', '{ts}')",
            id = b + 1
        ),
        format!(
            "INSERT INTO entity VALUES ({id}, 'School {org}', NULL, {id}, 1, 1, 1, 1, {id}, '{ts}', '{ts}')",
            id = b + 1
        ),
        format!(
            "INSERT INTO tag VALUES ({id}, 'algebra', NULL, 1, {org}, 1, {id}, '{ts}', '{ts}')",
            id = b + 1
        ),
        format!(
            "INSERT INTO questiontag VALUES ({id}, {id}, {id}, '{ts}')",
            id = b + 1
        ),
        format!(
            "INSERT INTO test_question VALUES ({id}, {id}, {id}, '{ts}')",
            id = b + 1
        ),
    ];
    for sql in statements {
        execute(db, sql).await?;
    }
    Ok(())
}

/// Moves a user's modification time, making it visible to the next incremental pass.
pub async fn touch_user(db: &DatabaseConnection, id: i64, modified: &str) -> Result<()> {
    execute(
        db,
        format!(r#"UPDATE "user" SET modified_date = '{modified}' WHERE id = {id}"#),
    )
    .await
}

pub fn test_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte key")
}

/// Service-account credentials accepted by the BigQuery schema.
pub fn service_account_config(token_uri: &str) -> Value {
    json!({
        "type": "service_account",
        "project_id": "acme-analytics",
        "private_key_id": "4f1c2d3e",
        "private_key": SERVICE_ACCOUNT_PEM,
        "client_email": "exporter@acme-analytics.iam.gserviceaccount.com",
        "client_id": "104920394857",
        "auth_uri": "https://accounts.google.com/o/oauth2/auth",
        "token_uri": token_uri,
        "auth_provider_x509_cert_url": "https://www.googleapis.com/oauth2/v1/certs",
        "client_x509_cert_url": "https://www.googleapis.com/robot/v1/metadata/x509/exporter",
        "dataset_id": "sashakt_data",
    })
}

pub fn default_config() -> Value {
    service_account_config("https://oauth2.googleapis.com/token")
}

/// What [`RecordingConnector`] was handed for one load.
#[derive(Debug, Clone)]
pub struct RecordedLoad {
    pub tenant_id: i64,
    pub dataset_id: String,
    pub mode: ExtractMode,
    pub counts: BTreeMap<String, u64>,
}

/// Warehouse stand-in registered under the BigQuery provider type.
///
/// Uses the real credential schema and namespace field, records every load,
/// and fails loads for the configured tenants.
#[derive(Default)]
pub struct RecordingConnector {
    loads: Mutex<Vec<RecordedLoad>>,
    failing_tenants: HashSet<i64>,
    unreachable: bool,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(tenants: &[i64]) -> Self {
        Self {
            failing_tenants: tenants.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn loads(&self) -> Vec<RecordedLoad> {
        self.loads.lock().expect("loads lock").clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn provider_type(&self) -> ProviderType {
        ProviderType::BigQuery
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::BigQuery,
            display_name: "Recording warehouse".to_string(),
            required_fields: vec!["project_id".to_string()],
            optional_fields: vec!["dataset_id".to_string()],
            namespace_field: Some("dataset_id".to_string()),
        }
    }

    fn validate_config(&self, raw: &Value) -> Result<Value, SyncError> {
        let config = BigQueryConfig::validate(raw)?;
        serde_json::to_value(&config).map_err(|e| SyncError::validation(e.to_string()))
    }

    fn namespace_field(&self) -> Option<&'static str> {
        Some("dataset_id")
    }

    async fn test_connection(&self, _config: &ValidatedConfig) -> Result<bool, ConnectorError> {
        if self.unreachable {
            return Err(ConnectorError::AuthenticationError {
                details: "token exchange failed with status 400".to_string(),
                error_code: Some("invalid_grant".to_string()),
            });
        }
        Ok(true)
    }

    async fn load(
        &self,
        dataset: &ExtractedDataset,
        config: &ValidatedConfig,
    ) -> Result<LoadOutcome, ConnectorError> {
        if self.failing_tenants.contains(&dataset.tenant_id()) {
            return Err(ConnectorError::HttpError {
                status: 503,
                body: Some("backend unavailable".to_string()),
            });
        }

        let counts = dataset.record_counts();
        self.loads.lock().expect("loads lock").push(RecordedLoad {
            tenant_id: dataset.tenant_id(),
            dataset_id: config.get_str("dataset_id").unwrap_or_default().to_string(),
            mode: dataset.mode(),
            counts: counts.clone(),
        });

        Ok(LoadOutcome {
            tables_created: Vec::new(),
            tables_updated: counts.keys().cloned().collect(),
            records_exported: dataset.total_records(),
            loaded_counts: counts,
        })
    }
}

/// Fully wired services over in-memory stores.
pub struct TestApp {
    pub state: AppState,
    pub source: DatabaseConnection,
    pub connector: Arc<RecordingConnector>,
    /// Id of the seeded `bigquery` provider
    pub provider_id: i32,
}

pub async fn build_app(connector: RecordingConnector) -> Result<TestApp> {
    build_app_with_key(connector, test_key()).await
}

pub async fn build_app_with_key(connector: RecordingConnector, key: CryptoKey) -> Result<TestApp> {
    let db = setup_test_db().await?;
    let source = setup_source_db().await?;
    let connector = Arc::new(connector);

    let mut connectors = Registry::new();
    connectors.register(connector.clone());

    let state = AppState::assemble(
        db,
        connectors,
        key,
        Arc::new(SqlRecordSource::new(source.clone())),
        &SyncConfig::default(),
    );
    let provider = state
        .registry
        .create_provider("BIGQUERY", "bigquery", Some("Warehouse export".to_string()))
        .await?;

    Ok(TestApp {
        state,
        source,
        connector,
        provider_id: provider.id,
    })
}
