//! Thin REST client for the BigQuery v2 API.
//!
//! Authenticates with a service-account JWT grant and exposes only the calls
//! the exporter needs: dataset and table provisioning, multipart load jobs,
//! and parameterised queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::config::BigQueryConfig;
use crate::connectors::ConnectorError;
use crate::extractor::Row;
use crate::extractor::schema::{FieldMode, FieldSchema, FieldType, TableSchema};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DATASET_LOCATION: &str = "US";
pub const SYNC_METADATA_TABLE: &str = "sync_metadata";
const MAX_JOB_POLLS: u32 = 600;

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// How a load job treats rows already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Truncate,
    Append,
}

impl WriteDisposition {
    fn as_str(self) -> &'static str {
        match self {
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
            WriteDisposition::Append => "WRITE_APPEND",
        }
    }
}

/// Typed query parameter.
#[derive(Debug, Clone)]
pub enum QueryParam {
    String(String),
    Int64(Option<i64>),
    Timestamp(DateTime<Utc>),
}

impl QueryParam {
    fn to_json(&self, name: &str) -> Value {
        let (type_name, value) = match self {
            QueryParam::String(s) => ("STRING", Value::String(s.clone())),
            QueryParam::Int64(Some(n)) => ("INT64", Value::String(n.to_string())),
            QueryParam::Int64(None) => ("INT64", Value::Null),
            QueryParam::Timestamp(ts) => (
                "TIMESTAMP",
                Value::String(ts.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()),
            ),
        };
        json!({
            "name": name,
            "parameterType": { "type": type_name },
            "parameterValue": { "value": value },
        })
    }
}

/// Authenticated session against one project.
pub struct BigQueryClient {
    http: Client,
    api_base: String,
    project_id: String,
    access_token: String,
    poll_interval: Duration,
}

impl BigQueryClient {
    /// Exchanges the service-account key for an access token.
    pub async fn authenticate(
        http: Client,
        api_base: &str,
        config: &BigQueryConfig,
        poll_interval: Duration,
    ) -> Result<Self, ConnectorError> {
        let now = Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &config.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &config.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(config.private_key_id.clone());

        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes()).map_err(|e| {
            ConnectorError::AuthenticationError {
                details: format!("private key could not be parsed: {}", e),
                error_code: Some("invalid_private_key".to_string()),
            }
        })?;
        let assertion = jsonwebtoken::encode(&header, &claims, &key).map_err(|e| {
            ConnectorError::AuthenticationError {
                details: format!("could not sign token request: {}", e),
                error_code: None,
            }
        })?;

        let response = http
            .post(&config.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error_code = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string));
            return Err(ConnectorError::AuthenticationError {
                details: format!("token exchange failed with status {}", status.as_u16()),
                error_code,
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| ConnectorError::MalformedResponse {
                    details: format!("token response: {}", e),
                })?;

        debug!(project_id = %config.project_id, "Obtained BigQuery access token");

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            access_token: token.access_token,
            poll_interval,
        })
    }

    fn project_url(&self) -> String {
        format!("{}/bigquery/v2/projects/{}", self.api_base, self.project_id)
    }

    /// Runs a standard-SQL query and returns its rows in the REST `f`/`v` shape.
    pub async fn query(
        &self,
        sql: &str,
        params: &[(&str, QueryParam)],
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
        });
        if !params.is_empty() {
            body["parameterMode"] = json!("NAMED");
            body["queryParameters"] = params
                .iter()
                .map(|(name, param)| param.to_json(name))
                .collect();
        }

        let response = self
            .http
            .post(format!("{}/queries", self.project_url()))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let mut result: Value = parse_json(check_status(response).await?).await?;

        let mut polls = 0;
        while result.get("jobComplete").and_then(Value::as_bool) == Some(false) {
            polls += 1;
            if polls > MAX_JOB_POLLS {
                return Err(ConnectorError::NetworkError {
                    details: "query did not complete in time".to_string(),
                    retryable: true,
                });
            }
            let job_id = job_id_of(&result)?;
            let location = result["jobReference"]["location"]
                .as_str()
                .unwrap_or(DATASET_LOCATION)
                .to_string();
            tokio::time::sleep(self.poll_interval).await;
            let response = self
                .http
                .get(format!("{}/queries/{}", self.project_url(), job_id))
                .query(&[("location", location.as_str())])
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(network_error)?;
            result = parse_json(check_status(response).await?).await?;
        }

        Ok(result
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// `SELECT 1` probe; true only when the single expected row comes back.
    pub async fn select_one(&self) -> Result<bool, ConnectorError> {
        let rows = self.query("SELECT 1", &[]).await?;
        let value = rows
            .first()
            .and_then(|row| row["f"][0]["v"].as_str())
            .map(str::to_string);
        Ok(rows.len() == 1 && value.as_deref() == Some("1"))
    }

    /// Returns true when the dataset had to be created.
    pub async fn ensure_dataset(
        &self,
        dataset_id: &str,
        tenant_id: i64,
    ) -> Result<bool, ConnectorError> {
        let url = format!("{}/datasets/{}", self.project_url(), dataset_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(network_error)?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response).await?;
            return Ok(false);
        }

        let body = json!({
            "datasetReference": {
                "projectId": self.project_id,
                "datasetId": dataset_id,
            },
            "location": DATASET_LOCATION,
            "description": format!("Data export for tenant {}", tenant_id),
        });
        let response = self
            .http
            .post(format!("{}/datasets", self.project_url()))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        check_status(response).await?;
        info!(dataset_id, tenant_id, "Created BigQuery dataset");
        Ok(true)
    }

    /// Returns true when the table had to be created.
    pub async fn ensure_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        schema: &TableSchema,
    ) -> Result<bool, ConnectorError> {
        let url = format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(),
            dataset_id,
            table_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(network_error)?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response).await?;
            return Ok(false);
        }

        let mut body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": dataset_id,
                "tableId": table_id,
            },
            "schema": { "fields": schema.fields },
        });
        if let Some(field) = &schema.partition_field {
            body["timePartitioning"] = json!({ "type": "DAY", "field": field });
        }
        if !schema.clustering_fields.is_empty() {
            body["clustering"] = json!({ "fields": schema.clustering_fields });
        }

        let response = self
            .http
            .post(format!("{}/datasets/{}/tables", self.project_url(), dataset_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        check_status(response).await?;
        debug!(dataset_id, table_id, "Created BigQuery table");
        Ok(true)
    }

    /// Uploads `rows` as newline-delimited JSON and waits for the load job.
    ///
    /// Returns the number of rows the job reports as written.
    pub async fn load_rows(
        &self,
        dataset_id: &str,
        table_id: &str,
        schema: &TableSchema,
        rows: &[Row],
        disposition: WriteDisposition,
    ) -> Result<u64, ConnectorError> {
        let config = json!({
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": dataset_id,
                        "tableId": table_id,
                    },
                    "schema": { "fields": schema.fields },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": disposition.as_str(),
                    "createDisposition": "CREATE_IF_NEEDED",
                }
            }
        });

        let mut ndjson = String::new();
        for row in rows {
            let line = serde_json::to_string(&encode_row(row)).map_err(|e| {
                ConnectorError::MalformedResponse {
                    details: format!("row could not be serialised: {}", e),
                }
            })?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let boundary = format!("datasync_{}", uuid::Uuid::new_v4().simple());
        let body = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{config}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
            b = boundary,
            config = config,
            data = ndjson,
        );

        let response = self
            .http
            .post(format!(
                "{}/upload/bigquery/v2/projects/{}/jobs",
                self.api_base, self.project_id
            ))
            .query(&[("uploadType", "multipart")])
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(network_error)?;
        let job: Value = parse_json(check_status(response).await?).await?;
        let job = self.wait_for_job(job).await?;

        let output_rows = job["statistics"]["load"]["outputRows"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(rows.len() as u64);
        debug!(dataset_id, table_id, output_rows, "Load job finished");
        Ok(output_rows)
    }

    async fn wait_for_job(&self, mut job: Value) -> Result<Value, ConnectorError> {
        let job_id = job_id_of(&job)?;
        let location = job["jobReference"]["location"]
            .as_str()
            .unwrap_or(DATASET_LOCATION)
            .to_string();

        let mut polls = 0;
        loop {
            if job["status"]["state"].as_str() == Some("DONE") {
                if let Some(error) = job["status"].get("errorResult") {
                    let details = error["message"]
                        .as_str()
                        .unwrap_or("load job reported an error")
                        .to_string();
                    warn!(job_id = %job_id, %details, "BigQuery job failed");
                    return Err(ConnectorError::JobFailed { job_id, details });
                }
                return Ok(job);
            }

            polls += 1;
            if polls > MAX_JOB_POLLS {
                return Err(ConnectorError::JobFailed {
                    job_id,
                    details: "job did not finish in time".to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(format!("{}/jobs/{}", self.project_url(), job_id))
                .query(&[("location", location.as_str())])
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(network_error)?;
            job = parse_json(check_status(response).await?).await?;
        }
    }

    /// Empties a table without touching its schema or partitioning.
    pub async fn truncate_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<(), ConnectorError> {
        let sql = format!(
            "TRUNCATE TABLE `{}.{}.{}`",
            self.project_id, dataset_id, table_id
        );
        self.query(&sql, &[]).await?;
        Ok(())
    }

    /// Records a table's sync in `<dataset>.sync_metadata`.
    ///
    /// A `None` max id keeps whatever id was recorded before.
    pub async fn record_table_sync(
        &self,
        dataset_id: &str,
        table_name: &str,
        synced_at: DateTime<Utc>,
        max_id: Option<i64>,
    ) -> Result<(), ConnectorError> {
        let sql = format!(
            "MERGE `{project}.{dataset}.{table}` T \
             USING (SELECT @table_name AS table_name, @synced_at AS last_sync_timestamp, @max_id AS last_synced_id) S \
             ON T.table_name = S.table_name \
             WHEN MATCHED THEN UPDATE SET \
               last_sync_timestamp = S.last_sync_timestamp, \
               last_synced_id = COALESCE(S.last_synced_id, T.last_synced_id), \
               updated_at = CURRENT_TIMESTAMP() \
             WHEN NOT MATCHED THEN INSERT (table_name, last_sync_timestamp, last_synced_id, created_at, updated_at) \
               VALUES (S.table_name, S.last_sync_timestamp, S.last_synced_id, CURRENT_TIMESTAMP(), CURRENT_TIMESTAMP())",
            project = self.project_id,
            dataset = dataset_id,
            table = SYNC_METADATA_TABLE,
        );

        self.query(
            &sql,
            &[
                ("table_name", QueryParam::String(table_name.to_string())),
                ("synced_at", QueryParam::Timestamp(synced_at)),
                ("max_id", QueryParam::Int64(max_id)),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Schema of the per-dataset sync bookkeeping table.
pub fn sync_metadata_schema() -> TableSchema {
    let field = |name: &str, field_type, mode| FieldSchema {
        name: name.to_string(),
        field_type,
        mode,
    };
    TableSchema {
        fields: vec![
            field("table_name", FieldType::String, FieldMode::Required),
            field("last_sync_timestamp", FieldType::Timestamp, FieldMode::Required),
            field("last_synced_id", FieldType::Integer, FieldMode::Nullable),
            field("created_at", FieldType::Timestamp, FieldMode::Required),
            field("updated_at", FieldType::Timestamp, FieldMode::Required),
        ],
        partition_field: None,
        clustering_fields: Vec::new(),
    }
}

/// Nested values go to JSON columns as serialized strings.
pub fn encode_row(row: &Row) -> Row {
    row.iter()
        .map(|(key, value)| {
            let encoded = match value {
                Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
                other => other.clone(),
            };
            (key.clone(), encoded)
        })
        .collect()
}

fn network_error(error: reqwest::Error) -> ConnectorError {
    ConnectorError::NetworkError {
        details: error.to_string(),
        retryable: error.is_timeout() || error.is_connect(),
    }
}

async fn check_status(response: Response) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.ok().filter(|b| !b.is_empty());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ConnectorError::AuthenticationError {
                details: format!(
                    "BigQuery rejected the credentials with status {}",
                    status.as_u16()
                ),
                error_code: Some(status.as_u16().to_string()),
            })
        }
        _ => Err(ConnectorError::HttpError {
            status: status.as_u16(),
            body,
        }),
    }
}

async fn parse_json(response: Response) -> Result<Value, ConnectorError> {
    response
        .json()
        .await
        .map_err(|e| ConnectorError::MalformedResponse {
            details: e.to_string(),
        })
}

fn job_id_of(job: &Value) -> Result<String, ConnectorError> {
    job["jobReference"]["jobId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConnectorError::MalformedResponse {
            details: "response has no jobReference.jobId".to_string(),
        })
}
