//! Management API over HTTP.

mod test_utils;

use datasync::server::create_app;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use test_utils::{
    RecordingConnector, TENANT_FIXTURE_RECORDS, TestApp, build_app, default_config, seed_tenant,
};
use tokio::net::TcpListener;

/// Serves the app on a random local port and returns its base URL.
async fn start_test_server(app: &TestApp) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_app(app.state.clone());

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn setup() -> (TestApp, String, Client) {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    let url = start_test_server(&app).await;
    (app, url, Client::new())
}

#[tokio::test]
async fn root_and_health_respond() {
    let (_app, url, client) = setup().await;

    let response = client.get(format!("{}/", url)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service"], "datasync");

    let response = client.get(format!("{}/healthz", url)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(response_has_trace_header(&client, &url).await);
}

async fn response_has_trace_header(client: &Client, url: &str) -> bool {
    client
        .get(format!("{}/healthz", url))
        .send()
        .await
        .unwrap()
        .headers()
        .contains_key("x-trace-id")
}

#[tokio::test]
async fn openapi_document_lists_binding_routes() {
    let (_app, url, client) = setup().await;

    let response = client
        .get(format!("{}/openapi.json", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = response.json().await.unwrap();
    let paths = doc["paths"].as_object().unwrap();
    for route in [
        "/providers",
        "/tenants/{tenant_id}/providers",
        "/tenants/{tenant_id}/providers/{provider_id}",
        "/tenants/{tenant_id}/providers/{provider_id}/test-connection",
        "/tenants/{tenant_id}/providers/status",
        "/tenants/{tenant_id}/sync",
    ] {
        assert!(paths.contains_key(route), "missing {}", route);
    }
}

#[tokio::test]
async fn provider_crud() {
    let (app, url, client) = setup().await;

    let response = client
        .post(format!("{}/providers", url))
        .json(&json!({ "provider_type": "bigquery", "name": "analytics", "description": "Secondary" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["provider_type"], "BIGQUERY");
    let id = created["id"].as_i64().unwrap();

    let response = client
        .put(format!("{}/providers/{}", url, id))
        .json(&json!({ "description": "Renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["name"], "analytics");
    assert_eq!(updated["description"], "Renamed");

    let response = client
        .delete(format!("{}/providers/{}", url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed: Value = client
        .get(format!("{}/providers", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let providers = listed["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["id"], app.provider_id);

    let listed: Value = client
        .get(format!("{}/providers?include_inactive=true", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["providers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unsupported_provider_type_is_not_found() {
    let (_app, url, client) = setup().await;
    let response = client
        .post(format!("{}/providers", url))
        .json(&json!({ "provider_type": "SNOWFLAKE", "name": "snow" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PROVIDER_NOT_FOUND");
}

#[tokio::test]
async fn provider_types_advertise_credential_fields() {
    let (_app, url, client) = setup().await;
    let body: Value = client
        .get(format!("{}/provider-types", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let types = body["provider_types"].as_array().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0]["provider_type"], "BIGQUERY");
    assert_eq!(types[0]["namespace_field"], "dataset_id");
}

#[tokio::test]
async fn binding_lifecycle_never_exposes_config() {
    let (app, url, client) = setup().await;
    let bindings_url = format!("{}/tenants/11/providers", url);

    let response = client
        .post(&bindings_url)
        .json(&json!({ "provider_id": app.provider_id, "config": default_config() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let text = response.text().await.unwrap();
    assert!(!text.contains("private_key"));
    let binding: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(binding["has_config"], true);
    assert_eq!(binding["is_enabled"], true);

    let response = client
        .post(&bindings_url)
        .json(&json!({ "provider_id": app.provider_id, "config": default_config() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_BINDING");

    let response = client
        .put(format!("{}/{}", bindings_url, app.provider_id))
        .json(&json!({ "is_enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let binding: Value = response.json().await.unwrap();
    assert_eq!(binding["is_enabled"], false);

    let listed: Value = client
        .get(&bindings_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["bindings"].as_array().unwrap().len(), 1);
    assert!(!listed.to_string().contains("encrypted_config"));

    let response = client
        .delete(format!("{}/{}", bindings_url, app.provider_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .delete(format!("{}/{}", bindings_url, app.provider_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_binding_config_lists_missing_fields() {
    let (app, url, client) = setup().await;
    let response = client
        .post(format!("{}/tenants/12/providers", url))
        .json(&json!({ "provider_id": app.provider_id, "config": { "type": "service_account" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_FAILED");
    let fields = body["details"]["fields"].as_array().unwrap();
    assert!(fields.iter().any(|f| f == "private_key"));
    assert!(!fields.iter().any(|f| f == "type"));
}

#[tokio::test]
async fn non_positive_tenant_id_is_rejected() {
    let (_app, url, client) = setup().await;
    let response = client
        .get(format!("{}/tenants/0/providers", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let (_app, url, client) = setup().await;
    let response = client
        .post(format!("{}/tenants/3/providers", url))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn sync_and_status_endpoints() {
    let (app, url, client) = setup().await;
    seed_tenant(&app.source, 13).await.unwrap();
    app.state
        .registry
        .create_binding(13, app.provider_id, Some(&default_config()), true)
        .await
        .unwrap();

    let status: Value = client
        .get(format!("{}/tenants/13/providers/status", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status[0]["sync_status"], "never_synced");

    let response = client
        .post(format!("{}/tenants/13/sync?incremental=false", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let results = body["results"].as_object().unwrap();
    assert_eq!(results.len(), 1);
    let result = results.values().next().unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["records_exported"], TENANT_FIXTURE_RECORDS);

    let status: Value = client
        .get(format!("{}/tenants/13/providers/status", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status[0]["sync_status"], "success");
    assert!(status[0]["last_sync_watermark"].is_string());

    let response = client
        .post(format!(
            "{}/tenants/13/providers/{}/sync",
            url, app.provider_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["records_exported"], 0);

    let response = client
        .post(format!(
            "{}/tenants/13/providers/{}/test-connection",
            url, app.provider_id
        ))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn sync_of_unbound_tenant_returns_empty_results() {
    let (_app, url, client) = setup().await;
    let response = client
        .post(format!("{}/tenants/99/sync", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["results"].as_object().unwrap().is_empty());

    let response = client
        .post(format!("{}/tenants/99/providers/1/test-connection", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn single_binding_sync_on_deactivated_provider_is_not_found() {
    let (app, url, client) = setup().await;
    seed_tenant(&app.source, 14).await.unwrap();
    app.state
        .registry
        .create_binding(14, app.provider_id, Some(&default_config()), true)
        .await
        .unwrap();

    let response = client
        .delete(format!("{}/providers/{}", url, app.provider_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(format!(
            "{}/tenants/14/providers/{}/sync",
            url, app.provider_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PROVIDER_NOT_FOUND");
    assert!(app.connector.loads().is_empty());
}
