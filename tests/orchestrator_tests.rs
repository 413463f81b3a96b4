//! End-to-end sync runs over in-memory stores with a recording warehouse.

mod test_utils;

use chrono::Utc;
use datasync::error::SyncError;
use datasync::extractor::ExtractMode;
use datasync::orchestrator::TENANT_ERROR_KEY;
use datasync::provider_registry::SyncStatus;
use test_utils::{
    RecordingConnector, TENANT_FIXTURE_RECORDS, TestApp, build_app, default_config, seed_tenant,
    touch_user,
};

async fn bind(app: &TestApp, tenant_id: i64) {
    seed_tenant(&app.source, tenant_id).await.unwrap();
    app.state
        .registry
        .create_binding(tenant_id, app.provider_id, Some(&default_config()), true)
        .await
        .unwrap();
}

async fn watermark(app: &TestApp, tenant_id: i64) -> Option<chrono::DateTime<Utc>> {
    app.state
        .registry
        .resolve_target(tenant_id, app.provider_id)
        .await
        .unwrap()
        .watermark()
}

#[tokio::test]
async fn successful_sync_loads_tenant_namespace_and_advances_watermark() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    bind(&app, 1).await;
    let before = Utc::now();

    let results = app.state.orchestrator.sync_tenant(1, true).await.unwrap();

    assert_eq!(results.len(), 1);
    let (key, result) = results.iter().next().unwrap();
    assert!(key.starts_with("bigquery_"));
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.records_exported, TENANT_FIXTURE_RECORDS);
    assert_eq!(result.tables_updated.len(), 16);

    let loads = app.connector.loads();
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].tenant_id, 1);
    assert_eq!(loads[0].dataset_id, "sashakt_data_1");
    assert_eq!(loads[0].mode, ExtractMode::Full);

    let mark = watermark(&app, 1).await.expect("watermark recorded");
    assert!(mark >= before);

    let statuses = app.state.registry.binding_statuses(1).await.unwrap();
    assert_eq!(statuses[0].sync_status, SyncStatus::Success);
    assert_eq!(statuses[0].error_message, None);
}

#[tokio::test]
async fn second_incremental_sync_only_exports_changes() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    bind(&app, 1).await;

    app.state.orchestrator.sync_tenant(1, true).await.unwrap();
    let first = watermark(&app, 1).await.unwrap();

    let results = app.state.orchestrator.sync_tenant(1, true).await.unwrap();
    let result = results.values().next().unwrap();
    assert!(result.success);
    assert_eq!(result.records_exported, 0);
    let second = watermark(&app, 1).await.unwrap();
    assert!(second > first);

    touch_user(&app.source, 101, "2999-01-01T00:00:00+00:00")
        .await
        .unwrap();
    let results = app.state.orchestrator.sync_tenant(1, true).await.unwrap();
    assert_eq!(results.values().next().unwrap().records_exported, 1);

    let loads = app.connector.loads();
    assert_eq!(loads.len(), 3);
    assert_eq!(loads[1].mode, ExtractMode::Incremental);
    assert_eq!(loads[2].counts["users"], 1);
}

#[tokio::test]
async fn full_sync_ignores_watermark() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    bind(&app, 2).await;

    app.state.orchestrator.sync_tenant(2, true).await.unwrap();
    let results = app.state.orchestrator.sync_tenant(2, false).await.unwrap();

    let result = results.values().next().unwrap();
    assert_eq!(result.records_exported, TENANT_FIXTURE_RECORDS);
    assert_eq!(app.connector.loads()[1].mode, ExtractMode::Full);
}

#[tokio::test]
async fn failed_load_keeps_watermark_and_records_error() {
    let app = build_app(RecordingConnector::failing_for(&[3])).await.unwrap();
    bind(&app, 3).await;

    let results = app.state.orchestrator.sync_tenant(3, true).await.unwrap();
    let result = results.values().next().unwrap();
    assert!(!result.success);
    assert_eq!(result.records_exported, 0);
    let message = result.error_message.clone().unwrap();
    assert!(message.contains("503"), "{message}");

    assert_eq!(watermark(&app, 3).await, None);
    let statuses = app.state.registry.binding_statuses(3).await.unwrap();
    assert_eq!(statuses[0].sync_status, SyncStatus::Failed);
    assert_eq!(statuses[0].error_message.as_deref(), Some(message.as_str()));
}

#[tokio::test]
async fn failure_after_success_leaves_previous_watermark() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    bind(&app, 4).await;
    app.state.orchestrator.sync_tenant(4, true).await.unwrap();
    let before = watermark(&app, 4).await.unwrap();

    use sea_orm::{ConnectionTrait, Statement};
    app.source
        .execute(Statement::from_string(
            app.source.get_database_backend(),
            "DROP TABLE questiontag".to_string(),
        ))
        .await
        .unwrap();

    let results = app.state.orchestrator.sync_tenant(4, true).await.unwrap();
    let result = results.values().next().unwrap();
    assert!(!result.success);
    assert!(
        result
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("extraction failed")
    );
    assert_eq!(watermark(&app, 4).await, Some(before));
}

#[tokio::test]
async fn tenant_without_bindings_returns_empty_results() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    let results = app.state.orchestrator.sync_tenant(42, true).await.unwrap();
    assert!(results.is_empty());
    assert!(app.connector.loads().is_empty());
}

#[tokio::test]
async fn disabled_binding_is_skipped_by_tenant_sync_and_refused_directly() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    seed_tenant(&app.source, 5).await.unwrap();
    app.state
        .registry
        .create_binding(5, app.provider_id, Some(&default_config()), false)
        .await
        .unwrap();

    assert!(app.state.orchestrator.sync_tenant(5, true).await.unwrap().is_empty());

    let result = app
        .state
        .orchestrator
        .sync_one(5, app.provider_id, true)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("provider binding is disabled")
    );
}

#[tokio::test]
async fn deactivated_provider_is_refused_by_every_sync_path() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    seed_tenant(&app.source, 3).await.unwrap();
    app.state
        .registry
        .create_binding(3, app.provider_id, Some(&default_config()), true)
        .await
        .unwrap();
    app.state
        .registry
        .deactivate_provider(app.provider_id)
        .await
        .unwrap();

    assert!(app.state.orchestrator.sync_tenant(3, true).await.unwrap().is_empty());

    let err = app
        .state
        .orchestrator
        .sync_one(3, app.provider_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownProvider(_)), "{err:?}");
    assert!(app.connector.loads().is_empty());

    let status = app.state.registry.binding_statuses(3).await.unwrap();
    assert!(status[0].last_sync_watermark.is_none());
}

#[tokio::test]
async fn sync_one_of_missing_binding_is_not_found() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    let err = app
        .state
        .orchestrator
        .sync_one(6, app.provider_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn binding_without_config_fails_inside_the_result() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    seed_tenant(&app.source, 7).await.unwrap();
    app.state
        .registry
        .create_binding(7, app.provider_id, None, true)
        .await
        .unwrap();

    let results = app.state.orchestrator.sync_tenant(7, true).await.unwrap();
    let result = results.values().next().unwrap();
    assert!(!result.success);
    assert!(app.connector.loads().is_empty());
}

#[tokio::test]
async fn sync_all_isolates_tenant_failures() {
    let app = build_app(RecordingConnector::failing_for(&[2])).await.unwrap();
    for tenant in [1, 2, 3] {
        bind(&app, tenant).await;
    }

    let all = app.state.orchestrator.sync_all(true).await.unwrap();

    assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(all[&1].values().all(|r| r.success));
    assert!(all[&2].values().all(|r| !r.success));
    assert!(all[&3].values().all(|r| r.success));
    assert!(!all[&2].contains_key(TENANT_ERROR_KEY));

    let mut loaded: Vec<_> = app
        .connector
        .loads()
        .into_iter()
        .map(|l| (l.tenant_id, l.dataset_id))
        .collect();
    loaded.sort();
    assert_eq!(
        loaded,
        vec![
            (1, "sashakt_data_1".to_string()),
            (3, "sashakt_data_3".to_string())
        ]
    );
}

#[tokio::test]
async fn sync_all_runs_tenants_concurrently_when_configured() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    for tenant in [1, 2, 3, 4] {
        bind(&app, tenant).await;
    }
    let orchestrator = app.state.orchestrator.clone().with_tenant_concurrency(4);

    let all = orchestrator.sync_all(false).await.unwrap();

    assert_eq!(all.len(), 4);
    assert!(
        all.values()
            .flat_map(|results| results.values())
            .all(|r| r.success && r.records_exported == TENANT_FIXTURE_RECORDS)
    );
}

#[tokio::test]
async fn connection_tests_report_unreachable_targets_as_false() {
    let app = build_app(RecordingConnector::unreachable()).await.unwrap();
    bind(&app, 1).await;

    let ok = app
        .state
        .orchestrator
        .test_connection(1, app.provider_id)
        .await
        .unwrap();
    assert!(!ok);

    let sweep = app.state.orchestrator.test_all_connections().await.unwrap();
    assert_eq!(sweep.len(), 1);
    assert!(!sweep[0].success);
    assert_eq!(sweep[0].tenant_id, 1);
}

#[tokio::test]
async fn connection_test_of_reachable_target_succeeds() {
    let app = build_app(RecordingConnector::new()).await.unwrap();
    bind(&app, 1).await;
    bind(&app, 2).await;

    let sweep = app.state.orchestrator.test_all_connections().await.unwrap();
    assert_eq!(sweep.len(), 2);
    assert!(sweep.iter().all(|r| r.success && r.error.is_none()));
}
