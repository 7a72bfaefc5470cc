#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for sessions, tenant discovery and single-endpoint mode

mod common;

use std::sync::Arc;

use common::{
    PAGE, bound, config, customer_schema, fields, session, single_endpoint_config, tenant,
    tenants,
};
use serde_json::json;
use tenant_records::{
    ConnectorError, DomainError, Session, SessionMode, StaticConnector, TenantId, UpdateOptions,
    criteria,
};

// =============================================================================
// Tenant directory
// =============================================================================

#[tokio::test]
async fn test_discovery_dedups_and_excludes() {
    let connector = StaticConnector::new(["B", "A", "B", "Sandbox", "C"]);
    let mut config = config();
    config.discovery.excluded = vec!["Sandbox".to_owned()];

    let session = Session::connect(&config, Arc::new(connector)).await.unwrap();
    assert_eq!(bound(&session.tenants()), ["B", "A", "C"]);
    assert_eq!(session.mode(), SessionMode::MultiTenant);
}

#[tokio::test]
async fn test_refresh_replaces_the_snapshot() {
    let connector = StaticConnector::new(["A"]);
    let session = session(&connector).await;
    let before = session.tenants();

    connector.set_companies(["A", "B"]);
    let after = session.refresh().await.unwrap();

    assert_eq!(bound(&before), ["A"]);
    assert_eq!(bound(&after), ["A", "B"]);
    assert_eq!(bound(&session.tenants()), ["A", "B"]);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let connector = StaticConnector::new(["A", "B"]);
    let session = session(&connector).await;

    connector.set_discovery_fault(Some(ConnectorError::Transport("down".to_owned())));
    assert!(matches!(session.refresh().await, Err(DomainError::Discovery(_))));
    assert_eq!(bound(&session.tenants()), ["A", "B"]);
}

#[tokio::test]
async fn test_failed_initial_discovery_leaves_directory_empty() {
    let connector = StaticConnector::new(["A"]);
    connector.set_discovery_fault(Some(ConnectorError::Transport("down".to_owned())));

    let session = session(&connector).await;
    assert!(session.tenants().is_empty());

    connector.set_discovery_fault(None);
    session.refresh().await.unwrap();
    assert_eq!(bound(&session.tenants()), ["A"]);
}

#[tokio::test]
async fn test_static_tenants_when_discovery_is_disabled() {
    let connector = StaticConnector::new(["ignored"]);
    let mut config = config();
    config.discovery.enabled = false;
    config.discovery.tenants = vec!["X".to_owned(), "Y".to_owned(), "X".to_owned()];

    let session = Session::connect(&config, Arc::new(connector)).await.unwrap();
    assert_eq!(bound(&session.tenants()), ["X", "Y"]);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let connector = StaticConnector::new(["A"]);

    let mut zero_fanout = config();
    zero_fanout.fanout.max_in_flight = 0;
    let result = Session::connect(&zero_fanout, Arc::new(connector.clone())).await;
    assert!(matches!(result, Err(DomainError::Config(_))));

    let mut relative = config();
    relative.base_url = "not a url".to_owned();
    let result = Session::connect(&relative, Arc::new(connector)).await;
    assert!(matches!(result, Err(DomainError::Connection { .. })));
}

#[tokio::test]
async fn test_failed_page_description_leaves_registry_empty() {
    let connector = StaticConnector::new(["A"]);
    connector.fail_describe(PAGE);
    let session = session(&connector).await;

    let model = session.register(customer_schema()).await;
    assert!(!model.operations().has_page(PAGE));
    assert!(model.operations().has_page("Codeunit/Customer"));
}

// =============================================================================
// Single-endpoint mode
// =============================================================================

#[tokio::test]
async fn test_single_endpoint_mode_uses_unscoped_tenant() {
    let connector = StaticConnector::new(["A", "B"]);
    let session = Session::connect(&single_endpoint_config(), Arc::new(connector.clone()))
        .await
        .unwrap();
    assert_eq!(*session.tenants(), [TenantId::unscoped()]);

    let model = session.register(customer_schema()).await;
    let record = model
        .objects()
        .create(None, &fields(json!({"Name": "Ada"})))
        .await
        .unwrap();
    assert!(record.tenants()[0].is_unscoped());
    assert_eq!(connector.rows(&TenantId::unscoped(), PAGE).len(), 1);
    assert!(connector.rows(&tenant("A"), PAGE).is_empty());

    let found = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(found.keys(), record.keys());
}

#[tokio::test]
async fn test_single_endpoint_mode_rejects_tenant_scoping() {
    let connector = StaticConnector::new(["A"]);
    let session = Session::connect(&single_endpoint_config(), Arc::new(connector.clone()))
        .await
        .unwrap();
    let model = session.register(customer_schema()).await;
    let mut objects = model.objects();
    let scoped = tenants(&["A"]);

    let create = objects
        .create(Some(scoped.as_slice()), &fields(json!({"Name": "Ada"})))
        .await;
    assert!(matches!(create, Err(DomainError::Validation { .. })));

    let compose = objects
        .update_or_create(
            &criteria([("Name", "Ada")]),
            &fields(json!({"City": "Oslo"})),
            &UpdateOptions::in_tenants(["A"]),
        )
        .await;
    assert!(matches!(compose, Err(DomainError::Validation { .. })));

    assert_eq!(connector.total_calls("Read"), 0);
    assert_eq!(connector.total_calls("Create"), 0);
}
