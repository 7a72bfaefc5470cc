#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Common test utilities for tenant-records integration tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tenant_records::{
    Fields, FieldSpec, Model, ModelSchema, Session, SessionConfig, SessionMode, StaticConnector,
    TenantId,
};

pub const PAGE: &str = "Page/Customer";

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("fields must be a JSON object")
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::from(name)
}

pub fn tenants(names: &[&str]) -> Vec<TenantId> {
    names.iter().map(|name| TenantId::from(*name)).collect()
}

pub fn config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.base_url = "http://nav.test:7047/DynamicsNAV/WS/".to_owned();
    config.fanout.call_timeout = Duration::from_secs(5);
    config
}

pub fn single_endpoint_config() -> SessionConfig {
    let mut config = config();
    config.mode = SessionMode::SingleEndpoint;
    config
}

pub async fn session(connector: &StaticConnector) -> Session {
    Session::connect(&config(), Arc::new(connector.clone()))
        .await
        .unwrap()
}

pub fn customer_schema() -> ModelSchema {
    ModelSchema::builder("Customer")
        .field(FieldSpec::new("Name").min_length(1).max_length(30))
        .field(FieldSpec::new("City"))
        .build()
        .unwrap()
}

pub async fn customers(connector: &StaticConnector) -> Model {
    session(connector).await.register(customer_schema()).await
}

/// Seed the same customer into every tenant in `names`.
pub fn seed(connector: &StaticConnector, names: &[&str], customer: &Value) {
    for name in names {
        connector.insert(&tenant(name), PAGE, fields(customer.clone()));
    }
}

/// Tenants a record is bound to, as plain names.
pub fn bound(tenants: &[TenantId]) -> Vec<&str> {
    tenants.iter().map(TenantId::as_str).collect()
}
