//! Tenant Records Engine
//!
//! Treats a set of per-tenant RPC endpoints as one logical record store.
//! Reads fan out to every tenant and merge equal records into one
//! [`Record`] whose identity ledger remembers the key each tenant assigned.
//! Writes reconcile a record against a desired tenant set: update where it
//! exists, create where it is missing, and release it where it is no longer
//! wanted.
//!
//! ## Architecture
//!
//! - **Connector contract**: transports implement `tenant_records_sdk::EndpointConnector`
//! - **Session**: base address, tenant directory and fan-out limits shared by models
//! - **Query set**: `get`, `filter`, `create`, `update_*`, `delete_*` and the
//!   `get_or_create` / `update_or_create` composites
//! - **Static connector**: an in-memory backend for tests and local runs

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

// === PUBLIC API (from SDK) ===
pub use tenant_records_sdk::{
    AuthKind, ConnectorError, EndpointConnector, EndpointRequest, FieldValue, Fields,
    FilterCondition, FilterOp, RemoteHandle, RemoteKey, RemoteRecord, RemoteResponse,
    ServiceMethod, TenantId, TransportOptions,
};

// === CONFIGURATION ===
pub mod config;
pub use config::{ConfigError, DiscoveryConfig, FanoutConfig, SessionConfig, SessionMode};

// === DOMAIN ===
pub mod domain;
pub use domain::error::{DomainError, FieldErrors};
pub use domain::fanout::FanoutPolicy;
pub use domain::model::Model;
pub use domain::partition::TenantPartition;
pub use domain::query::read::criteria;
pub use domain::query::{DeletePolicy, GetOutcome, QuerySet, UpdateOptions};
pub use domain::record::{InstanceBinding, Record};
pub use domain::result_set::ResultSet;
pub use domain::schema::{FieldOrigin, FieldSpec, MethodNames, ModelSchema, SchemaError};
pub use domain::session::Session;

// === INFRASTRUCTURE ===
pub mod infra;
pub use infra::{OperationHandler, StaticConnector};
