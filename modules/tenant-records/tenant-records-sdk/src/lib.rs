//! Tenant Records SDK
//!
//! This crate provides the connector contract for the `tenant-records` engine:
//!
//! - [`EndpointConnector`] - Opens a handle to one remote page, optionally tenant-scoped
//! - [`RemoteHandle`] - Invokes named operations on an open endpoint
//! - [`TenantId`], [`RemoteKey`], [`RemoteResponse`], [`FilterCondition`] - Wire models
//! - [`TransportOptions`] - Authentication, proxy and caching options handed to connectors
//! - [`ConnectorError`] - Error type returned by connectors
//!
//! ## Usage
//!
//! Transports implement [`EndpointConnector`] and hand it to the engine:
//!
//! ```ignore
//! use tenant_records_sdk::{EndpointConnector, EndpointRequest, RemoteHandle};
//!
//! let handle = connector.connect(&EndpointRequest {
//!     url: "http://nav:7047/DynamicsNAV/WS/CRONUS/Page/Customer".to_owned(),
//!     page: "Page/Customer",
//!     tenant: Some(&tenant),
//!     options: &options,
//! }).await?;
//!
//! let response = handle.invoke("Read", args).await?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod error;
pub mod models;

// Re-export main types at crate root
pub use api::{EndpointConnector, EndpointRequest, RemoteHandle};
pub use error::ConnectorError;
pub use models::{
    AuthKind, FieldValue, Fields, FilterCondition, FilterOp, RemoteKey, RemoteRecord,
    RemoteResponse, ServiceMethod, TenantId, TransportOptions,
};
