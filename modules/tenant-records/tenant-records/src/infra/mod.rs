//! Infrastructure layer: connector implementations.

pub mod static_connector;

pub use static_connector::{OperationHandler, StaticConnector};
