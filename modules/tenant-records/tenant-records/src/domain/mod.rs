pub mod directory;
pub mod endpoint;
pub mod error;
pub mod fanout;
pub mod model;
pub mod partition;
pub mod query;
pub mod record;
pub mod registry;
pub mod result_set;
pub mod schema;
pub mod session;
