//! Connection Management
//!
//! Provider traits, shared connection handles with in-use tracking, and
//! the connection scopes that own them.

pub mod backend;
pub mod handle;
pub mod pool;
pub mod scope;

pub use backend::{DatabaseConnection, DatabasePool, DatabaseTransaction};
pub use handle::{ConnectionHandle, WorkGuard};
pub use pool::PoolError;
pub use scope::{ConnectionScope, ConnectionScopeSettings, ScopeMode};
