//! Provider Traits
//!
//! The narrow contract a backing store presents to the connection lifecycle
//! manager. Statement generation and dialect handling live behind these
//! traits; the core only opens, uses, finalizes and releases.

use async_trait::async_trait;

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Abstract physical connection
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Begin a transaction on this connection
    async fn begin_transaction(&mut self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Close the connection
    async fn close(&mut self) -> OrmResult<()>;
}

/// Abstract transaction; dropping an unfinalized transaction rolls it back
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Source of physical connections
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a connection using the pool's own connection string
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>>;

    /// Acquire a connection to an explicitly named target
    async fn acquire_with(&self, connection_string: &str) -> OrmResult<Box<dyn DatabaseConnection>> {
        let _ = connection_string;
        Err(OrmError::NotSupported(
            "connection string overrides are not supported by this pool".to_string(),
        ))
    }

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;
}
