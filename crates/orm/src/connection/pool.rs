//! Pool error mapping

use std::sync::Arc;
use tracing::{debug, error};

use super::backend::{DatabaseConnection, DatabasePool};
use crate::error::{OrmError, OrmResult};

/// Connection pool error types
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection acquisition failed: {0}")]
    AcquisitionFailed(String),
}

impl From<PoolError> for OrmError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AcquisitionFailed(msg) => {
                OrmError::Connection(format!("Database connection failed: {}", msg))
            }
        }
    }
}

/// Acquire a connection, honoring an optional connection string override
pub(crate) async fn acquire(
    pool: &Arc<dyn DatabasePool>,
    connection_string: Option<&str>,
) -> OrmResult<Box<dyn DatabaseConnection>> {
    let acquired = match connection_string {
        Some(target) => pool.acquire_with(target).await,
        None => pool.acquire().await,
    };

    match acquired {
        Ok(connection) => {
            debug!(override_target = connection_string.is_some(), "database connection acquired");
            Ok(connection)
        }
        Err(e @ OrmError::NotSupported(_)) => Err(e),
        Err(e) => {
            let pool_error = PoolError::AcquisitionFailed(e.to_string());
            error!("Failed to acquire database connection: {}", pool_error);
            Err(pool_error.into())
        }
    }
}
