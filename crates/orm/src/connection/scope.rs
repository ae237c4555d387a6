//! Connection Scopes
//!
//! A connection scope is the unit of work that owns a [`ConnectionHandle`].
//! The handle is opened lazily on first use and shared by every operation in
//! the scope. Ending the scope waits for outstanding work, finalizes the
//! transaction (commit when the scope was completed, rollback otherwise) and
//! then releases the connection.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::DatabasePool;
use super::handle::{ConnectionHandle, WorkGuard};
use super::pool;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};

/// How a nested scope relates to its parent's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// Share the parent's connection and transaction
    #[default]
    Additive,
    /// Open an independent connection
    CreateNew,
}

/// Settings applicable to a connection scope; unset fields fall back to [`OrmConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionScopeSettings {
    pub scope_mode: Option<ScopeMode>,
    pub connection_string_override: Option<String>,
    pub is_transactional: Option<bool>,
}

impl ConnectionScopeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_mode(mut self, mode: ScopeMode) -> Self {
        self.scope_mode = Some(mode);
        self
    }

    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string_override = Some(connection_string.into());
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.is_transactional = Some(transactional);
        self
    }
}

/// Unit of work owning (or sharing) one connection handle
pub struct ConnectionScope {
    id: Uuid,
    pool: Arc<dyn DatabasePool>,
    connection_string: Option<String>,
    transactional: bool,
    handle: OnceCell<Arc<ConnectionHandle>>,
    owns_handle: bool,
    completed: AtomicBool,
    ended: AtomicBool,
}

impl ConnectionScope {
    pub fn new(pool: Arc<dyn DatabasePool>, settings: ConnectionScopeSettings, config: &OrmConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            transactional: settings.is_transactional.unwrap_or(config.default_transactional),
            connection_string: settings.connection_string_override,
            handle: OnceCell::new(),
            owns_handle: true,
            completed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Open a child scope. Additive children share this scope's connection
    /// and leave finalization to the owner.
    pub async fn nested(&self, settings: ConnectionScopeSettings) -> OrmResult<ConnectionScope> {
        match settings.scope_mode.unwrap_or_default() {
            ScopeMode::Additive => {
                let handle = self.connection().await?;
                Ok(Self {
                    id: Uuid::new_v4(),
                    pool: Arc::clone(&self.pool),
                    connection_string: self.connection_string.clone(),
                    transactional: self.transactional,
                    handle: OnceCell::new_with(Some(handle)),
                    owns_handle: false,
                    completed: AtomicBool::new(false),
                    ended: AtomicBool::new(false),
                })
            }
            ScopeMode::CreateNew => {
                let config = OrmConfig {
                    default_transactional: self.transactional,
                    ..OrmConfig::default()
                };
                let settings = ConnectionScopeSettings {
                    connection_string_override: settings
                        .connection_string_override
                        .or_else(|| self.connection_string.clone()),
                    ..settings
                };
                Ok(Self::new(Arc::clone(&self.pool), settings, &config))
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn owns_connection(&self) -> bool {
        self.owns_handle
    }

    /// The scope's shared handle, opened on first use
    pub async fn connection(&self) -> OrmResult<Arc<ConnectionHandle>> {
        if self.ended.load(Ordering::Acquire) {
            return Err(OrmError::Disposed(format!("connection scope {}", self.id)));
        }

        let handle = self
            .handle
            .get_or_try_init(|| async {
                let connection = pool::acquire(&self.pool, self.connection_string.as_deref()).await?;
                let handle = ConnectionHandle::open(connection, self.transactional).await?;
                debug!(scope = %self.id, handle = %handle.id(), "connection scope opened handle");
                Ok::<_, OrmError>(Arc::new(handle))
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Bracket one unit of work on the scope's connection
    pub async fn begin_work(&self) -> OrmResult<WorkGuard> {
        self.connection().await?.begin_work()
    }

    /// Mark the scope successful so that ending it commits
    pub fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// End the scope: wait for outstanding work, commit or roll back, then
    /// release the connection.
    ///
    /// The handle stops admitting work before draining, so handles cloned out
    /// of the scope must not be used to start work once `end` is called.
    pub async fn end(self) -> OrmResult<()> {
        self.ended.store(true, Ordering::Release);

        if !self.owns_handle {
            return Ok(());
        }
        let Some(handle) = self.handle.get().cloned() else {
            return Ok(());
        };

        handle.begin_closing();
        handle.wait_drained().await;
        let finalized = if self.is_completed() {
            handle.commit().await
        } else {
            handle.rollback().await
        };
        let released = handle.dispose_when_drained().await;

        debug!(scope = %self.id, completed = self.is_completed(), "connection scope ended");
        finalized.and(released)
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.ended.load(Ordering::Acquire) || !self.owns_handle {
            return;
        }
        if let Some(handle) = self.handle.get() {
            warn!(scope = %self.id, "connection scope dropped without end; releasing without commit");
            handle.dispose();
        }
    }
}

impl std::fmt::Debug for ConnectionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionScope")
            .field("id", &self.id)
            .field("transactional", &self.transactional)
            .field("owns_handle", &self.owns_handle)
            .field("completed", &self.is_completed())
            .finish()
    }
}
