//! Connection Handles
//!
//! A [`ConnectionHandle`] owns one physical connection and an optional
//! transaction, shared by every unit of work inside a connection scope.
//! Work is bracketed with an in-use counter; the physical resources are
//! never released while that counter is above zero.
//!
//! `dispose()` never blocks: if work is outstanding it is deferred and
//! returns `false`. Callers that want to release as soon as work drains use
//! [`ConnectionHandle::wait_drained`] or [`ConnectionHandle::dispose_when_drained`].
//!
//! Once [`ConnectionHandle::begin_closing`] is called no new work is
//! admitted; only the commit or rollback that finalizes the handle may run.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::{DatabaseConnection, DatabaseTransaction};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

#[derive(Debug, Default)]
struct WorkState {
    working: usize,
    closing: bool,
    disposed: bool,
}

/// Shared physical connection with reference-counted in-use tracking
pub struct ConnectionHandle {
    id: Uuid,
    connection: AsyncMutex<Option<Box<dyn DatabaseConnection>>>,
    transaction: AsyncMutex<Option<Box<dyn DatabaseTransaction>>>,
    transaction_open: AtomicBool,
    state: Mutex<WorkState>,
    drained: Notify,
}

impl ConnectionHandle {
    pub fn new(
        connection: Box<dyn DatabaseConnection>,
        transaction: Option<Box<dyn DatabaseTransaction>>,
    ) -> Self {
        let handle = Self {
            id: Uuid::new_v4(),
            transaction_open: AtomicBool::new(transaction.is_some()),
            connection: AsyncMutex::new(Some(connection)),
            transaction: AsyncMutex::new(transaction),
            state: Mutex::new(WorkState::default()),
            drained: Notify::new(),
        };
        debug!(handle = %handle.id, transactional = handle.has_transaction(), "connection handle opened");
        handle
    }

    /// Wrap a connection, beginning a transaction on it when `transactional`
    pub async fn open(mut connection: Box<dyn DatabaseConnection>, transactional: bool) -> OrmResult<Self> {
        let transaction = if transactional {
            let tx = connection
                .begin_transaction()
                .await
                .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
            Some(tx)
        } else {
            None
        };
        Ok(Self::new(connection, transaction))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register one unit of outstanding work
    pub fn increment_working(&self) -> OrmResult<usize> {
        let mut state = self.state.lock();
        if state.disposed || state.closing {
            return Err(OrmError::Disposed(format!("connection handle {}", self.id)));
        }
        state.working += 1;
        Ok(state.working)
    }

    /// Stop admitting new work. Work already in progress still drains.
    pub fn begin_closing(&self) {
        let mut state = self.state.lock();
        if !state.closing {
            state.closing = true;
            debug!(handle = %self.id, working = state.working, "connection handle closing");
        }
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().closing
    }

    /// Release one unit of work. The counter never goes below zero.
    pub fn decrement_working(&self) -> usize {
        let remaining = {
            let mut state = self.state.lock();
            if state.working == 0 {
                warn!(handle = %self.id, "decrement_working called with no outstanding work");
                return 0;
            }
            state.working -= 1;
            state.working
        };

        if remaining == 0 {
            self.drained.notify_waiters();
        }
        remaining
    }

    /// True iff work is outstanding at the instant of the call
    pub fn is_working(&self) -> bool {
        self.state.lock().working > 0
    }

    pub fn working_count(&self) -> usize {
        self.state.lock().working
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// True until the transaction is committed, rolled back or released
    pub fn has_transaction(&self) -> bool {
        self.transaction_open.load(Ordering::Acquire)
    }

    /// RAII bracket around a unit of work
    pub fn begin_work(self: &Arc<Self>) -> OrmResult<WorkGuard> {
        self.increment_working()?;
        Ok(WorkGuard {
            handle: Arc::clone(self),
        })
    }

    fn enter(&self) -> OrmResult<ActiveWork<'_>> {
        self.increment_working()?;
        Ok(ActiveWork(self))
    }

    // Finalization is admitted while closing, never after dispose
    fn enter_finalizing(&self) -> Option<ActiveWork<'_>> {
        let mut state = self.state.lock();
        if state.disposed {
            return None;
        }
        state.working += 1;
        Some(ActiveWork(self))
    }

    /// Execute on the transaction when one is open, otherwise on the connection
    pub async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let _work = self.enter()?;

        {
            let mut transaction = self.transaction.lock().await;
            if let Some(tx) = transaction.as_mut() {
                return tx.execute(sql, params).await;
            }
        }

        let mut connection = self.connection.lock().await;
        match connection.as_mut() {
            Some(conn) => conn.execute(sql, params).await,
            None => Err(OrmError::Disposed(format!("connection handle {}", self.id))),
        }
    }

    /// Commit the transaction. Returns `false` when it was already finalized.
    pub async fn commit(&self) -> OrmResult<bool> {
        let Some((_work, tx)) = self.take_transaction().await else {
            return Ok(false);
        };

        debug!(handle = %self.id, "committing transaction");
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        debug!(handle = %self.id, "transaction committed");
        Ok(true)
    }

    /// Roll back the transaction. Returns `false` when it was already finalized.
    pub async fn rollback(&self) -> OrmResult<bool> {
        let Some((_work, tx)) = self.take_transaction().await else {
            return Ok(false);
        };

        debug!(handle = %self.id, "rolling back transaction");
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to rollback transaction: {}", e)))?;
        debug!(handle = %self.id, "transaction rolled back");
        Ok(true)
    }

    /// The returned guard keeps the handle in use until the provider call finishes
    async fn take_transaction(&self) -> Option<(ActiveWork<'_>, Box<dyn DatabaseTransaction>)> {
        let work = self.enter_finalizing()?;
        let tx = self.transaction.lock().await.take()?;
        self.transaction_open.store(false, Ordering::Release);
        Some((work, tx))
    }

    /// Release the connection and transaction unless work is outstanding.
    ///
    /// Returns `true` if the handle is disposed after the call. An open
    /// transaction is dropped, which rolls it back.
    pub fn dispose(&self) -> bool {
        if !self.mark_disposed() {
            return false;
        }

        match self.transaction.try_lock() {
            Ok(mut transaction) => {
                if transaction.take().is_some() {
                    self.transaction_open.store(false, Ordering::Release);
                    warn!(handle = %self.id, "disposing connection with an unfinalized transaction");
                }
            }
            Err(_) => warn!(handle = %self.id, "transaction busy during dispose; released on drop"),
        }

        match self.connection.try_lock() {
            Ok(mut connection) => {
                connection.take();
            }
            Err(_) => warn!(handle = %self.id, "connection busy during dispose; released on drop"),
        }

        debug!(handle = %self.id, "connection handle disposed");
        true
    }

    /// Returns true when this call (or an earlier one) disposed the handle
    fn mark_disposed(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return true;
        }
        if state.working > 0 {
            debug!(handle = %self.id, working = state.working, "dispose deferred: work outstanding");
            return false;
        }
        state.disposed = true;
        true
    }

    /// Wait until no work is outstanding
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if !self.is_working() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for outstanding work to drain, then roll back any unfinalized
    /// transaction and close the connection
    pub async fn dispose_when_drained(&self) -> OrmResult<()> {
        loop {
            self.wait_drained().await;
            let mut state = self.state.lock();
            if state.disposed {
                return Ok(());
            }
            if state.working == 0 {
                state.disposed = true;
                break;
            }
        }

        let tx = self.transaction.lock().await.take();
        if let Some(tx) = tx {
            self.transaction_open.store(false, Ordering::Release);
            warn!(handle = %self.id, "rolling back unfinalized transaction on dispose");
            if let Err(e) = tx.rollback().await {
                warn!(handle = %self.id, error = %e, "rollback during dispose failed");
            }
        }

        let connection = self.connection.lock().await.take();
        if let Some(mut connection) = connection {
            connection.close().await?;
        }

        debug!(handle = %self.id, "connection handle disposed after drain");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("working", &state.working)
            .field("closing", &state.closing)
            .field("disposed", &state.disposed)
            .field("transaction_open", &self.has_transaction())
            .finish()
    }
}

struct ActiveWork<'a>(&'a ConnectionHandle);

impl Drop for ActiveWork<'_> {
    fn drop(&mut self) {
        self.0.decrement_working();
    }
}

/// Holds one unit of work on a shared handle until dropped
#[derive(Debug)]
pub struct WorkGuard {
    handle: Arc<ConnectionHandle>,
}

impl WorkGuard {
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.handle.decrement_working();
    }
}
