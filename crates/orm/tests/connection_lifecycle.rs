//! Connection scope and handle lifecycle against a recording provider

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracked_orm::{
    ConnectionScope, ConnectionScopeSettings, DatabaseConnection, DatabasePool, DatabaseTransaction,
    OrmConfig, OrmError, OrmResult, ScopeMode, Value,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    opened: AtomicUsize,
    commit_delay: Duration,
}

impl Recorder {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }
}

struct RecordingPool {
    recorder: Arc<Recorder>,
    fail: bool,
}

struct RecordingConnection {
    recorder: Arc<Recorder>,
}

struct RecordingTransaction {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl DatabasePool for RecordingPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        if self.fail {
            return Err(OrmError::Connection("server unreachable".to_string()));
        }
        self.recorder.opened.fetch_add(1, Ordering::SeqCst);
        self.recorder.push("acquire");
        Ok(Box::new(RecordingConnection {
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn acquire_with(&self, connection_string: &str) -> OrmResult<Box<dyn DatabaseConnection>> {
        self.recorder.push(format!("acquire:{}", connection_string));
        self.acquire().await
    }

    async fn close(&self) -> OrmResult<()> {
        self.recorder.push("pool.close");
        Ok(())
    }
}

#[async_trait]
impl DatabaseConnection for RecordingConnection {
    async fn execute(&mut self, _sql: &str, _params: &[Value]) -> OrmResult<u64> {
        self.recorder.push("conn.execute");
        Ok(1)
    }

    async fn begin_transaction(&mut self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.recorder.push("begin");
        Ok(Box::new(RecordingTransaction {
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn close(&mut self) -> OrmResult<()> {
        self.recorder.push("close");
        Ok(())
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.recorder.push("conn.drop");
    }
}

#[async_trait]
impl DatabaseTransaction for RecordingTransaction {
    async fn execute(&mut self, _sql: &str, _params: &[Value]) -> OrmResult<u64> {
        self.recorder.push("tx.execute");
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        if !self.recorder.commit_delay.is_zero() {
            self.recorder.push("commit.start");
            tokio::time::sleep(self.recorder.commit_delay).await;
        }
        self.recorder.push("commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        self.recorder.push("rollback");
        Ok(())
    }
}

fn pool() -> (Arc<dyn DatabasePool>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let pool: Arc<dyn DatabasePool> = Arc::new(RecordingPool {
        recorder: Arc::clone(&recorder),
        fail: false,
    });
    (pool, recorder)
}

#[tokio::test]
async fn completed_scope_commits_once_and_closes() {
    let (pool, recorder) = pool();
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    assert!(scope.is_transactional());

    let handle = scope.connection().await.unwrap();
    handle.execute("INSERT INTO orders VALUES (1)", &[]).await.unwrap();
    let again = scope.connection().await.unwrap();
    assert_eq!(handle.id(), again.id());

    scope.complete();
    scope.end().await.unwrap();

    assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count("tx.execute"), 1);
    assert_eq!(recorder.count("commit"), 1);
    assert_eq!(recorder.count("rollback"), 0);
    assert_eq!(recorder.count("close"), 1);
    assert!(handle.is_disposed());
}

#[tokio::test]
async fn incomplete_scope_rolls_back() {
    let (pool, recorder) = pool();
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    scope.connection().await.unwrap();

    scope.end().await.unwrap();
    assert_eq!(recorder.count("rollback"), 1);
    assert_eq!(recorder.count("commit"), 0);
}

#[tokio::test]
async fn non_transactional_scope_skips_transaction() {
    let (pool, recorder) = pool();
    let settings = ConnectionScopeSettings::new().transactional(false);
    let scope = ConnectionScope::new(pool, settings, &OrmConfig::default());

    let handle = scope.connection().await.unwrap();
    assert!(!handle.has_transaction());
    handle.execute("SELECT 1", &[]).await.unwrap();
    scope.complete();
    scope.end().await.unwrap();

    assert_eq!(recorder.count("begin"), 0);
    assert_eq!(recorder.count("conn.execute"), 1);
    assert_eq!(recorder.count("close"), 1);
}

#[tokio::test]
async fn unused_scope_never_opens_a_connection() {
    let (pool, recorder) = pool();
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    scope.end().await.unwrap();
    assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connection_string_override_is_passed_to_pool() {
    let (pool, recorder) = pool();
    let settings = ConnectionScopeSettings::new().connection_string("Server=replica");
    let scope = ConnectionScope::new(pool, settings, &OrmConfig::default());

    scope.connection().await.unwrap();
    assert_eq!(recorder.count("acquire:Server=replica"), 1);
    scope.end().await.unwrap();
}

#[tokio::test]
async fn additive_child_shares_connection_without_finalizing() {
    let (pool, recorder) = pool();
    let parent = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());

    let child = parent.nested(ConnectionScopeSettings::new()).await.unwrap();
    assert!(!child.owns_connection());
    let child_handle = child.connection().await.unwrap();
    let parent_handle = parent.connection().await.unwrap();
    assert_eq!(child_handle.id(), parent_handle.id());

    child.complete();
    child.end().await.unwrap();
    assert_eq!(recorder.count("commit"), 0);
    assert!(!parent_handle.is_disposed());

    parent.complete();
    parent.end().await.unwrap();
    assert_eq!(recorder.count("commit"), 1);
}

#[tokio::test]
async fn create_new_child_opens_its_own_connection() {
    let (pool, recorder) = pool();
    let parent = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    parent.connection().await.unwrap();

    let child = parent
        .nested(ConnectionScopeSettings::new().scope_mode(ScopeMode::CreateNew))
        .await
        .unwrap();
    assert!(child.owns_connection());
    child.connection().await.unwrap();
    assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);

    child.end().await.unwrap();
    parent.end().await.unwrap();
    assert_eq!(recorder.count("close"), 2);
}

#[tokio::test]
async fn acquisition_failure_maps_to_connection_error() {
    let recorder = Arc::new(Recorder::default());
    let pool: Arc<dyn DatabasePool> = Arc::new(RecordingPool {
        recorder,
        fail: true,
    });
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());

    match scope.connection().await {
        Err(OrmError::Connection(message)) => assert!(message.contains("server unreachable")),
        other => panic!("expected connection error, got {:?}", other.map(|h| h.id())),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn end_waits_for_parallel_work_to_drain() {
    let (pool, recorder) = pool();
    let scope = Arc::new(ConnectionScope::new(
        pool,
        ConnectionScopeSettings::new(),
        &OrmConfig::default(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let guard = scope.begin_work().await.unwrap();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            guard.handle().execute("UPDATE t SET x = x + 1", &[]).await.unwrap();
            drop(guard);
        }));
    }

    let handle = scope.connection().await.unwrap();
    assert!(handle.is_working());
    assert!(!handle.dispose(), "dispose while working must be deferred");
    assert!(!handle.is_disposed());

    for task in tasks {
        task.await.unwrap();
    }

    let scope = Arc::try_unwrap(scope).expect("all tasks finished");
    scope.complete();
    scope.end().await.unwrap();

    assert_eq!(recorder.count("tx.execute"), 16);
    assert_eq!(recorder.count("commit"), 1);
    assert!(handle.is_disposed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_is_deferred_while_commit_is_in_flight() {
    let recorder = Arc::new(Recorder {
        commit_delay: Duration::from_millis(100),
        ..Recorder::default()
    });
    let pool: Arc<dyn DatabasePool> = Arc::new(RecordingPool {
        recorder: Arc::clone(&recorder),
        fail: false,
    });
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    let handle = scope.connection().await.unwrap();

    let committing = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.commit().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(recorder.count("commit.start"), 1);
    assert!(handle.is_working());
    assert!(!handle.dispose(), "dispose during commit must be deferred");
    assert_eq!(recorder.count("conn.drop"), 0);

    assert!(committing.await.unwrap().unwrap());
    assert!(!handle.is_working());
    assert!(handle.dispose());

    let committed = recorder.position("commit").unwrap();
    let released = recorder.position("conn.drop").unwrap();
    assert!(committed < released);
    scope.end().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn end_stops_admitting_work_before_finalizing() {
    let (pool, recorder) = pool();
    let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    let guard = scope.begin_work().await.unwrap();
    let handle = Arc::clone(guard.handle());

    scope.complete();
    let ending = tokio::spawn(scope.end());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.is_closing());
    assert!(matches!(handle.begin_work(), Err(OrmError::Disposed(_))));
    assert!(handle.execute("UPDATE t SET x = 2", &[]).await.is_err());
    assert_eq!(recorder.count("commit"), 0);

    drop(guard);
    ending.await.unwrap().unwrap();

    assert_eq!(recorder.count("commit"), 1);
    assert_eq!(recorder.count("tx.execute"), 0);
    assert!(handle.is_disposed());
}

#[tokio::test]
async fn dropped_scope_releases_without_commit() {
    let (pool, recorder) = pool();
    let handle = {
        let scope = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
        scope.connection().await.unwrap()
    };

    assert!(handle.is_disposed());
    assert!(!handle.has_transaction());
    assert_eq!(recorder.count("commit"), 0);
    assert!(matches!(handle.execute("SELECT 1", &[]).await, Err(OrmError::Disposed(_))));
}

#[tokio::test]
async fn ended_scope_refuses_new_work() {
    let (pool, _recorder) = pool();
    let parent = ConnectionScope::new(pool, ConnectionScopeSettings::new(), &OrmConfig::default());
    let handle = parent.connection().await.unwrap();
    parent.end().await.unwrap();

    assert!(matches!(handle.begin_work(), Err(OrmError::Disposed(_))));
    assert!(!handle.commit().await.unwrap());
}

struct SingleTargetPool;

#[async_trait]
impl DatabasePool for SingleTargetPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(RecordingConnection {
            recorder: Arc::new(Recorder::default()),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn override_on_single_target_pool_is_not_supported() {
    let settings = ConnectionScopeSettings::new().connection_string("Server=elsewhere");
    let scope = ConnectionScope::new(Arc::new(SingleTargetPool), settings, &OrmConfig::default());

    assert!(matches!(scope.connection().await, Err(OrmError::NotSupported(_))));
    scope.end().await.unwrap();
}
