//! In-memory collaborators for unit tests.

use crate::client::{
    ClientFactory, Listener, PubSubClient, StatusCategory, StatusEvent, SubscribeRequest,
    UnsubscribeRequest,
};
use crate::config::{ClientConfig, FailoverConfig, ManagerConfig};
use crate::error::{Error, ProbeError};
use crate::probe::Probe;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One call made on a [`MockClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientOp {
    AddListener,
    RemoveListener,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Destroy,
}

struct MockClientInner {
    config: ClientConfig,
    ops: Mutex<Vec<ClientOp>>,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
    destroyed: AtomicBool,
    fail_destroy: bool,
}

/// Records every call; cloning shares the same instance.
#[derive(Clone)]
pub(crate) struct MockClient {
    inner: Arc<MockClientInner>,
}

impl MockClient {
    pub(crate) fn origin(&self) -> &str {
        &self.inner.config.origin
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn ops(&self) -> Vec<ClientOp> {
        self.inner.ops.lock().clone()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Deliver a status event to every attached listener
    pub(crate) fn emit_status(&self, category: StatusCategory) {
        let listeners = self.inner.listeners.lock().clone();
        let event = StatusEvent::new(category);
        for listener in listeners {
            listener.on_status(&event);
        }
    }
}

impl PubSubClient for MockClient {
    fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.inner.ops.lock().push(ClientOp::AddListener);
        self.inner.listeners.lock().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn Listener>) {
        self.inner.ops.lock().push(ClientOp::RemoveListener);
        self.inner
            .listeners
            .lock()
            .retain(|l| !crate::client::same_listener(l, listener));
    }

    fn subscribe(&self, request: &SubscribeRequest) {
        self.inner
            .ops
            .lock()
            .push(ClientOp::Subscribe(request.channels.clone()));
    }

    fn unsubscribe(&self, request: &UnsubscribeRequest) {
        self.inner
            .ops
            .lock()
            .push(ClientOp::Unsubscribe(request.channels.clone()));
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.inner.ops.lock().push(ClientOp::Destroy);
        self.inner.destroyed.store(true, Ordering::SeqCst);
        if self.inner.fail_destroy {
            return Err(Error::Client("destroy failed".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockFactoryInner {
    created: Mutex<Vec<MockClient>>,
    failing_origins: Mutex<HashSet<String>>,
    fail_destroy: AtomicBool,
}

/// Hands out [`MockClient`]s and keeps a clone of each.
#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    inner: Arc<MockFactoryInner>,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail for this origin
    pub(crate) fn fail_create(&self, origin: &str) {
        self.inner.failing_origins.lock().insert(origin.to_string());
    }

    /// Make `destroy` fail on clients created from now on
    pub(crate) fn fail_destroy(&self, fail: bool) {
        self.inner.fail_destroy.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> Vec<MockClient> {
        self.inner.created.lock().clone()
    }

    /// Clients that have not been destroyed
    pub(crate) fn live(&self) -> Vec<MockClient> {
        self.created()
            .into_iter()
            .filter(|c| !c.is_destroyed())
            .collect()
    }

    pub(crate) fn last(&self) -> Option<MockClient> {
        self.inner.created.lock().last().cloned()
    }

    pub(crate) fn origins(&self) -> Vec<String> {
        self.created()
            .iter()
            .map(|c| c.origin().to_string())
            .collect()
    }
}

impl ClientFactory for MockFactory {
    type Client = MockClient;

    fn create(&self, config: &ClientConfig) -> Result<MockClient, Error> {
        if self.inner.failing_origins.lock().contains(&config.origin) {
            return Err(Error::Client(format!("cannot create client for {}", config.origin)));
        }

        let client = MockClient {
            inner: Arc::new(MockClientInner {
                config: config.clone(),
                ops: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
                fail_destroy: self.inner.fail_destroy.load(Ordering::SeqCst),
            }),
        };
        self.inner.created.lock().push(client.clone());
        Ok(client)
    }
}

#[derive(Default)]
struct ScriptedProbeInner {
    healthy: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    stalled: AtomicBool,
}

/// Probe whose verdict per origin is set by the test. Unknown origins fail.
#[derive(Clone, Default)]
pub(crate) struct ScriptedProbe {
    inner: Arc<ScriptedProbeInner>,
}

impl ScriptedProbe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_healthy(&self, origin: &str, healthy: bool) {
        let mut set = self.inner.healthy.lock();
        if healthy {
            set.insert(origin.to_string());
        } else {
            set.remove(origin);
        }
    }

    /// Make every probe hang until it is timed out
    pub(crate) fn stall(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().clone()
    }

    pub(crate) fn calls_to(&self, origin: &str) -> usize {
        self.inner.calls.lock().iter().filter(|o| *o == origin).count()
    }
}

impl Probe for ScriptedProbe {
    async fn probe(&self, origin: &str, _config: &ClientConfig) -> Result<(), ProbeError> {
        self.inner.calls.lock().push(origin.to_string());
        if self.inner.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.inner.healthy.lock().contains(origin) {
            Ok(())
        } else {
            Err(ProbeError::Other(format!("{} unreachable", origin)))
        }
    }
}

/// Listener that does nothing
pub(crate) struct NoopListener;

impl Listener for NoopListener {}

/// Listener that counts status events
#[derive(Default)]
pub(crate) struct CountingListener {
    statuses: AtomicUsize,
}

impl CountingListener {
    pub(crate) fn statuses(&self) -> usize {
        self.statuses.load(Ordering::SeqCst)
    }
}

impl Listener for CountingListener {
    fn on_status(&self, _event: &StatusEvent) {
        self.statuses.fetch_add(1, Ordering::SeqCst);
    }
}

/// Primary `p`, backups `b1`, `b2`, default timing
pub(crate) fn test_config() -> ManagerConfig {
    test_config_with(FailoverConfig::default())
}

pub(crate) fn test_config_with(failover: FailoverConfig) -> ManagerConfig {
    ManagerConfig::builder()
        .client(ClientConfig::new("p", "sub-c-test", "user-1"))
        .backup_origins(["b1", "b2"])
        .failover(failover)
        .build()
        .expect("valid test config")
}

/// Let spawned tasks run without advancing the clock
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock by `secs` and let everything that became due run
pub(crate) async fn advance_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
    settle().await;
}
