use crate::binder::PublishedSlot;
use crate::client::{ClientFactory, Listener, PubSubClient, SubscribeRequest, UnsubscribeRequest};
use crate::config::ManagerConfig;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::probe::{HttpProbe, Probe};
use crate::supervisor::{Command, ConnectionState, Supervisor};
use crate::Result;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Default command channel buffer size
const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Keeps one pub/sub session alive across regional outages.
///
/// Wraps a [`PubSubClient`] bound to the primary origin. When the client
/// reports network issues and the primary stops answering, the manager
/// rebinds to the next reachable backup origin and replays every listener
/// and subscription onto it. While on a backup it keeps checking the primary
/// and moves back once it answers.
///
/// # Thread Safety
///
/// `FailoverManager` is `Send + Sync` and cheap to clone. All clones talk to
/// the same supervisor task, which applies operations one at a time in the
/// order they arrive. The supervisor stops on [`shutdown`](Self::shutdown) or
/// when the last handle is dropped.
pub struct FailoverManager<C: PubSubClient> {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    published: PublishedSlot<C>,
    metrics: Arc<Metrics>,
    call_retries: u32,
}

impl<C: PubSubClient> Clone for FailoverManager<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
            published: self.published.clone(),
            metrics: self.metrics.clone(),
            call_retries: self.call_retries,
        }
    }
}

impl<C: PubSubClient> FailoverManager<C> {
    /// Create a manager that probes origins over HTTP.
    ///
    /// Binds the primary origin immediately, without probing it. Must be
    /// called from within a tokio runtime.
    pub async fn new<F>(config: ManagerConfig, factory: F) -> Result<Self>
    where
        F: ClientFactory<Client = C>,
    {
        let probe = HttpProbe::new(config.failover.probe_timeout)?;
        Self::with_probe(config, factory, probe).await
    }

    /// Create a manager with a custom reachability probe.
    pub async fn with_probe<F, P>(config: ManagerConfig, factory: F, probe: P) -> Result<Self>
    where
        F: ClientFactory<Client = C>,
        P: Probe,
    {
        config.validate()?;

        let call_retries = config.failover.call_retries;
        let metrics = Arc::new(Metrics::new());
        let (commands_tx, commands_rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
        let mut supervisor = Supervisor::new(
            config,
            factory,
            Arc::new(probe),
            metrics.clone(),
            commands_rx,
        );
        supervisor.bind_primary().await?;

        let state = supervisor.watch_state();
        let published = supervisor.published();
        tokio::spawn(run_supervisor_with_recovery(supervisor, metrics.clone()));

        Ok(Self {
            commands: commands_tx,
            state,
            published,
            metrics,
            call_retries,
        })
    }

    /// Get the metrics for this manager
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Register a listener on the current client and every future one.
    pub async fn add_listener(&self, listener: Arc<dyn Listener>) -> Result<()> {
        self.request(|ack| Command::AddListener { listener, ack })
            .await
    }

    /// Remove a listener added with [`add_listener`](Self::add_listener).
    ///
    /// Matches by `Arc` identity. Returns `false` if it was not registered.
    pub async fn remove_listener(&self, listener: &Arc<dyn Listener>) -> Result<bool> {
        let listener = listener.clone();
        self.request(|ack| Command::RemoveListener { listener, ack })
            .await
    }

    /// Subscribe on the current client; replayed onto every future one.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<()> {
        self.request(|ack| Command::Subscribe { request, ack }).await
    }

    /// Unsubscribe on the current client; replayed onto every future one.
    pub async fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<()> {
        self.request(|ack| Command::Unsubscribe { request, ack })
            .await
    }

    /// Move to the next reachable backup origin.
    ///
    /// From the primary this starts at the first backup; from a backup it
    /// moves one further. Fails with [`Error::OriginsExhausted`] once every
    /// backup has been tried, in which case nothing is bound until the
    /// primary recovers.
    pub async fn failover(&self) -> Result<()> {
        self.request(|ack| Command::Failover { ack }).await?
    }

    /// Rebind to the primary origin and clear failover state.
    pub async fn restore(&self) -> Result<()> {
        self.request(|ack| Command::Restore { ack }).await?
    }

    /// Stop both background loops, release the client and stop the supervisor.
    pub async fn shutdown(&self) -> Result<()> {
        info!("[MANAGER] Shutting down");
        self.request(|ack| Command::Shutdown { ack }).await
    }

    /// Run a one-shot remote action against the live client, failing over
    /// when it keeps timing out.
    ///
    /// `action` is retried on the same client `call_retries` times while it
    /// returns [`Error::Timeout`]. After that the manager fails over and the
    /// action runs again on the new client. Any other result is returned as
    /// is. If every backup is exhausted, the last timeout is returned.
    ///
    /// Only the first caller to see a given client time out triggers the
    /// failover; concurrent callers retry on whatever client is live by then.
    pub async fn call_with_failover<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let client = match self.client() {
                Some(client) => client,
                None => {
                    self.failover().await?;
                    continue;
                }
            };

            let mut attempts = 0;
            let last_err = loop {
                match action(client.clone()).await {
                    Err(e) if e.is_timeout() => {
                        self.metrics.record_call_timeout();
                        attempts += 1;
                        if attempts > self.call_retries {
                            break e;
                        }
                        debug!(
                            "[CALL] Timed out on {:?}, retry {}/{}",
                            self.current_origin(),
                            attempts,
                            self.call_retries
                        );
                    }
                    other => return other,
                }
            };

            let still_live = self
                .client()
                .is_some_and(|live| Arc::ptr_eq(&live, &client));
            if !still_live {
                continue;
            }

            warn!(
                "[CALL] {} attempts timed out on {:?}, failing over",
                attempts,
                self.current_origin()
            );
            if let Err(e) = self.failover().await {
                warn!("[CALL] Giving up: {}", e);
                return Err(last_err);
            }
        }
    }

    /// Whether a backup origin is in use (or all of them failed)
    pub fn is_in_failover(&self) -> bool {
        self.state.borrow().is_failover()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every connection state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The live client instance, if one is bound.
    ///
    /// Calls made directly on it are not recorded and will not survive a
    /// rebind.
    pub fn client(&self) -> Option<Arc<C>> {
        self.published.read().as_ref().map(|p| p.client.clone())
    }

    /// Origin of the live client instance, if one is bound
    pub fn current_origin(&self) -> Option<String> {
        self.published.read().as_ref().map(|p| p.origin.clone())
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }
}

/// Run the supervisor, catching panics so they are logged instead of lost.
async fn run_supervisor_with_recovery<F: ClientFactory, P: Probe>(
    supervisor: Supervisor<F, P>,
    metrics: Arc<Metrics>,
) {
    match AssertUnwindSafe(supervisor.run()).catch_unwind().await {
        Ok(()) => {
            debug!(
                "[MANAGER] Supervisor exited ({} failovers, {} restores)",
                metrics.failovers(),
                metrics.restores()
            );
        }
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(
                "[MANAGER] Supervisor PANICKED: {}. Manager is now dead.",
                panic_msg
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StatusCategory;
    use crate::config::{ClientConfig, ConfigError};
    use crate::testing::{
        settle, test_config, CountingListener, MockClient, MockFactory, ScriptedProbe,
    };
    use std::time::Duration;
    use tokio::time::Instant;

    async fn manager(factory: &MockFactory, probe: &ScriptedProbe) -> FailoverManager<MockClient> {
        FailoverManager::with_probe(test_config(), factory.clone(), probe.clone())
            .await
            .unwrap()
    }

    async fn wait_for_state(
        manager: &FailoverManager<MockClient>,
        within: Duration,
        f: impl FnMut(&ConnectionState) -> bool,
    ) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(within, rx.wait_for(f))
            .await
            .expect("state change timed out")
            .expect("supervisor stopped");
    }

    #[tokio::test]
    async fn test_new_binds_primary() {
        let factory = MockFactory::new();
        let manager = FailoverManager::new(test_config(), factory.clone())
            .await
            .unwrap();

        assert_eq!(manager.current_origin().as_deref(), Some("p"));
        assert_eq!(manager.state(), ConnectionState::Primary);
        assert!(!manager.is_in_failover());
        assert_eq!(manager.client().unwrap().origin(), "p");
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_new_fails_when_primary_cannot_bind() {
        let factory = MockFactory::new();
        factory.fail_create("p");

        let result = FailoverManager::with_probe(test_config(), factory, ScriptedProbe::new()).await;

        assert!(matches!(result, Err(Error::Client(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.backup_origins.push("p".to_string());

        let result =
            FailoverManager::with_probe(config, MockFactory::new(), ScriptedProbe::new()).await;

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::DuplicateOrigin(ref o))) if o == "p"
        ));
    }

    #[tokio::test]
    async fn test_operations_forwarded_and_replayed() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);
        let manager = manager(&factory, &probe).await;

        let listener = Arc::new(CountingListener::default());
        manager.add_listener(listener.clone()).await.unwrap();
        manager
            .subscribe(SubscribeRequest::channels(["prices"]))
            .await
            .unwrap();

        manager.failover().await.unwrap();

        assert!(manager.is_in_failover());
        assert_eq!(manager.current_origin().as_deref(), Some("b1"));
        let backup = manager.client().unwrap();
        assert_eq!(backup.listener_count(), 2);
        assert_eq!(backup.config().subscribe_key, "sub-c-test");

        backup.emit_status(StatusCategory::Connected);
        assert_eq!(listener.statuses(), 1);
    }

    #[tokio::test]
    async fn test_remove_listener_by_identity() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;
        let listener: Arc<dyn Listener> = Arc::new(CountingListener::default());

        manager.add_listener(listener.clone()).await.unwrap();
        assert!(manager.remove_listener(&listener).await.unwrap());
        assert!(!manager.remove_listener(&listener).await.unwrap());
        assert_eq!(manager.client().unwrap().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reported_to_caller() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;

        let err = manager.failover().await.unwrap_err();

        assert!(err.is_exhausted());
        assert!(manager.is_in_failover());
        assert_eq!(manager.state(), ConnectionState::Exhausted { attempted: 2 });
        assert!(manager.client().is_none());
        assert!(factory.live().is_empty());
    }

    #[tokio::test]
    async fn test_restore_clears_failover() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);
        let manager = manager(&factory, &probe).await;

        manager.failover().await.unwrap();
        manager.restore().await.unwrap();

        assert!(!manager.is_in_failover());
        assert_eq!(manager.current_origin().as_deref(), Some("p"));
        assert_eq!(factory.live().len(), 1);
        assert_eq!(manager.metrics().restores(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_client() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;

        manager.shutdown().await.unwrap();

        assert!(factory.live().is_empty());
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert!(manager.client().is_none());
        assert!(matches!(
            manager.failover().await,
            Err(Error::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_supervisor() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;
        let other = manager.clone();
        let mut state = manager.watch_state();

        drop(manager);
        settle().await;
        assert_eq!(factory.live().len(), 1);

        drop(other);
        state
            .wait_for(|s| *s == ConnectionState::Stopped)
            .await
            .unwrap();
        assert!(factory.live().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_issue_to_backup_and_back() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);
        let manager = manager(&factory, &probe).await;
        let start = Instant::now();

        manager
            .client()
            .unwrap()
            .emit_status(StatusCategory::NetworkIssues);
        wait_for_state(&manager, Duration::from_secs(120), |s| s.is_failover()).await;

        // Five probes, one every 10s
        assert!(start.elapsed() >= Duration::from_secs(50));
        assert_eq!(probe.calls_to("p"), 5);
        assert_eq!(manager.current_origin().as_deref(), Some("b1"));
        assert_eq!(manager.metrics().failovers(), 1);

        let failed_over_at = Instant::now();
        probe.set_healthy("p", true);
        wait_for_state(&manager, Duration::from_secs(120), |s| {
            *s == ConnectionState::Primary
        })
        .await;

        assert!(failed_over_at.elapsed() >= Duration::from_secs(60));
        assert_eq!(manager.current_origin().as_deref(), Some("p"));
        assert!(!manager.is_in_failover());
        assert_eq!(factory.live().len(), 1);
    }

    fn timing_out_on<'a>(
        slow: &'static [&'static str],
        calls: &'a Arc<parking_lot::Mutex<Vec<String>>>,
    ) -> impl Fn(Arc<MockClient>) -> std::future::Ready<Result<String>> + 'a {
        move |client| {
            let origin = client.origin().to_string();
            calls.lock().push(origin.clone());
            if slow.contains(&origin.as_str()) {
                std::future::ready(Err(Error::Timeout(format!("{} did not answer", origin))))
            } else {
                std::future::ready(Ok(origin))
            }
        }
    }

    #[tokio::test]
    async fn test_call_retries_on_same_origin() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;
        let attempts = Arc::new(parking_lot::Mutex::new(0));

        let result = manager
            .call_with_failover(|client| {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock();
                    *n += 1;
                    if *n < 3 {
                        Err(Error::Timeout("slow".into()))
                    } else {
                        Ok(client.origin().to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "p");
        assert_eq!(*attempts.lock(), 3);
        assert!(!manager.is_in_failover());
        assert_eq!(manager.metrics().call_timeouts(), 2);
    }

    #[tokio::test]
    async fn test_call_fails_over_after_retries() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);
        let manager = manager(&factory, &probe).await;
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result = manager
            .call_with_failover(timing_out_on(&["p"], &calls))
            .await
            .unwrap();

        assert_eq!(result, "b1");
        assert_eq!(*calls.lock(), vec!["p", "p", "p", "b1"]);
        assert_eq!(
            manager.state(),
            ConnectionState::Backup {
                index: 0,
                origin: "b1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_call_returns_other_errors_immediately() {
        let factory = MockFactory::new();
        let manager = manager(&factory, &ScriptedProbe::new()).await;
        let calls = Arc::new(parking_lot::Mutex::new(0));

        let result: Result<()> = manager
            .call_with_failover(|_client| {
                let calls = calls.clone();
                async move {
                    *calls.lock() += 1;
                    Err(Error::Client("access denied".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Client(_))));
        assert_eq!(*calls.lock(), 1);
        assert!(!manager.is_in_failover());
    }

    #[tokio::test]
    async fn test_call_everywhere_timing_out_returns_timeout() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);
        probe.set_healthy("b2", true);
        let manager = manager(&factory, &probe).await;
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let err = manager
            .call_with_failover(timing_out_on(&["p", "b1", "b2"], &calls))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.lock().len(), 9);
        assert_eq!(manager.state(), ConnectionState::Exhausted { attempted: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_key_reaches_every_binding() {
        let factory = MockFactory::new();
        let probe = ScriptedProbe::new();
        probe.set_healthy("b1", true);

        let mut config = test_config();
        config.client = ClientConfig::new("p", "sub-c-test", "user-1").auth_key("secret-token");
        let manager = FailoverManager::with_probe(config, factory.clone(), probe)
            .await
            .unwrap();

        manager.failover().await.unwrap();

        for client in factory.created() {
            assert_eq!(client.config().auth_key.as_deref(), Some("secret-token"));
        }
    }
}
