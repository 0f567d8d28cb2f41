use crate::binder::{InstanceBinder, PublishedSlot};
use crate::client::{
    ClientFactory, Listener, PubSubClient, StatusCategory, StatusEvent, SubscribeRequest,
    UnsubscribeRequest,
};
use crate::config::{ClientConfig, ManagerConfig};
use crate::diagnosis::{Diagnosis, DiagnosisVerdict};
use crate::error::{Error, ProbeError};
use crate::metrics::Metrics;
use crate::probe::{probe_with_timeout, spawn_probe, Probe};
use crate::reconnection::{Reconnection, ReconnectionVerdict};
use crate::registry::BindingRegistry;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Where the manager is currently connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bound to the primary origin
    Primary,
    /// Bound to the backup origin at `index`
    Backup { index: usize, origin: String },
    /// Escalation ran past the last backup; waiting for the primary to recover
    Exhausted { attempted: usize },
    /// Manager has shut down
    Stopped,
}

impl ConnectionState {
    /// Whether the primary origin has been abandoned
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            ConnectionState::Backup { .. } | ConnectionState::Exhausted { .. }
        )
    }
}

/// Internal failover route. `Degraded` may point past the end of the backup
/// list once escalation is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Primary,
    Degraded { index: usize },
}

/// Requests from the public handle, each acknowledged on its oneshot
pub(crate) enum Command {
    AddListener {
        listener: Arc<dyn Listener>,
        ack: oneshot::Sender<()>,
    },
    RemoveListener {
        listener: Arc<dyn Listener>,
        ack: oneshot::Sender<bool>,
    },
    Subscribe {
        request: SubscribeRequest,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        request: UnsubscribeRequest,
        ack: oneshot::Sender<()>,
    },
    Failover {
        ack: oneshot::Sender<Result<()>>,
    },
    Restore {
        ack: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Things that happen to the supervisor: client status, timers, probe outcomes
#[derive(Debug)]
pub(crate) enum Event {
    Status {
        binding: u64,
        category: StatusCategory,
    },
    DiagnosisDue {
        generation: u64,
    },
    DiagnosisProbed {
        generation: u64,
        outcome: std::result::Result<(), ProbeError>,
    },
    ReconnectionDue {
        generation: u64,
    },
    ReconnectionProbed {
        generation: u64,
        outcome: std::result::Result<(), ProbeError>,
    },
}

/// First listener on every binding; forwards status tagged with the binding id.
struct StatusRelay {
    binding: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl Listener for StatusRelay {
    fn on_status(&self, event: &StatusEvent) {
        let _ = self.events.send(Event::Status {
            binding: self.binding,
            category: event.category,
        });
    }
}

/// Sole owner of the live binding and all failover state.
///
/// Runs as one task. Commands and events are handled one at a time, and
/// escalation/restore probes are awaited inline, so no two binding changes
/// ever interleave.
pub(crate) struct Supervisor<F: ClientFactory, P: Probe> {
    config: ManagerConfig,
    binder: InstanceBinder<F>,
    registry: BindingRegistry,
    probe: Arc<P>,
    route: Route,
    diagnosis: Diagnosis,
    reconnection: Reconnection,
    metrics: Arc<Metrics>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    state: watch::Sender<ConnectionState>,
}

impl<F: ClientFactory, P: Probe> Supervisor<F, P> {
    pub(crate) fn new(
        config: ManagerConfig,
        factory: F,
        probe: Arc<P>,
        metrics: Arc<Metrics>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Primary);
        let failover = &config.failover;

        Self {
            binder: InstanceBinder::new(factory, failover.teardown_timeout, metrics.clone()),
            diagnosis: Diagnosis::new(failover.diagnosis_delay, failover.diagnosis_attempts),
            reconnection: Reconnection::new(failover.reconnection_interval),
            config,
            registry: BindingRegistry::new(),
            probe,
            route: Route::Primary,
            metrics,
            commands,
            events_tx,
            events_rx,
            state,
        }
    }

    pub(crate) fn published(&self) -> PublishedSlot<F::Client> {
        self.binder.published()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Bind the primary origin without probing it.
    pub(crate) async fn bind_primary(&mut self) -> Result<()> {
        let primary = self.config.client.clone();
        self.bind(&primary).await?;
        self.route = Route::Primary;
        self.publish_state();
        Ok(())
    }

    /// Process commands and events until shutdown or until every handle is gone.
    pub(crate) async fn run(mut self) {
        info!(
            "[SUPERVISOR] Running on {} with {} backup origin(s)",
            self.config.primary_origin(),
            self.config.backup_origins.len()
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { ack }) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("[SUPERVISOR] All handles dropped");
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddListener { listener, ack } => {
                self.registry.add_listener(listener.clone());
                if let Some(client) = self.binder.client() {
                    client.add_listener(listener);
                }
                let _ = ack.send(());
            }
            Command::RemoveListener { listener, ack } => {
                let removed = self.registry.remove_listener(&listener);
                if let Some(client) = self.binder.client() {
                    client.remove_listener(&listener);
                }
                let _ = ack.send(removed);
            }
            Command::Subscribe { request, ack } => {
                if let Some(client) = self.binder.client() {
                    client.subscribe(&request);
                }
                self.registry.record_subscribe(request);
                let _ = ack.send(());
            }
            Command::Unsubscribe { request, ack } => {
                if let Some(client) = self.binder.client() {
                    client.unsubscribe(&request);
                }
                self.registry.record_unsubscribe(request);
                let _ = ack.send(());
            }
            Command::Failover { ack } => {
                let result = self.failover().await;
                let _ = ack.send(result);
            }
            Command::Restore { ack } => {
                let result = self.restore().await;
                let _ = ack.send(result);
            }
            Command::Shutdown { ack } => {
                // Handled by the run loop; reaching here means a second request
                let _ = ack.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Status { binding, category } => self.on_status(binding, category),
            Event::DiagnosisDue { generation } => {
                let probe = self.probe.clone();
                let primary = self.config.client.clone();
                let timeout = self.config.failover.probe_timeout;
                let events = self.events_tx.clone();

                let fired = self.diagnosis.fire(generation, move |generation| {
                    spawn_probe(probe, primary, timeout, events, move |outcome| {
                        Event::DiagnosisProbed {
                            generation,
                            outcome,
                        }
                    })
                });
                if fired {
                    debug!(
                        "[DIAGNOSIS] Probing {} (attempt {}/{})",
                        self.config.primary_origin(),
                        self.diagnosis.retry_count() + 1,
                        self.config.failover.diagnosis_attempts
                    );
                }
            }
            Event::DiagnosisProbed {
                generation,
                outcome,
            } => self.on_diagnosis_probed(generation, outcome).await,
            Event::ReconnectionDue { generation } => {
                let probe = self.probe.clone();
                let primary = self.config.client.clone();
                let timeout = self.config.failover.probe_timeout;
                let events = self.events_tx.clone();

                let fired = self.reconnection.fire(generation, move |generation| {
                    spawn_probe(probe, primary, timeout, events, move |outcome| {
                        Event::ReconnectionProbed {
                            generation,
                            outcome,
                        }
                    })
                });
                if fired {
                    debug!(
                        "[RECONNECT] Checking whether {} is back",
                        self.config.primary_origin()
                    );
                }
            }
            Event::ReconnectionProbed {
                generation,
                outcome,
            } => self.on_reconnection_probed(generation, outcome).await,
        }
    }

    fn on_status(&mut self, binding: u64, category: StatusCategory) {
        if self.binder.binding_id() != Some(binding) {
            trace!(
                "[SUPERVISOR] Ignoring {:?} from replaced binding #{}",
                category,
                binding
            );
            return;
        }

        let network_issue = category.is_network_issue();
        self.metrics.record_status_event(network_issue);
        if !network_issue {
            return;
        }

        if self.diagnosis.trigger(&self.events_tx) {
            self.metrics.record_diagnosis_cycle();
            warn!(
                "[DIAGNOSIS] Network issues on {}, checking {} in {:?}",
                self.binder.origin().unwrap_or("<unbound>"),
                self.config.primary_origin(),
                self.config.failover.diagnosis_delay
            );
        } else {
            trace!("[DIAGNOSIS] Cycle already running, ignoring network issue");
        }
    }

    async fn on_diagnosis_probed(
        &mut self,
        generation: u64,
        outcome: std::result::Result<(), ProbeError>,
    ) {
        let verdict = self
            .diagnosis
            .complete(generation, outcome.is_ok(), &self.events_tx);
        if verdict == DiagnosisVerdict::Stale {
            return;
        }
        self.metrics.record_probe(outcome.is_ok());

        match verdict {
            DiagnosisVerdict::Healthy => {
                info!(
                    "[DIAGNOSIS] {} is reachable, network issue was transient",
                    self.config.primary_origin()
                );
            }
            DiagnosisVerdict::Retry { retries } => {
                if let Err(e) = &outcome {
                    warn!(
                        "[DIAGNOSIS] Probe {}/{} of {} failed: {}",
                        retries,
                        self.config.failover.diagnosis_attempts,
                        self.config.primary_origin(),
                        e
                    );
                }
            }
            DiagnosisVerdict::Escalate => {
                warn!(
                    "[DIAGNOSIS] {} failed {} probes in a row, failing over",
                    self.config.primary_origin(),
                    self.config.failover.diagnosis_attempts
                );
                if let Err(e) = self.failover().await {
                    error!("[FAILOVER] Diagnosed failover failed: {}", e);
                }
            }
            DiagnosisVerdict::Stale => {}
        }
    }

    async fn on_reconnection_probed(
        &mut self,
        generation: u64,
        outcome: std::result::Result<(), ProbeError>,
    ) {
        let verdict = self
            .reconnection
            .complete(generation, outcome.is_ok(), &self.events_tx);
        if verdict == ReconnectionVerdict::Stale {
            return;
        }
        self.metrics.record_probe(outcome.is_ok());

        match verdict {
            ReconnectionVerdict::PrimaryRecovered => {
                info!(
                    "[RECONNECT] {} is reachable again, restoring",
                    self.config.primary_origin()
                );
                if let Err(e) = self.restore().await {
                    error!("[RECONNECT] Restore failed: {}", e);
                }
            }
            ReconnectionVerdict::StillDown => {
                if let Err(e) = &outcome {
                    debug!(
                        "[RECONNECT] {} still down: {}, next check in {:?}",
                        self.config.primary_origin(),
                        e,
                        self.config.failover.reconnection_interval
                    );
                }
            }
            ReconnectionVerdict::Stale => {}
        }
    }

    /// Move to the next backup origin, probing each candidate first.
    ///
    /// Candidates that fail their probe or cannot be bound are skipped. Runs
    /// off the end of the list into [`Error::OriginsExhausted`]; reconnection
    /// keeps running in that case.
    pub(crate) async fn failover(&mut self) -> Result<()> {
        self.metrics.record_failover();
        self.diagnosis.cancel();

        let mut index = match self.route {
            Route::Primary => {
                self.reconnection.start(&self.events_tx);
                0
            }
            Route::Degraded { index } => index + 1,
        };

        loop {
            self.route = Route::Degraded { index };
            self.binder.unbind(&self.registry).await;

            let Some(backup) = self.config.backup_config(index) else {
                self.metrics.record_origins_exhausted();
                error!(
                    "[FAILOVER] All {} backup origin(s) exhausted, waiting for {} to recover",
                    self.config.backup_origins.len(),
                    self.config.primary_origin()
                );
                self.publish_state();
                return Err(Error::OriginsExhausted { attempted: index });
            };

            self.metrics.record_backup_attempt();
            info!("[FAILOVER] Trying backup #{}: {}", index, backup.origin);

            let outcome = probe_with_timeout(
                self.probe.as_ref(),
                &backup.origin,
                &backup,
                self.config.failover.probe_timeout,
            )
            .await;
            self.metrics.record_probe(outcome.is_ok());

            match outcome {
                Ok(()) => match self.bind(&backup).await {
                    Ok(_) => {
                        self.publish_state();
                        info!("[FAILOVER] Now on backup #{}: {}", index, backup.origin);
                        return Ok(());
                    }
                    Err(e) => warn!("[FAILOVER] Could not bind {}: {}", backup.origin, e),
                },
                Err(e) => warn!("[FAILOVER] Backup {} unreachable: {}", backup.origin, e),
            }

            index += 1;
        }
    }

    /// Return to the primary origin and drop all failover state.
    ///
    /// If the primary cannot be bound, the previous backup is rebound and
    /// reconnection is re-armed. When there was no previous backup the
    /// manager fails over instead.
    pub(crate) async fn restore(&mut self) -> Result<()> {
        self.reconnection.cancel();
        self.diagnosis.cancel();
        self.binder.unbind(&self.registry).await;

        let primary = self.config.client.clone();
        match self.bind(&primary).await {
            Ok(_) => {
                self.route = Route::Primary;
                self.metrics.record_restore();
                self.publish_state();
                info!("[RESTORE] Back on primary {}", primary.origin);
                Ok(())
            }
            Err(e) => {
                error!("[RESTORE] Could not bind primary {}: {}", primary.origin, e);
                match self.route {
                    Route::Degraded { index } => {
                        if let Some(backup) = self.config.backup_config(index) {
                            if let Err(rebind_err) = self.bind(&backup).await {
                                warn!("[RESTORE] Could not rebind {}: {}", backup.origin, rebind_err);
                            }
                        }
                        self.reconnection.start(&self.events_tx);
                        self.publish_state();
                    }
                    Route::Primary => {
                        // Nothing is bound now; leave the primary for a backup
                        warn!("[RESTORE] Primary unavailable, failing over");
                        if let Err(failover_err) = self.failover().await {
                            error!("[RESTORE] Failover after restore failed: {}", failover_err);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn bind(&mut self, config: &ClientConfig) -> Result<u64> {
        let events = self.events_tx.clone();
        self.binder
            .bind(config, &self.registry, move |binding| {
                Arc::new(StatusRelay { binding, events }) as Arc<dyn Listener>
            })
            .await
    }

    async fn teardown(&mut self) {
        self.diagnosis.cancel();
        self.reconnection.cancel();
        self.binder.unbind(&self.registry).await;
        self.state.send_replace(ConnectionState::Stopped);
        info!("[SUPERVISOR] Stopped");
    }

    fn publish_state(&self) {
        let state = match self.route {
            Route::Primary => ConnectionState::Primary,
            Route::Degraded { index } => match self.config.backup_origins.get(index) {
                Some(origin) => ConnectionState::Backup {
                    index,
                    origin: origin.clone(),
                },
                None => ConnectionState::Exhausted { attempted: index },
            },
        };
        self.state.send_replace(state);
    }
}
