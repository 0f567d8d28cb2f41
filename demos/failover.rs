//! Example: Regional failover with an in-memory pub/sub client
//!
//! Simulates a primary origin outage. The client reports network issues,
//! diagnosis confirms the primary is down, the manager fails over to a backup
//! and then moves back once the primary recovers.
//!
//! Run with: RUST_LOG=debug cargo run --example failover

use multiregion_pubsub::{
    ClientConfig, ClientFactory, ConnectionState, Error, FailoverConfig, FailoverManager,
    Listener, ManagerConfig, Probe, ProbeError, PubSubClient, StatusCategory, StatusEvent,
    SubscribeRequest, UnsubscribeRequest,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Client that logs every call instead of talking to the network
struct LoggingClient {
    origin: String,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl LoggingClient {
    fn emit(&self, category: StatusCategory) {
        let listeners = self.listeners.lock().clone();
        let event = StatusEvent::new(category);
        for listener in listeners {
            listener.on_status(&event);
        }
    }
}

impl PubSubClient for LoggingClient {
    fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.lock().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn Listener>) {
        self.listeners
            .lock()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    fn subscribe(&self, request: &SubscribeRequest) {
        info!("[{}] subscribe {:?}", self.origin, request.channels);
    }

    fn unsubscribe(&self, request: &UnsubscribeRequest) {
        info!("[{}] unsubscribe {:?}", self.origin, request.channels);
    }

    async fn destroy(&self) -> Result<(), Error> {
        info!("[{}] destroyed", self.origin);
        Ok(())
    }
}

struct LoggingFactory;

impl ClientFactory for LoggingFactory {
    type Client = LoggingClient;

    fn create(&self, config: &ClientConfig) -> Result<LoggingClient, Error> {
        info!("Creating client for {}", config.origin);
        Ok(LoggingClient {
            origin: config.origin.clone(),
            listeners: Mutex::new(Vec::new()),
        })
    }
}

/// Probe whose answer is driven by a shared set of reachable origins
#[derive(Clone, Default)]
struct SimulatedNetwork {
    up: Arc<RwLock<HashSet<String>>>,
}

impl SimulatedNetwork {
    fn set(&self, origin: &str, up: bool) {
        let mut set = self.up.write();
        if up {
            set.insert(origin.to_string());
        } else {
            set.remove(origin);
        }
    }
}

impl Probe for SimulatedNetwork {
    async fn probe(&self, origin: &str, _config: &ClientConfig) -> Result<(), ProbeError> {
        if self.up.read().contains(origin) {
            Ok(())
        } else {
            Err(ProbeError::Other(format!("{} is down", origin)))
        }
    }
}

/// Prints status events seen by the application
struct AppListener;

impl Listener for AppListener {
    fn on_status(&self, event: &StatusEvent) {
        info!("App saw status {:?}", event.category);
    }
}

async fn wait_for(
    manager: &FailoverManager<LoggingClient>,
    f: impl FnMut(&ConnectionState) -> bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = manager.watch_state();
    let reached = state.wait_for(f).await?.clone();
    info!("State is now {:?}", reached);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let network = SimulatedNetwork::default();
    for origin in ["ps.example.com", "ps-eu.example.com", "ps-ap.example.com"] {
        network.set(origin, true);
    }

    // Short timings so the demo finishes quickly
    let config = ManagerConfig::builder()
        .client(ClientConfig::new("ps.example.com", "sub-c-demo", "demo-user"))
        .backup_origins(["ps-eu.example.com", "ps-ap.example.com"])
        .failover(FailoverConfig {
            diagnosis_delay: Duration::from_millis(200),
            reconnection_interval: Duration::from_secs(1),
            ..FailoverConfig::default()
        })
        .build()?;

    let manager = FailoverManager::with_probe(config, LoggingFactory, network.clone()).await?;
    manager.add_listener(Arc::new(AppListener)).await?;
    manager
        .subscribe(SubscribeRequest::channels(["prices", "trades"]).with_presence(true))
        .await?;

    info!("Primary and first backup go down");
    network.set("ps.example.com", false);
    network.set("ps-eu.example.com", false);
    if let Some(client) = manager.client() {
        client.emit(StatusCategory::NetworkIssues);
    }
    wait_for(&manager, |s| s.is_failover()).await?;
    info!("Serving from {:?}", manager.current_origin());

    info!("Primary comes back");
    network.set("ps.example.com", true);
    wait_for(&manager, |s| *s == ConnectionState::Primary).await?;
    info!("Serving from {:?}", manager.current_origin());

    info!("Final metrics: {:?}", manager.metrics().snapshot());
    manager.shutdown().await?;

    Ok(())
}
