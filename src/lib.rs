//! # multiregion-pubsub
//!
//! Keeps a pub/sub session alive across regional outages by rebinding the
//! client to backup origins.
//!
//! ## Features
//!
//! - **Diagnosis** of reported network issues with bounded probing of the primary
//! - **Failover** through an ordered list of backup origins, probing each first
//! - **Reconnection** checks that move back to the primary once it answers
//! - **Replay** of listeners and subscriptions onto every new client instance
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use multiregion_pubsub::{ClientConfig, FailoverManager, ManagerConfig, SubscribeRequest};
//!
//! let config = ManagerConfig::builder()
//!     .client(ClientConfig::new("ps.example.com", "sub-c-...", "user-1"))
//!     .backup_origins(["ps-eu.example.com", "ps-ap.example.com"])
//!     .build()?;
//!
//! let manager = FailoverManager::new(config, MyClientFactory).await?;
//! manager.add_listener(Arc::new(MyListener)).await?;
//! manager.subscribe(SubscribeRequest::channels(["prices"])).await?;
//! ```

mod binder;
mod client;
mod config;
mod diagnosis;
mod error;
mod manager;
mod metrics;
mod probe;
mod reconnection;
mod registry;
mod supervisor;
mod timer;

#[cfg(test)]
mod testing;

pub use client::{
    ClientFactory, Listener, MessageEvent, PresenceEvent, PubSubClient, StatusCategory,
    StatusEvent, SubscribeRequest, UnsubscribeRequest,
};
pub use config::{ClientConfig, ConfigError, FailoverConfig, ManagerConfig, ManagerConfigBuilder};
pub use error::{Error, ErrorKind, ProbeError};
pub use manager::FailoverManager;
pub use metrics::{Metrics, MetricsSnapshot};
pub use probe::{HttpProbe, Probe};
pub use supervisor::ConnectionState;

/// Result type for multiregion-pubsub operations
pub type Result<T> = std::result::Result<T, Error>;
