use std::collections::HashSet;
use std::time::Duration;

/// Settings passed through to the pub/sub client on every bind.
///
/// Only `origin` is rewritten by the manager (to the backup origin being
/// bound); every other field reaches the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Network entry point, e.g. `ps.example.com`
    pub origin: String,
    /// Key used for publishing (optional for subscribe-only clients)
    pub publish_key: Option<String>,
    /// Key used for subscribing; also used by the reachability probe
    pub subscribe_key: String,
    /// Secret key for access management
    pub secret_key: Option<String>,
    /// Auth token sent with requests
    pub auth_key: Option<String>,
    /// Identifier of this user/device
    pub user_id: String,
    /// Use TLS
    pub ssl: bool,
    /// Do not emit leave events on unsubscribe
    pub suppress_leave_events: bool,
}

impl ClientConfig {
    /// Create a config for `origin` with the given subscribe key and user id.
    pub fn new(
        origin: impl Into<String>,
        subscribe_key: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            publish_key: None,
            subscribe_key: subscribe_key.into(),
            secret_key: None,
            auth_key: None,
            user_id: user_id.into(),
            ssl: true,
            suppress_leave_events: false,
        }
    }

    /// Set the publish key
    pub fn publish_key(mut self, key: impl Into<String>) -> Self {
        self.publish_key = Some(key.into());
        self
    }

    /// Set the secret key
    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Set the auth key
    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = Some(key.into());
        self
    }

    /// Enable or disable TLS
    pub fn ssl(mut self, enabled: bool) -> Self {
        self.ssl = enabled;
        self
    }

    /// Enable or disable leave event suppression
    pub fn suppress_leave_events(mut self, enabled: bool) -> Self {
        self.suppress_leave_events = enabled;
        self
    }

    /// Copy of this config pointed at another origin.
    pub fn with_origin(&self, origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..self.clone()
        }
    }
}

/// Timing for the diagnosis and reconnection loops
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Delay before each diagnosis probe of the primary origin
    pub diagnosis_delay: Duration,
    /// Failed diagnosis probes in a row before failing over (1 initial + retries)
    pub diagnosis_attempts: u32,
    /// Interval between primary recovery probes while in failover
    pub reconnection_interval: Duration,
    /// Upper bound on a single reachability probe
    pub probe_timeout: Duration,
    /// Upper bound on releasing a client's network resources during unbind
    pub teardown_timeout: Duration,
    /// Extra attempts of a timed out call on one origin before failing over
    pub call_retries: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            diagnosis_delay: Duration::from_secs(10),
            diagnosis_attempts: 5,
            reconnection_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(5),
            call_retries: 2,
        }
    }
}

/// Configuration for the failover manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Client settings for the primary origin
    pub client: ClientConfig,
    /// Backup origins, tried left to right during escalation
    pub backup_origins: Vec<String>,
    /// Diagnosis and reconnection timing
    pub failover: FailoverConfig,
}

impl ManagerConfig {
    /// Create a new builder for configuration
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// The primary origin
    pub fn primary_origin(&self) -> &str {
        &self.client.origin
    }

    /// Check origins, keys and timing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client;
        if client.origin.trim().is_empty() {
            return Err(ConfigError::MissingOrigin);
        }

        if client.subscribe_key.trim().is_empty() {
            return Err(ConfigError::MissingSubscribeKey);
        }

        // Primary and backups must all be distinct
        let mut seen = HashSet::new();
        seen.insert(client.origin.as_str());
        for origin in &self.backup_origins {
            if origin.trim().is_empty() {
                return Err(ConfigError::MissingOrigin);
            }
            if !seen.insert(origin.as_str()) {
                return Err(ConfigError::DuplicateOrigin(origin.clone()));
            }
        }

        let failover = &self.failover;
        if failover.diagnosis_attempts == 0 {
            return Err(ConfigError::InvalidFailover(
                "diagnosis_attempts must be >= 1".to_string(),
            ));
        }

        if failover.diagnosis_delay.is_zero() || failover.reconnection_interval.is_zero() {
            return Err(ConfigError::InvalidFailover(
                "diagnosis_delay and reconnection_interval must be > 0".to_string(),
            ));
        }

        if failover.probe_timeout.is_zero() || failover.teardown_timeout.is_zero() {
            return Err(ConfigError::InvalidFailover(
                "probe_timeout and teardown_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Client config for the backup at `index`, if there is one.
    pub fn backup_config(&self, index: usize) -> Option<ClientConfig> {
        self.backup_origins
            .get(index)
            .map(|origin| self.client.with_origin(origin.as_str()))
    }
}

/// Builder for ManagerConfig
#[derive(Debug, Clone, Default)]
pub struct ManagerConfigBuilder {
    client: Option<ClientConfig>,
    backup_origins: Vec<String>,
    failover: FailoverConfig,
}

impl ManagerConfigBuilder {
    /// Set the primary client configuration
    pub fn client(mut self, config: ClientConfig) -> Self {
        self.client = Some(config);
        self
    }

    /// Set the backup origins (replaces any previously added)
    pub fn backup_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single backup origin
    pub fn backup_origin(mut self, origin: impl Into<String>) -> Self {
        self.backup_origins.push(origin.into());
        self
    }

    /// Set diagnosis and reconnection timing
    pub fn failover(mut self, config: FailoverConfig) -> Self {
        self.failover = config;
        self
    }

    /// Build the configuration with validation.
    ///
    /// Returns an error for a missing primary origin or subscribe key,
    /// repeated origins, or zero delays.
    pub fn build(self) -> Result<ManagerConfig, ConfigError> {
        let config = ManagerConfig {
            client: self.client.ok_or(ConfigError::MissingOrigin)?,
            backup_origins: self.backup_origins,
            failover: self.failover,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No primary origin, or an empty origin string
    #[error("Invalid configuration: origin is missing")]
    MissingOrigin,
    /// Subscribe key is required for binding and probing
    #[error("Invalid configuration: subscribe key is missing")]
    MissingSubscribeKey,
    /// An origin appears more than once among primary and backups
    #[error("Invalid configuration: origin {0} is listed more than once")]
    DuplicateOrigin(String),
    /// Invalid timing configuration
    #[error("Invalid failover configuration: {0}")]
    InvalidFailover(String),
}
