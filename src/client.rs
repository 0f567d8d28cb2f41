use crate::config::ClientConfig;
use crate::error::Error;
use std::future::Future;
use std::sync::Arc;

/// Status categories reported by the pub/sub client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// Subscribe loop connected
    Connected,
    /// Subscribe loop reconnected after an interruption
    Reconnected,
    /// Subscribe loop stopped
    Disconnected,
    /// Requests are failing at the network level
    NetworkIssues,
    /// Network came back
    NetworkUp,
    /// Network went away
    NetworkDown,
    /// A request timed out
    Timeout,
    /// Access manager rejected a request
    AccessDenied,
    /// Malformed request
    BadRequest,
    /// Anything else
    Unknown,
}

impl StatusCategory {
    /// Whether this status should start a diagnosis cycle.
    pub fn is_network_issue(self) -> bool {
        matches!(self, StatusCategory::NetworkIssues)
    }
}

/// A status event from the client's status feed
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// Category of the event
    pub category: StatusCategory,
    /// Channels affected, if the client reports them
    pub affected_channels: Vec<String>,
    /// Whether the status describes an error
    pub error: bool,
}

impl StatusEvent {
    /// A status event with no affected channels.
    pub fn new(category: StatusCategory) -> Self {
        Self {
            category,
            affected_channels: Vec::new(),
            error: !matches!(
                category,
                StatusCategory::Connected | StatusCategory::Reconnected | StatusCategory::NetworkUp
            ),
        }
    }
}

/// A message delivered on a subscribed channel
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub channel: String,
    /// Channel group or wildcard the message matched, if any
    pub subscription: Option<String>,
    pub message: serde_json::Value,
    pub publisher: Option<String>,
    pub timetoken: u64,
}

/// A presence event (join, leave, timeout, state change)
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub channel: String,
    pub action: String,
    pub uuid: Option<String>,
    pub occupancy: u32,
    pub timetoken: u64,
}

/// Callbacks the client invokes for incoming events.
///
/// Listeners are registered with the manager as `Arc<dyn Listener>` and are
/// identified by pointer, so removal needs the same `Arc` that was added.
pub trait Listener: Send + Sync + 'static {
    /// Called for every status event
    fn on_status(&self, _event: &StatusEvent) {}

    /// Called for every message on a subscribed channel
    fn on_message(&self, _event: &MessageEvent) {}

    /// Called for every presence event
    fn on_presence(&self, _event: &PresenceEvent) {}
}

/// Pointer identity for listeners (ignores vtable differences).
pub(crate) fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// A subscribe call as issued by the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
    pub with_presence: bool,
    /// Resume from this timetoken instead of "now"
    pub timetoken: Option<u64>,
}

impl SubscribeRequest {
    /// Subscribe to the given channels
    pub fn channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Also receive presence events for these channels
    pub fn with_presence(mut self, enabled: bool) -> Self {
        self.with_presence = enabled;
        self
    }

    /// Add channel groups to the request
    pub fn channel_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

/// An unsubscribe call as issued by the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
}

impl UnsubscribeRequest {
    /// Unsubscribe from the given channels
    pub fn channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// A live pub/sub client instance bound to one origin.
///
/// This is the boundary to the provider's SDK. The manager only ever calls
/// these methods from its supervisor task, one binding at a time.
pub trait PubSubClient: Send + Sync + 'static {
    /// Register a listener for status, message and presence events
    fn add_listener(&self, listener: Arc<dyn Listener>);

    /// Remove a previously registered listener
    fn remove_listener(&self, listener: &Arc<dyn Listener>);

    /// Start receiving on channels/groups
    fn subscribe(&self, request: &SubscribeRequest);

    /// Stop receiving on channels/groups
    fn unsubscribe(&self, request: &UnsubscribeRequest);

    /// Release all network resources held by this instance.
    ///
    /// Called once when the instance is unbound. Errors are logged by the
    /// manager and never block the next bind.
    fn destroy(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Creates client instances for a given configuration.
pub trait ClientFactory: Send + Sync + 'static {
    /// The client type produced
    type Client: PubSubClient;

    /// Create a client bound to `config.origin`.
    fn create(&self, config: &ClientConfig) -> Result<Self::Client, Error>;
}
