use crate::client::{same_listener, Listener, PubSubClient, SubscribeRequest, UnsubscribeRequest};
use std::sync::Arc;

/// Replay log of everything the application registered.
///
/// Applied in order to every new client binding: listeners, then subscribe
/// calls, then unsubscribe calls. Entries are replayed, never consumed.
///
/// The subscribe and unsubscribe logs are append-only, so a channel that is
/// unsubscribed and then subscribed again replays as subscribed-then-unsubscribed.
#[derive(Default)]
pub(crate) struct BindingRegistry {
    listeners: Vec<Arc<dyn Listener>>,
    subscribe_calls: Vec<SubscribeRequest>,
    unsubscribe_calls: Vec<UnsubscribeRequest>,
}

impl BindingRegistry {
    /// Create an empty registry
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a listener
    pub(crate) fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Forget a listener. Returns `false` if it was never registered.
    pub(crate) fn remove_listener(&mut self, listener: &Arc<dyn Listener>) -> bool {
        match self.listeners.iter().position(|l| same_listener(l, listener)) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Record a subscribe call
    pub(crate) fn record_subscribe(&mut self, request: SubscribeRequest) {
        self.subscribe_calls.push(request);
    }

    /// Record an unsubscribe call
    pub(crate) fn record_unsubscribe(&mut self, request: UnsubscribeRequest) {
        self.unsubscribe_calls.push(request);
    }

    /// Registered listeners in insertion order
    pub(crate) fn listeners(&self) -> &[Arc<dyn Listener>] {
        &self.listeners
    }

    /// Subscribe calls in call order
    pub(crate) fn subscribe_calls(&self) -> &[SubscribeRequest] {
        &self.subscribe_calls
    }

    /// Unsubscribe calls in call order
    pub(crate) fn unsubscribe_calls(&self) -> &[UnsubscribeRequest] {
        &self.unsubscribe_calls
    }

    /// Wire every recorded listener and call into `client`.
    pub(crate) fn replay_onto<C: PubSubClient>(&self, client: &C) {
        for listener in &self.listeners {
            client.add_listener(listener.clone());
        }
        for request in &self.subscribe_calls {
            client.subscribe(request);
        }
        for request in &self.unsubscribe_calls {
            client.unsubscribe(request);
        }
    }

    /// Detach every recorded listener from `client`.
    pub(crate) fn detach_from<C: PubSubClient>(&self, client: &C) {
        for listener in &self.listeners {
            client.remove_listener(listener);
        }
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("listeners", &self.listeners.len())
            .field("subscribe_calls", &self.subscribe_calls)
            .field("unsubscribe_calls", &self.unsubscribe_calls)
            .finish()
    }
}
