use crate::client::{ClientFactory, Listener, PubSubClient};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::registry::BindingRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The live binding as seen from outside the supervisor task
pub(crate) struct Published<C> {
    pub origin: String,
    pub client: Arc<C>,
}

impl<C> Clone for Published<C> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            client: self.client.clone(),
        }
    }
}

/// Shared read-only view of the live binding
pub(crate) type PublishedSlot<C> = Arc<RwLock<Option<Published<C>>>>;

struct LiveBinding<C> {
    id: u64,
    origin: String,
    client: Arc<C>,
    status_listener: Arc<dyn Listener>,
}

/// Owns the single live client instance.
///
/// Only the supervisor task holds an `InstanceBinder`, so every create and
/// destroy goes through one owner. At most one instance exists at a time.
pub(crate) struct InstanceBinder<F: ClientFactory> {
    factory: F,
    live: Option<LiveBinding<F::Client>>,
    published: PublishedSlot<F::Client>,
    next_id: u64,
    teardown_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl<F: ClientFactory> InstanceBinder<F> {
    pub(crate) fn new(factory: F, teardown_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            factory,
            live: None,
            published: Arc::new(RwLock::new(None)),
            next_id: 0,
            teardown_timeout,
            metrics,
        }
    }

    /// Handle to the published view, for the public manager handle
    pub(crate) fn published(&self) -> PublishedSlot<F::Client> {
        self.published.clone()
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self) -> bool {
        self.live.is_some()
    }

    /// Id of the live binding; status events from any other id are stale
    pub(crate) fn binding_id(&self) -> Option<u64> {
        self.live.as_ref().map(|b| b.id)
    }

    pub(crate) fn origin(&self) -> Option<&str> {
        self.live.as_ref().map(|b| b.origin.as_str())
    }

    pub(crate) fn client(&self) -> Option<&Arc<F::Client>> {
        self.live.as_ref().map(|b| &b.client)
    }

    /// Create an instance for `config.origin` and replay `registry` onto it.
    ///
    /// The status listener built by `status_listener` is attached before any
    /// user listener. An existing binding is torn down first.
    pub(crate) async fn bind(
        &mut self,
        config: &ClientConfig,
        registry: &BindingRegistry,
        status_listener: impl FnOnce(u64) -> Arc<dyn Listener>,
    ) -> Result<u64, Error> {
        if self.live.is_some() {
            warn!("[BINDER] Bind requested while an instance is live, unbinding first");
            self.unbind(registry).await;
        }

        let client = Arc::new(self.factory.create(config)?);
        let id = self.next_id;
        self.next_id += 1;

        let status_listener = status_listener(id);
        client.add_listener(status_listener.clone());
        registry.replay_onto(client.as_ref());

        debug!(
            "[BINDER] Binding #{} to {} (listeners: {}, subscribe calls: {}, unsubscribe calls: {})",
            id,
            config.origin,
            registry.listeners().len(),
            registry.subscribe_calls().len(),
            registry.unsubscribe_calls().len()
        );

        *self.published.write() = Some(Published {
            origin: config.origin.clone(),
            client: client.clone(),
        });
        self.live = Some(LiveBinding {
            id,
            origin: config.origin.clone(),
            client,
            status_listener,
        });
        self.metrics.record_bind();

        info!("[BINDER] Bound to {}", config.origin);
        Ok(id)
    }

    /// Release the live instance, if any. Returns `false` when nothing was bound.
    ///
    /// Always runs to completion: a failing or stalled `destroy` is logged
    /// and the listeners are detached regardless.
    pub(crate) async fn unbind(&mut self, registry: &BindingRegistry) -> bool {
        let Some(binding) = self.live.take() else {
            return false;
        };
        *self.published.write() = None;

        match tokio::time::timeout(self.teardown_timeout, binding.client.destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_teardown_failure();
                warn!(
                    "[BINDER] Failed to release instance for {}: {}",
                    binding.origin, e
                );
            }
            Err(_) => {
                self.metrics.record_teardown_failure();
                warn!(
                    "[BINDER] Releasing instance for {} timed out after {:?}",
                    binding.origin, self.teardown_timeout
                );
            }
        }

        binding.client.remove_listener(&binding.status_listener);
        registry.detach_from(binding.client.as_ref());
        self.metrics.record_unbind();

        info!("[BINDER] Unbound #{} from {}", binding.id, binding.origin);
        true
    }
}
