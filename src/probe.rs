use crate::config::ClientConfig;
use crate::error::{Error, ProbeError};
use crate::timer::ScheduledTask;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

/// Channel name used by the reachability request
const PROBE_CHANNEL: &str = "reconnection_test";

/// Reachability check against a candidate origin.
///
/// A probe is a pass/fail oracle: no retries, no side effects beyond the
/// request itself. Retry policy lives in the diagnosis and reconnection loops.
pub trait Probe: Send + Sync + 'static {
    /// Check whether `origin` answers for the subscribe key in `config`.
    fn probe(
        &self,
        origin: &str,
        config: &ClientConfig,
    ) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// Probes an origin with a zero-timetoken subscribe request.
///
/// Success means the request completed and the body parsed as JSON. The HTTP
/// status is not judged: an origin that answers at all is reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Create a probe around an existing HTTP client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// Build `{scheme}://{origin}/v2/subscribe/{sub_key}/reconnection_test/0`.
pub(crate) fn probe_url(origin: &str, config: &ClientConfig) -> Result<Url, ProbeError> {
    let scheme = if config.ssl { "https" } else { "http" };
    let mut url = Url::parse(&format!("{}://{}/", scheme, origin))?;

    url.path_segments_mut()
        .map_err(|_| ProbeError::Other(format!("origin {} cannot carry a path", origin)))?
        .pop_if_empty()
        .extend(["v2", "subscribe", config.subscribe_key.as_str(), PROBE_CHANNEL, "0"]);

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("uuid", &config.user_id);
        if let Some(auth) = &config.auth_key {
            query.append_pair("auth", auth);
        }
    }

    Ok(url)
}

impl Probe for HttpProbe {
    async fn probe(&self, origin: &str, config: &ClientConfig) -> Result<(), ProbeError> {
        let url = probe_url(origin, config)?;
        trace!("[PROBE] GET {}", url.path());

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        serde_json::from_slice::<serde_json::Value>(&body)?;

        trace!("[PROBE] {} answered {} ({} bytes)", origin, status, body.len());
        Ok(())
    }
}

/// Run one probe, failing with [`ProbeError::Timeout`] if it stalls.
pub(crate) async fn probe_with_timeout<P: Probe>(
    probe: &P,
    origin: &str,
    config: &ClientConfig,
    timeout: Duration,
) -> Result<(), ProbeError> {
    match tokio::time::timeout(timeout, probe.probe(origin, config)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Probe `config.origin` in a background task and deliver the outcome as an event.
pub(crate) fn spawn_probe<P, E, F>(
    probe: Arc<P>,
    config: ClientConfig,
    timeout: Duration,
    events: mpsc::UnboundedSender<E>,
    into_event: F,
) -> ScheduledTask
where
    P: Probe,
    E: Send + 'static,
    F: FnOnce(Result<(), ProbeError>) -> E + Send + 'static,
{
    ScheduledTask::spawn(async move {
        let outcome = probe_with_timeout(probe.as_ref(), &config.origin, &config, timeout).await;
        // Receiver gone means the supervisor stopped; nothing to report to
        let _ = events.send(into_event(outcome));
    })
}
