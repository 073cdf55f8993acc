use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{DeliveryError, StatsSink};
use crate::stats::StatsPayload;

/// HTTP client for one dashboard API endpoint.
#[derive(Debug)]
pub struct DashboardClient {
    http: reqwest::Client,
    base_url: String,
}

impl DashboardClient {
    /// Create a client authenticated with the api key as bearer token.
    pub fn new(base_url: &str, api_key: &str, version: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "satellite-version",
            HeaderValue::from_str(version).context("invalid version header")?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("invalid api key header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .get(format!("{}/api/ping", self.base_url))
            .send()
            .await?;

        check_status(resp.status())
    }

    pub async fn patch_stats(&self, payload: &StatsPayload) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .patch(format!("{}/api/satellite", self.base_url))
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        check_status(status)
    }
}

fn check_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(DeliveryError::Unauthorized);
    }
    if !status.is_success() {
        return Err(DeliveryError::UnexpectedStatus(status.as_u16()));
    }

    Ok(())
}

/// Sink over several dashboard endpoints. Uses the fastest endpoint to
/// answer a ping and reselects after a transport failure.
#[derive(Debug)]
pub struct FailoverSink {
    clients: Vec<Arc<DashboardClient>>,
    selected: parking_lot::Mutex<Option<usize>>,
}

impl FailoverSink {
    pub fn new(clients: Vec<DashboardClient>) -> Result<Self> {
        if clients.is_empty() {
            bail!("at least one dashboard endpoint is required");
        }

        Ok(Self {
            clients: clients.into_iter().map(Arc::new).collect(),
            selected: parking_lot::Mutex::new(None),
        })
    }

    pub fn selected_endpoint(&self) -> Option<&str> {
        let idx = (*self.selected.lock())?;
        self.clients.get(idx).map(|c| c.base_url())
    }

    async fn select(&self) -> Result<Arc<DashboardClient>, DeliveryError> {
        if self.clients.len() == 1 {
            return Ok(Arc::clone(&self.clients[0]));
        }

        let current = *self.selected.lock();
        if let Some(idx) = current {
            return Ok(Arc::clone(&self.clients[idx]));
        }

        let mut race = JoinSet::new();
        for (idx, client) in self.clients.iter().enumerate() {
            let client = Arc::clone(client);
            race.spawn(async move {
                let start = Instant::now();
                client.ping().await.map(|()| (idx, start.elapsed()))
            });
        }

        while let Some(joined) = race.join_next().await {
            match joined {
                Ok(Ok((idx, latency))) => {
                    race.abort_all();
                    *self.selected.lock() = Some(idx);
                    info!(
                        endpoint = self.clients[idx].base_url(),
                        ?latency,
                        "selected dashboard endpoint",
                    );
                    return Ok(Arc::clone(&self.clients[idx]));
                }
                Ok(Err(e)) => debug!(error = %e, "dashboard ping failed"),
                Err(e) => warn!(error = %e, "dashboard ping task failed"),
            }
        }

        Err(DeliveryError::NoEndpoint)
    }
}

impl StatsSink for FailoverSink {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn update_stats(&self, payload: &StatsPayload) -> Result<(), DeliveryError> {
        let client = self.select().await?;
        let result = client.patch_stats(payload).await;

        if let Err(DeliveryError::Transport(_)) = &result {
            *self.selected.lock() = None;
        }

        result
    }
}
