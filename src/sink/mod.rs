pub mod dispatcher;
pub mod http;
pub mod throttle;

use crate::stats::StatsPayload;

pub use dispatcher::{DispatchHandle, Dispatcher};
pub use http::{DashboardClient, FailoverSink};
pub use throttle::Throttle;

/// Delivery failures, split so auth problems can be reported distinctly.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("dashboard rejected the api key")]
    Unauthorized,
    #[error("unexpected dashboard response status {0}")]
    UnexpectedStatus(u16),
    #[error("dashboard request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no reachable dashboard endpoint")]
    NoEndpoint,
}

impl DeliveryError {
    /// Short label used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryError::Unauthorized => "unauthorized",
            DeliveryError::UnexpectedStatus(_) => "status",
            DeliveryError::Transport(_) => "transport",
            DeliveryError::NoEndpoint => "no_endpoint",
        }
    }
}

/// Destination of stats flushes.
pub trait StatsSink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Deliver one payload of partial (or full) service updates.
    fn update_stats(
        &self,
        payload: &StatsPayload,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send;
}
