use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::throttle::{Action, Throttle};
use super::{DeliveryError, StatsSink};
use crate::stats::StatsContext;

/// Callback for recording flush outcomes. Receives (result, duration).
pub type FlushMetricsFn = Box<dyn Fn(&str, Duration) + Send + Sync>;

/// Cloneable handle used by handlers and loops to ask for a flush.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    notify: Arc<Notify>,
}

impl DispatchHandle {
    /// Request a flush. Requests arriving while one is pending coalesce.
    pub fn request_flush(&self) {
        self.notify.notify_one();
    }
}

/// Throttled delivery of pending stats changes to a sink.
pub struct Dispatcher<S> {
    ctx: Arc<StatsContext>,
    sink: Arc<S>,
    throttle: Throttle,
    notify: Arc<Notify>,
    metrics: Option<FlushMetricsFn>,
}

impl<S: StatsSink + 'static> Dispatcher<S> {
    pub fn new(ctx: Arc<StatsContext>, sink: Arc<S>, interval: Duration) -> Self {
        Self {
            ctx,
            sink,
            throttle: Throttle::new(interval),
            notify: Arc::new(Notify::new()),
            metrics: None,
        }
    }

    /// Set a metrics callback for recording flush stats.
    pub fn with_metrics(mut self, cb: FlushMetricsFn) -> Self {
        self.metrics = Some(cb);
        self
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            notify: Arc::clone(&self.notify),
        }
    }

    /// Spawn the dispatch loop. A flush scheduled at cancellation is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (DispatchHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(cancel));

        (handle, task)
    }

    async fn run(mut self, cancel: CancellationToken) {
        info!(
            sink = self.sink.name(),
            interval = ?self.throttle.interval(),
            "dispatcher started",
        );

        loop {
            let deadline = self.throttle.deadline();
            let notify = Arc::clone(&self.notify);

            let action = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("dispatcher stopped");
                    break;
                }
                _ = notify.notified() => self.throttle.on_request(Instant::now()),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.throttle.on_deadline(Instant::now())
                }
            };

            if action == Action::FlushNow {
                self.flush().await;
            }
        }
    }

    /// Capture the pending changes and deliver them.
    ///
    /// The capture clears the accumulator first, so a failed delivery
    /// drops that round's changes.
    async fn flush(&self) {
        let payload = self.ctx.take_payload();
        if payload.is_empty() {
            debug!("nothing to flush");
            return;
        }

        let start = std::time::Instant::now();
        let services = payload.len();
        let result = self.sink.update_stats(&payload).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => debug!(services, ?elapsed, "stats flushed"),
            Err(DeliveryError::Unauthorized) => {
                error!(sink = self.sink.name(), "failed to update stats, api key is invalid");
            }
            Err(e) => error!(sink = self.sink.name(), error = %e, "failed to update stats"),
        }

        if let Some(ref cb) = self.metrics {
            let outcome = match &result {
                Ok(()) => "success",
                Err(e) => e.reason(),
            };
            cb(outcome, elapsed);
        }
    }
}
