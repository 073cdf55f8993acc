use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::stats::ServiceName;

const NAMESPACE: &str = "satellite";

/// Prometheus metrics describing the relay itself.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Pushed daemon events by kind.
    pub events_received: CounterVec,
    /// Stats flushes attempted with a non-empty payload.
    pub flushes_total: Counter,
    /// Failed flushes by reason.
    pub flush_errors: CounterVec,
    /// Flush round trip duration.
    pub flush_duration: HistogramVec,
    /// Whether each service is running (1=yes, 0=no).
    pub services_running: GaugeVec,
    /// Daemon requests by command and status.
    pub daemon_requests_total: CounterVec,
    /// Daemon request duration by command.
    pub daemon_request_duration: HistogramVec,
    /// Entries in the farming info list.
    pub farming_infos_tracked: Gauge,
    /// Harvester response time samples held.
    pub response_time_samples: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_received = CounterVec::new(
            Opts::new("events_received_total", "Total daemon events received by kind.")
                .namespace(NAMESPACE),
            &["event"],
        )?;
        let flushes_total = Counter::with_opts(
            Opts::new("flushes_total", "Total stats flushes sent to the dashboard.")
                .namespace(NAMESPACE),
        )?;
        let flush_errors = CounterVec::new(
            Opts::new("flush_errors_total", "Total failed stats flushes by reason.")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        let flush_duration = HistogramVec::new(
            HistogramOpts::new(
                "flush_duration_seconds",
                "Stats flush duration by result.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0]),
            &["result"],
        )?;
        let services_running = GaugeVec::new(
            Opts::new(
                "services_running",
                "Whether a node service is running (1=yes, 0=no).",
            )
            .namespace(NAMESPACE),
            &["service"],
        )?;
        let daemon_requests_total = CounterVec::new(
            Opts::new(
                "daemon_requests_total",
                "Total daemon requests by command and status.",
            )
            .namespace(NAMESPACE),
            &["command", "status"],
        )?;
        let daemon_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "daemon_request_duration_seconds",
                "Daemon request duration by command.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0]),
            &["command"],
        )?;
        let farming_infos_tracked = Gauge::with_opts(
            Opts::new("farming_infos_tracked", "Entries in the farming info list.")
                .namespace(NAMESPACE),
        )?;
        let response_time_samples = Gauge::with_opts(
            Opts::new(
                "response_time_samples",
                "Harvester response time samples currently held.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(flushes_total.clone()))?;
        registry.register(Box::new(flush_errors.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;
        registry.register(Box::new(services_running.clone()))?;
        registry.register(Box::new(daemon_requests_total.clone()))?;
        registry.register(Box::new(daemon_request_duration.clone()))?;
        registry.register(Box::new(farming_infos_tracked.clone()))?;
        registry.register(Box::new(response_time_samples.clone()))?;

        for service in ServiceName::all() {
            services_running
                .with_label_values(&[service.as_str()])
                .set(0.0);
        }

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            events_received,
            flushes_total,
            flush_errors,
            flush_duration,
            services_running,
            daemon_requests_total,
            daemon_request_duration,
            farming_infos_tracked,
            response_time_samples,
        })
    }

    /// Record one flush outcome as reported by the dispatcher.
    pub fn record_flush(&self, result: &str, duration: std::time::Duration) {
        self.flushes_total.inc();
        if result != "success" {
            self.flush_errors.with_label_values(&[result]).inc();
        }
        self.flush_duration
            .with_label_values(&[result])
            .observe(duration.as_secs_f64());
    }

    pub fn set_service_running(&self, service: ServiceName, running: bool) {
        self.services_running
            .with_label_values(&[service.as_str()])
            .set(if running { 1.0 } else { 0.0 });
    }

    /// Starts the HTTP server serving /metrics and /healthz. Returns the
    /// bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9091"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }

    /// Prometheus text rendering of the registry.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
