pub mod poll;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::daemon::chia_config::ChiaConfig;
use crate::daemon::{DaemonApi, DaemonConnection, DaemonSession, EventHandler, MetricsCallback};
use crate::export::health::HealthMetrics;
use crate::ingest::{event_service, handle_event};
use crate::sink::{DashboardClient, DispatchHandle, Dispatcher, FailoverSink};
use crate::stats::{ServiceName, StatsContext, Transition};

/// Agent wires the daemon connection, the collector loops, the dispatcher
/// and the health server together.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    ctx: Arc<StatsContext>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let ctx = Arc::new(StatsContext::new(&cfg.stats_options()));

        Ok(Self {
            cfg,
            health,
            ctx,
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components. Daemon startup continues in the background.
    pub async fn start(&mut self) -> Result<()> {
        // 0. Health server first so probes respond while waiting for the daemon.
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        // 1. Resolve the daemon endpoint from the node configuration.
        let chia = ChiaConfig::load(&self.cfg.chia_config_directory)
            .context("loading node configuration")?;
        let endpoint = chia
            .daemon_endpoint(self.cfg.chia_daemon_address.as_deref())
            .context("resolving daemon endpoint")?;
        info!(address = %endpoint.address, "resolved daemon endpoint");

        // 2. Dashboard sink and dispatcher.
        let sink = self.create_sink()?;
        let interval = self.cfg.update_mode.interval();
        let health = Arc::clone(&self.health);
        let (dispatch, dispatcher_task) =
            Dispatcher::new(Arc::clone(&self.ctx), Arc::new(sink), interval)
                .with_metrics(Box::new(move |result, duration| {
                    health.record_flush(result, duration);
                }))
                .spawn(self.cancel.child_token());
        self.tasks.push(dispatcher_task);

        info!(
            update_mode = ?self.cfg.update_mode,
            ?interval,
            compatibility_mode = self.ctx.compatibility_mode(),
            "dispatcher configured",
        );

        // 3. Collector: connect, subscribe, startup rounds, then loops.
        //    Reconnects whenever the daemon goes away.
        let collector = Collector {
            ctx: Arc::clone(&self.ctx),
            health: Arc::clone(&self.health),
            dispatch,
            cancel: self.cancel.child_token(),
            liveness_interval: self.cfg.liveness_interval,
            refresh_interval: self.cfg.refresh_interval,
            backoff: self.cfg.startup_retry_backoff,
            settle_delay: self.cfg.daemon_settle_delay,
        };
        let address = endpoint.address.clone();
        let timeout = self.cfg.daemon.timeout;
        let health = Arc::clone(&self.health);
        let connect = move || {
            let endpoint = endpoint.clone();
            let metrics = daemon_metrics(Arc::clone(&health));
            async move {
                let connection = DaemonConnection::connect(&endpoint, timeout).await?;
                Ok(connection.with_metrics(metrics))
            }
        };
        self.tasks.push(tokio::spawn(collector.run(address, connect)));

        info!("agent started");

        Ok(())
    }

    /// Gracefully stop all components. A scheduled flush may be lost.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "agent task failed");
            }
        }

        self.health.stop();

        Ok(())
    }

    fn create_sink(&self) -> Result<FailoverSink> {
        let clients = self
            .cfg
            .dashboard
            .endpoints
            .iter()
            .map(|url| {
                DashboardClient::new(
                    url,
                    &self.cfg.api_key,
                    crate::version::RELEASE,
                    self.cfg.dashboard.timeout,
                )
                .with_context(|| format!("creating dashboard client for {url}"))
            })
            .collect::<Result<Vec<_>>>()?;

        FailoverSink::new(clients)
    }
}

/// Daemon-facing half of the agent.
struct Collector {
    ctx: Arc<StatsContext>,
    health: Arc<HealthMetrics>,
    dispatch: DispatchHandle,
    cancel: CancellationToken,
    liveness_interval: Duration,
    refresh_interval: Duration,
    backoff: Duration,
    settle_delay: Duration,
}

impl Collector {
    /// Serve daemon sessions until cancelled, reconnecting after each loss.
    async fn run<S, F, Fut>(self, address: String, mut connect: F)
    where
        S: DaemonSession,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        loop {
            let Some(daemon) = self.connect(&address, &mut connect).await else {
                break;
            };

            let subscription = daemon.on_event(self.event_handler());
            let lost = self.session(&daemon).await;
            drop(subscription);
            daemon.close();

            if !lost {
                break;
            }

            warn!(%address, "lost connection to daemon, reconnecting");
            self.mark_all_stopped();

            if !self.sleep(self.backoff).await {
                break;
            }
        }

        debug!("collector stopped");
    }

    /// Connect to the daemon, retrying until it is reachable.
    async fn connect<S, F, Fut>(&self, address: &str, connect: &mut F) -> Option<S>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let mut waited = false;

        let connection = loop {
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = connect() => result,
            };

            match attempt {
                Ok(connection) => break connection,
                Err(e) => {
                    if !waited {
                        info!(address, "waiting for daemon to be reachable");
                        waited = true;
                    }
                    debug!(error = %format!("{e:#}"), "daemon connect failed");
                }
            }

            if !self.sleep(self.backoff).await {
                return None;
            }
        };

        // Services come up after the daemon, give them a moment.
        if waited && !self.sleep(self.settle_delay).await {
            return None;
        }

        Some(connection)
    }

    /// Startup rounds and polling loops on one connection. Returns true when
    /// the connection was lost and false when cancelled.
    async fn session<S: DaemonSession>(&self, daemon: &S) -> bool {
        let serve = async {
            if self.startup(daemon).await {
                self.run_loops(daemon).await;
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = daemon.closed() => !self.cancel.is_cancelled(),
            _ = serve => false,
        }
    }

    /// Without a daemon nothing can be observed. Every service goes out as
    /// stopped and is picked up again by the next session's startup.
    fn mark_all_stopped(&self) {
        let transitions: Vec<_> = ServiceName::all()
            .iter()
            .filter_map(|&service| {
                let transition = self.ctx.set_running(service, false);
                (transition != Transition::Unchanged).then_some((service, transition))
            })
            .collect();
        self.record_transitions(&transitions);

        if self.ctx.has_pending() {
            self.dispatch.request_flush();
        }
    }

    /// Sleep unless cancelled. Returns false on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn event_handler(&self) -> EventHandler {
        let ctx = Arc::clone(&self.ctx);
        let health = Arc::clone(&self.health);
        let dispatch = self.dispatch.clone();

        Box::new(move |event| {
            health.events_received.with_label_values(&[event.kind()]).inc();

            let service = event_service(event);
            let changed = ctx.with(|s| {
                let changed = handle_event(s, event, Utc::now());
                health.set_service_running(service, s.registry.is_running(service));
                health.farming_infos_tracked.set(s.farming.len() as f64);
                health
                    .response_time_samples
                    .set(s.response_times.len() as f64);
                changed
            });

            if changed {
                dispatch.request_flush();
            }
        })
    }

    /// Initial liveness check and stats refresh, each retried until it
    /// succeeds. Returns false if cancelled.
    async fn startup<D: DaemonApi>(&self, daemon: &D) -> bool {
        let ctx = &*self.ctx;

        let Some(transitions) = poll::retry_until_ok("liveness check", self.backoff, &self.cancel, || {
            poll::check_liveness(daemon, ctx)
        })
        .await
        else {
            return false;
        };
        self.record_transitions(&transitions);

        if poll::retry_until_ok("stats refresh", self.backoff, &self.cancel, || {
            poll::refresh_stats(daemon, ctx)
        })
        .await
        .is_none()
        {
            return false;
        }

        // First full snapshot of every running service.
        self.dispatch.request_flush();
        info!("initial stats collected");

        true
    }

    async fn run_loops<D: DaemonApi>(&self, daemon: &D) {
        let mut liveness = interval_after(self.liveness_interval);
        let mut refresh = interval_after(self.refresh_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = liveness.tick() => self.liveness_round(daemon).await,
                _ = refresh.tick() => self.refresh_round(daemon).await,
            }
        }
    }

    async fn liveness_round<D: DaemonApi>(&self, daemon: &D) {
        let transitions = match poll::check_liveness(daemon, &self.ctx).await {
            Ok(transitions) => transitions,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "liveness check failed");
                return;
            }
        };

        if transitions.is_empty() {
            return;
        }
        self.record_transitions(&transitions);

        // Newly started services get their stats without waiting a full round.
        if transitions.iter().any(|(_, t)| *t == Transition::Started) {
            if let Err(e) = poll::refresh_stats(daemon, &self.ctx).await {
                debug!(error = %e, "refresh after service start incomplete");
            }
        }

        if self.ctx.has_pending() {
            self.dispatch.request_flush();
        }
    }

    async fn refresh_round<D: DaemonApi>(&self, daemon: &D) {
        match poll::refresh_stats(daemon, &self.ctx).await {
            Ok(true) => self.dispatch.request_flush(),
            Ok(false) => debug!("stats unchanged"),
            // Parts that failed were logged by the refresh itself.
            Err(_) => {
                if self.ctx.has_pending() {
                    self.dispatch.request_flush();
                }
            }
        }
    }

    fn record_transitions(&self, transitions: &[(ServiceName, Transition)]) {
        for (service, transition) in transitions {
            self.health
                .set_service_running(*service, *transition == Transition::Started);
        }
    }
}

fn daemon_metrics(health: Arc<HealthMetrics>) -> MetricsCallback {
    Box::new(move |command, status, duration| {
        health
            .daemon_requests_total
            .with_label_values(&[command, status])
            .inc();
        health
            .daemon_request_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    })
}

fn interval_after(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::*;
    use crate::daemon::types::{
        BlockchainState, Connection, Peak, PlotsResponse, QueueJob, SyncState, SyncStatus,
        WalletBalance, WalletsResponse,
    };
    use crate::daemon::{DaemonEvent, EventBus, EventSource, SubscriptionHandle};
    use crate::sink::{DeliveryError, StatsSink};
    use crate::stats::{StatsOptions, StatsPayload};

    const INTERVAL: Duration = Duration::from_secs(30);
    const BACKOFF: Duration = Duration::from_secs(1);

    fn blockchain_state(height: u32) -> BlockchainState {
        BlockchainState {
            difficulty: 3000,
            space: 1 << 60,
            peak: Some(Peak { height }),
            sync: SyncState {
                synced: true,
                sync_mode: false,
                sync_progress_height: 0,
                sync_tip_height: 0,
            },
        }
    }

    /// One connection with only the full node running.
    struct ScriptedSession {
        bus: Arc<EventBus>,
        lost: CancellationToken,
    }

    impl DaemonApi for ScriptedSession {
        async fn is_service_running(&self, service: ServiceName) -> Result<bool> {
            Ok(service == ServiceName::FullNode)
        }

        async fn get_blockchain_state(&self) -> Result<BlockchainState> {
            Ok(blockchain_state(100))
        }

        async fn get_connections(&self, _service: ServiceName) -> Result<Vec<Connection>> {
            Ok(Vec::new())
        }

        async fn get_wallets(&self) -> Result<WalletsResponse> {
            bail!("wallet is not running")
        }

        async fn get_wallet_balance(&self, _wallet_id: u32) -> Result<WalletBalance> {
            bail!("wallet is not running")
        }

        async fn get_sync_status(&self) -> Result<SyncStatus> {
            bail!("wallet is not running")
        }

        async fn get_height_info(&self) -> Result<u32> {
            bail!("wallet is not running")
        }

        async fn get_public_keys(&self) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        async fn get_plots(&self) -> Result<PlotsResponse> {
            bail!("harvester is not running")
        }

        async fn register_plotter_queue(&self) -> Result<Vec<QueueJob>> {
            bail!("plotter is not running")
        }
    }

    impl EventSource for ScriptedSession {
        fn on_event(&self, handler: EventHandler) -> SubscriptionHandle {
            self.bus.on_event(handler)
        }
    }

    impl DaemonSession for ScriptedSession {
        async fn closed(&self) {
            self.lost.cancelled().await;
        }

        fn close(&self) {
            self.lost.cancel();
        }
    }

    /// Event buses and drop switches of every connection handed out.
    #[derive(Default)]
    struct Sessions {
        opened: Mutex<Vec<(Arc<EventBus>, CancellationToken)>>,
    }

    impl Sessions {
        fn count(&self) -> usize {
            self.opened.lock().len()
        }

        fn get(&self, index: usize) -> (Arc<EventBus>, CancellationToken) {
            self.opened.lock()[index].clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<Value>>,
    }

    impl StatsSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn update_stats(&self, payload: &StatsPayload) -> Result<(), DeliveryError> {
            self.payloads
                .lock()
                .push(serde_json::to_value(payload).unwrap_or(Value::Null));
            Ok(())
        }
    }

    fn synced_height(ctx: &StatsContext) -> Option<Value> {
        ctx.with(|s| {
            s.store
                .current(ServiceName::FullNode)
                .map(|record| record["blockchainState"]["syncedHeight"].clone())
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_collector_reconnects_after_daemon_drops_connection() {
        let ctx = Arc::new(StatsContext::new(&StatsOptions::default()));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (dispatch, _dispatcher) =
            Dispatcher::new(Arc::clone(&ctx), Arc::clone(&sink), INTERVAL).spawn(cancel.clone());

        let collector = Collector {
            ctx: Arc::clone(&ctx),
            health: Arc::new(HealthMetrics::new(":9091").unwrap()),
            dispatch,
            cancel: cancel.child_token(),
            liveness_interval: Duration::from_secs(3600),
            refresh_interval: Duration::from_secs(3600),
            backoff: BACKOFF,
            settle_delay: Duration::from_secs(5),
        };

        let sessions = Arc::new(Sessions::default());
        let opened = Arc::clone(&sessions);
        let connect = move || {
            let bus = Arc::new(EventBus::new());
            let lost = CancellationToken::new();
            opened.opened.lock().push((Arc::clone(&bus), lost.clone()));
            async move { Ok::<_, anyhow::Error>(ScriptedSession { bus, lost }) }
        };
        let task = tokio::spawn(collector.run("127.0.0.1:55400".to_string(), connect));

        settle().await;
        assert_eq!(sessions.count(), 1);
        assert!(ctx.is_running(ServiceName::FullNode));
        assert_eq!(sink.payloads.lock().len(), 1);

        // The daemon goes away; everything it reported is stale.
        let (old_bus, lost) = sessions.get(0);
        lost.cancel();
        settle().await;
        assert!(!ctx.is_running(ServiceName::FullNode));
        assert_eq!(synced_height(&ctx), None);

        // Reconnected after the backoff with a fresh subscription.
        tokio::time::sleep(BACKOFF).await;
        assert_eq!(sessions.count(), 2);
        assert!(ctx.is_running(ServiceName::FullNode));

        let (new_bus, _) = sessions.get(1);
        new_bus.publish(&DaemonEvent::BlockchainState(blockchain_state(101)));
        old_bus.publish(&DaemonEvent::BlockchainState(blockchain_state(999)));
        assert_eq!(synced_height(&ctx), Some(json!(101)));

        tokio::time::sleep(INTERVAL).await;
        let payloads = sink.payloads.lock().clone();
        assert_eq!(payloads.len(), 2);
        assert_eq!(
            payloads[1]["fullNode"]["blockchainState"]["syncedHeight"],
            json!(101)
        );

        cancel.cancel();
        task.await.unwrap();
    }
}
