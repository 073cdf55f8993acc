use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use satellite::agent::poll::{check_liveness, refresh_stats};
use satellite::daemon::types::{
    BlockchainState, Connection, FarmingInfoEvent, Peak, PlotsResponse, QueueJob, SignagePoint,
    SyncState, SyncStatus, WalletBalance, WalletsResponse, NODE_TYPE_FULL_NODE,
    NODE_TYPE_HARVESTER,
};
use satellite::daemon::{DaemonApi, DaemonEvent, EventBus, EventSource, SubscriptionHandle};
use satellite::ingest::handle_event;
use satellite::sink::{DeliveryError, DispatchHandle, Dispatcher, StatsSink};
use satellite::stats::{ServiceName, StatsContext, StatsOptions, StatsPayload};

const INTERVAL: Duration = Duration::from_secs(30);

/// Daemon double answering from a mutable script.
struct ScriptedDaemon {
    running: Mutex<HashSet<ServiceName>>,
    height: Mutex<u32>,
    bus: EventBus,
}

impl ScriptedDaemon {
    fn new(running: &[ServiceName]) -> Self {
        Self {
            running: Mutex::new(running.iter().copied().collect()),
            height: Mutex::new(4_500_000),
            bus: EventBus::new(),
        }
    }

    fn stop(&self, service: ServiceName) {
        self.running.lock().remove(&service);
    }
}

impl DaemonApi for ScriptedDaemon {
    async fn is_service_running(&self, service: ServiceName) -> Result<bool> {
        Ok(self.running.lock().contains(&service))
    }

    async fn get_blockchain_state(&self) -> Result<BlockchainState> {
        Ok(BlockchainState {
            difficulty: 3328,
            space: 33_019_708_854_272_000_000,
            peak: Some(Peak {
                height: *self.height.lock(),
            }),
            sync: SyncState {
                synced: true,
                sync_mode: false,
                sync_progress_height: 0,
                sync_tip_height: 0,
            },
        })
    }

    async fn get_connections(&self, service: ServiceName) -> Result<Vec<Connection>> {
        let node_type = match service {
            ServiceName::Farmer => NODE_TYPE_HARVESTER,
            _ => NODE_TYPE_FULL_NODE,
        };
        Ok(vec![Connection { node_type }, Connection { node_type }])
    }

    async fn get_wallets(&self) -> Result<WalletsResponse> {
        bail!("wallet is not scripted")
    }

    async fn get_wallet_balance(&self, _wallet_id: u32) -> Result<WalletBalance> {
        bail!("wallet is not scripted")
    }

    async fn get_sync_status(&self) -> Result<SyncStatus> {
        bail!("wallet is not scripted")
    }

    async fn get_height_info(&self) -> Result<u32> {
        bail!("wallet is not scripted")
    }

    async fn get_public_keys(&self) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }

    async fn get_plots(&self) -> Result<PlotsResponse> {
        Ok(PlotsResponse {
            plots: Vec::new(),
            failed_to_open_filenames: Vec::new(),
            not_found_filenames: Vec::new(),
        })
    }

    async fn register_plotter_queue(&self) -> Result<Vec<QueueJob>> {
        bail!("plotter is not scripted")
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

struct Relay {
    ctx: Arc<StatsContext>,
    daemon: ScriptedDaemon,
    sink: Arc<RecordingSink>,
    dispatch: DispatchHandle,
    cancel: CancellationToken,
    _subscription: SubscriptionHandle,
}

impl Relay {
    fn start(opts: StatsOptions, running: &[ServiceName]) -> Self {
        let ctx = Arc::new(StatsContext::new(&opts));
        let daemon = ScriptedDaemon::new(running);
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (dispatch, _task) = Dispatcher::new(Arc::clone(&ctx), Arc::clone(&sink), INTERVAL)
            .spawn(cancel.clone());

        let handler_ctx = Arc::clone(&ctx);
        let handler_dispatch = dispatch.clone();
        let subscription = daemon.bus.on_event(Box::new(move |event| {
            if handler_ctx.with(|s| handle_event(s, event, Utc::now())) {
                handler_dispatch.request_flush();
            }
        }));

        Self {
            ctx,
            daemon,
            sink,
            dispatch,
            cancel,
            _subscription: subscription,
        }
    }

    async fn liveness(&self) {
        let transitions = check_liveness(&self.daemon, &self.ctx).await.unwrap();
        if !transitions.is_empty() && self.ctx.has_pending() {
            self.dispatch.request_flush();
        }
    }

    async fn refresh(&self) {
        if refresh_stats(&self.daemon, &self.ctx).await.unwrap() {
            self.dispatch.request_flush();
        }
    }

    fn payloads(&self) -> Vec<Value> {
        self.sink.payloads.lock().clone()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn signage_point() -> DaemonEvent {
    DaemonEvent::SignagePoint(SignagePoint {
        challenge_hash: "0xc1".to_string(),
        challenge_chain_sp: "0xs1".to_string(),
    })
}

fn farming_info(proofs: u64, passed_filter: u64) -> DaemonEvent {
    DaemonEvent::FarmingInfo(FarmingInfoEvent {
        challenge_hash: "0xc1".to_string(),
        signage_point: "0xs1".to_string(),
        passed_filter,
        proofs,
        total_plots: 120,
    })
}

#[tokio::test(start_paused = true)]
async fn test_relay_sends_snapshot_then_diffs() {
    let relay = Relay::start(
        StatsOptions::default(),
        &[ServiceName::FullNode, ServiceName::Farmer],
    );

    relay.liveness().await;
    relay.refresh().await;
    settle().await;

    let payloads = relay.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(
        payloads[0]["fullNode"]["blockchainState"]["syncedHeight"],
        json!(4_500_000)
    );
    assert_eq!(payloads[0]["fullNode"]["fullNodeConnectionsCount"], json!(2));
    assert_eq!(payloads[0]["farmer"]["harvesterConnectionsCount"], json!(2));

    // Farming activity inside the window goes out as one trailing flush.
    relay.daemon.bus.publish(&signage_point());
    relay.daemon.bus.publish(&farming_info(1, 3));
    relay.daemon.bus.publish(&farming_info(2, 4));
    *relay.daemon.height.lock() += 1;
    relay.refresh().await;
    settle().await;
    assert_eq!(relay.payloads().len(), 1);

    tokio::time::sleep(INTERVAL).await;
    let payloads = relay.payloads();
    assert_eq!(payloads.len(), 2);

    let update = &payloads[1];
    assert_eq!(
        update["fullNode"],
        json!({"blockchainState": {"syncedHeight": 4_500_001, "tipHeight": 4_500_001}})
    );
    let infos = update["farmer"]["farmingInfos"].as_array().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0]["proofs"], json!(3));
    assert_eq!(infos[0]["passedFilter"], json!(7));
    assert!(update["farmer"]["averageHarvesterResponseTime"].is_string());
    assert!(update["farmer"].get("harvesterConnectionsCount").is_none());

    relay.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_service_is_sent_as_null() {
    let relay = Relay::start(
        StatsOptions::default(),
        &[ServiceName::FullNode, ServiceName::Farmer],
    );
    relay.liveness().await;
    relay.refresh().await;
    settle().await;

    relay.daemon.stop(ServiceName::Farmer);
    relay.liveness().await;

    // Events for the stopped farmer are dropped.
    relay.daemon.bus.publish(&signage_point());

    tokio::time::sleep(INTERVAL).await;
    let payloads = relay.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[1], json!({"farmer": null}));
    assert!(relay.ctx.with(|s| s.farming.is_empty()));

    relay.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_compatibility_mode_sends_full_records() {
    let relay = Relay::start(
        StatsOptions {
            compatibility_mode: true,
            ..Default::default()
        },
        &[ServiceName::FullNode],
    );
    relay.liveness().await;
    relay.refresh().await;
    settle().await;

    *relay.daemon.height.lock() += 1;
    relay.refresh().await;
    tokio::time::sleep(INTERVAL).await;

    let payloads = relay.payloads();
    assert_eq!(payloads.len(), 2);
    let record = &payloads[1]["fullNode"];
    assert_eq!(record["fullNodeConnectionsCount"], json!(2));
    assert_eq!(record["blockchainState"]["difficulty"], json!(3328));
    assert_eq!(record["blockchainState"]["syncedHeight"], json!(4_500_001));

    relay.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_wallet_without_keys_is_never_polled() {
    let relay = Relay::start(StatsOptions::default(), &[ServiceName::Wallet]);

    // The wallet runs without keys, so it stays stopped and is never polled.
    relay.liveness().await;
    assert!(!relay.ctx.is_running(ServiceName::Wallet));
    assert!(!refresh_stats(&relay.daemon, &relay.ctx).await.unwrap());

    settle().await;
    assert!(relay.payloads().is_empty());

    relay.cancel.cancel();
}
