use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chia_config::DaemonEndpoint;
use super::types::{
    BlockchainState, BlockchainStateResponse, Connection, ConnectionsResponse, HeightInfo,
    IsRunningResponse, NewFarmingInfo, NewSignagePoint, PlotQueue, PlotsResponse, PublicKeys,
    QueueJob, SyncStatus, WalletBalance, WalletBalanceResponse, WalletsResponse,
};
use super::{DaemonApi, DaemonError, DaemonEvent, DaemonSession, EventBus, EventHandler};
use super::{EventSource, MetricsCallback, SubscriptionHandle};
use crate::stats::ServiceName;

/// Service name the connection registers under to receive pushed events.
const UI_SERVICE: &str = "wallet_ui";
const ORIGIN: &str = "chia-dashboard-satellite";
const DAEMON: &str = "daemon";

/// Daemon websocket message envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct WsMessage {
    pub command: String,
    #[serde(default)]
    pub ack: bool,
    pub data: Box<RawValue>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
}

#[derive(Deserialize)]
struct RpcStatus {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

type PendingMap = parking_lot::Mutex<HashMap<String, oneshot::Sender<WsMessage>>>;

/// WebSocket connection to the node daemon.
pub struct DaemonConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Arc<PendingMap>,
    events: Arc<EventBus>,
    timeout: Duration,
    metrics: Option<MetricsCallback>,
    /// Cancelled on close and when the reader loses the socket.
    cancel: CancellationToken,
}

impl std::fmt::Debug for DaemonConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConnection")
            .field("connected", &self.is_connected())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DaemonConnection {
    /// Open the TLS websocket, start the reader/writer tasks and register
    /// for pushed events.
    pub async fn connect(endpoint: &DaemonEndpoint, timeout: Duration) -> Result<Self> {
        let identity = native_tls::Identity::from_pkcs8(&endpoint.cert_pem, &endpoint.key_pem)
            .context("loading daemon client identity")?;

        // The daemon serves a certificate signed by the node's private CA.
        let tls = native_tls::TlsConnector::builder()
            .identity(identity)
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .context("building TLS connector")?;

        let url = format!("wss://{}/", endpoint.address);
        let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            None,
            false,
            Some(Connector::NativeTls(tls)),
        )
        .await
        .with_context(|| format!("connecting to daemon at {url}"))?;

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<PendingMap> = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outgoing_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = sink.send(msg).await {
                            warn!(error = %e, "daemon write failed");
                            break;
                        }
                    }
                }
            }
        });

        let reader_cancel = cancel.clone();
        let reader_pending = Arc::clone(&pending);
        let reader_events = Arc::clone(&events);
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = source.next() => frame,
                };

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_incoming(&text, &reader_pending, &reader_events);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("daemon connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "daemon read failed");
                        break;
                    }
                }
            }

            // Stops the writer and wakes everyone waiting on `closed`.
            reader_cancel.cancel();
            // Dropping the senders fails every in-flight request with Closed.
            reader_pending.lock().clear();
        });

        let conn = Self {
            outgoing,
            pending,
            events,
            timeout,
            metrics: None,
            cancel,
        };

        conn.request::<serde_json::Value>(
            DAEMON,
            "register_service",
            serde_json::json!({ "service": UI_SERVICE }),
        )
        .await
        .context("registering with daemon")?;

        info!(address = %endpoint.address, "connected to daemon");

        Ok(conn)
    }

    /// Set a metrics callback for recording request stats.
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn record_request(&self, command: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(command, status, duration);
        }
    }

    /// Send a command and wait for the correlated response.
    async fn request<T: DeserializeOwned>(
        &self,
        destination: &str,
        command: &str,
        data: serde_json::Value,
    ) -> Result<T> {
        let start = Instant::now();
        let result = self.round_trip(destination, command, data).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => match e.downcast_ref::<DaemonError>() {
                Some(DaemonError::Timeout) => "timeout",
                Some(DaemonError::Closed) => "closed",
                _ => "error",
            },
        };
        self.record_request(command, status, start.elapsed());

        let response = result?;
        serde_json::from_str(response.data.get())
            .with_context(|| format!("decoding {command} response from {destination}"))
    }

    async fn round_trip(
        &self,
        destination: &str,
        command: &str,
        data: serde_json::Value,
    ) -> Result<WsMessage> {
        if !self.is_connected() {
            return Err(DaemonError::Closed.into());
        }

        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let message = WsMessage {
            command: command.to_string(),
            ack: false,
            data: serde_json::value::to_raw_value(&data).context("encoding request data")?,
            request_id: request_id.clone(),
            origin: ORIGIN.to_string(),
            destination: destination.to_string(),
        };
        let text = serde_json::to_string(&message).context("encoding request")?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if self.outgoing.send(Message::Text(text)).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(DaemonError::Closed.into());
        }

        debug!(command, destination, "daemon request sent");

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(DaemonError::Closed.into()),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                return Err(DaemonError::Timeout.into());
            }
        };

        let status: RpcStatus =
            serde_json::from_str(response.data.get()).unwrap_or(RpcStatus {
                success: None,
                error: None,
            });
        if status.success == Some(false) {
            let reason = status.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(DaemonError::Rpc(format!("{command}: {reason}")).into());
        }

        Ok(response)
    }
}

impl Drop for DaemonConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hand a response to its waiting request, or publish it as an event.
fn dispatch_incoming(text: &str, pending: &PendingMap, events: &EventBus) {
    let message: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "discarding malformed daemon message");
            return;
        }
    };

    if let Some(waiter) = pending.lock().remove(&message.request_id) {
        let _ = waiter.send(message);
        return;
    }

    match route_event(&message) {
        Ok(Some(event)) => {
            debug!(kind = event.kind(), origin = %message.origin, "daemon event");
            events.publish(&event);
        }
        Ok(None) => {}
        Err(e) => warn!(
            command = %message.command,
            origin = %message.origin,
            error = %e,
            "failed to decode daemon event",
        ),
    }
}

/// Map a pushed message to a typed event. Unknown messages yield `None`.
pub fn route_event(message: &WsMessage) -> Result<Option<DaemonEvent>> {
    let data = message.data.get();

    let event = match (message.origin.as_str(), message.command.as_str()) {
        ("chia_full_node", "get_blockchain_state") => {
            let parsed: BlockchainStateResponse = serde_json::from_str(data)?;
            DaemonEvent::BlockchainState(parsed.blockchain_state)
        }
        (origin, "get_connections") => {
            let Some(service) = ServiceName::from_daemon_name(origin) else {
                return Ok(None);
            };
            let parsed: ConnectionsResponse = serde_json::from_str(data)?;
            DaemonEvent::Connections {
                service,
                connections: parsed.connections,
            }
        }
        ("chia_farmer", "new_signage_point") => {
            let parsed: NewSignagePoint = serde_json::from_str(data)?;
            DaemonEvent::SignagePoint(parsed.signage_point)
        }
        ("chia_farmer", "new_farming_info") => {
            let parsed: NewFarmingInfo = serde_json::from_str(data)?;
            DaemonEvent::FarmingInfo(parsed.farming_info)
        }
        ("chia_plotter", "state_changed") => {
            let parsed: PlotQueue = serde_json::from_str(data)?;
            DaemonEvent::PlottingQueue(parsed.queue)
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

impl EventSource for DaemonConnection {
    fn on_event(&self, handler: EventHandler) -> SubscriptionHandle {
        self.events.on_event(handler)
    }
}

impl DaemonSession for DaemonConnection {
    async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

fn empty() -> serde_json::Value {
    serde_json::json!({})
}

impl DaemonApi for DaemonConnection {
    async fn is_service_running(&self, service: ServiceName) -> Result<bool> {
        let resp: IsRunningResponse = self
            .request(
                DAEMON,
                "is_running",
                serde_json::json!({ "service": service.daemon_name() }),
            )
            .await
            .with_context(|| format!("checking if {service} is running"))?;

        Ok(resp.is_running)
    }

    async fn get_blockchain_state(&self) -> Result<BlockchainState> {
        let resp: BlockchainStateResponse = self
            .request(
                ServiceName::FullNode.daemon_name(),
                "get_blockchain_state",
                empty(),
            )
            .await
            .context("fetching blockchain state")?;

        Ok(resp.blockchain_state)
    }

    async fn get_connections(&self, service: ServiceName) -> Result<Vec<Connection>> {
        let resp: ConnectionsResponse = self
            .request(service.daemon_name(), "get_connections", empty())
            .await
            .with_context(|| format!("fetching {service} connections"))?;

        Ok(resp.connections)
    }

    async fn get_wallets(&self) -> Result<WalletsResponse> {
        self.request(ServiceName::Wallet.daemon_name(), "get_wallets", empty())
            .await
            .context("fetching wallets")
    }

    async fn get_wallet_balance(&self, wallet_id: u32) -> Result<WalletBalance> {
        let resp: WalletBalanceResponse = self
            .request(
                ServiceName::Wallet.daemon_name(),
                "get_wallet_balance",
                serde_json::json!({ "wallet_id": wallet_id }),
            )
            .await
            .with_context(|| format!("fetching balance of wallet {wallet_id}"))?;

        Ok(resp.wallet_balance)
    }

    async fn get_sync_status(&self) -> Result<SyncStatus> {
        self.request(ServiceName::Wallet.daemon_name(), "get_sync_status", empty())
            .await
            .context("fetching wallet sync status")
    }

    async fn get_height_info(&self) -> Result<u32> {
        let resp: HeightInfo = self
            .request(ServiceName::Wallet.daemon_name(), "get_height_info", empty())
            .await
            .context("fetching wallet height")?;

        Ok(resp.height)
    }

    async fn get_public_keys(&self) -> Result<Vec<u32>> {
        let resp: PublicKeys = self
            .request(ServiceName::Wallet.daemon_name(), "get_public_keys", empty())
            .await
            .context("fetching public keys")?;

        Ok(resp.public_key_fingerprints)
    }

    async fn get_plots(&self) -> Result<PlotsResponse> {
        self.request(ServiceName::Harvester.daemon_name(), "get_plots", empty())
            .await
            .context("fetching plots")
    }

    async fn register_plotter_queue(&self) -> Result<Vec<QueueJob>> {
        let resp: PlotQueue = self
            .request(
                DAEMON,
                "register_service",
                serde_json::json!({ "service": ServiceName::Plotter.daemon_name() }),
            )
            .await
            .context("registering for plotter queue")?;

        Ok(resp.queue)
    }
}
