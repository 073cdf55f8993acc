pub mod chia_config;
pub mod types;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;

use crate::stats::ServiceName;
use types::{
    BlockchainState, Connection, FarmingInfoEvent, PlotsResponse, QueueJob, SignagePoint,
    SyncStatus, WalletBalance, WalletsResponse,
};

pub use ws::DaemonConnection;

/// Transport-level failures of a daemon call.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon request timed out")]
    Timeout,
    #[error("daemon connection closed")]
    Closed,
    #[error("daemon rpc error: {0}")]
    Rpc(String),
}

/// Callback type for recording daemon request metrics.
/// Receives (command, status, duration).
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// Push notification from a sub-service.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    BlockchainState(BlockchainState),
    Connections {
        service: ServiceName,
        connections: Vec<Connection>,
    },
    SignagePoint(SignagePoint),
    FarmingInfo(FarmingInfoEvent),
    PlottingQueue(Vec<QueueJob>),
}

impl DaemonEvent {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DaemonEvent::BlockchainState(_) => "blockchain_state",
            DaemonEvent::Connections { .. } => "connections",
            DaemonEvent::SignagePoint(_) => "signage_point",
            DaemonEvent::FarmingInfo(_) => "farming_info",
            DaemonEvent::PlottingQueue(_) => "plotting_queue",
        }
    }
}

/// Request/response calls the collector makes against the daemon.
pub trait DaemonApi: Send + Sync {
    /// Ask the daemon whether the service process is running.
    fn is_service_running(
        &self,
        service: ServiceName,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn get_blockchain_state(
        &self,
    ) -> impl std::future::Future<Output = Result<BlockchainState>> + Send;

    /// Peer connections of the given service.
    fn get_connections(
        &self,
        service: ServiceName,
    ) -> impl std::future::Future<Output = Result<Vec<Connection>>> + Send;

    fn get_wallets(&self) -> impl std::future::Future<Output = Result<WalletsResponse>> + Send;

    fn get_wallet_balance(
        &self,
        wallet_id: u32,
    ) -> impl std::future::Future<Output = Result<WalletBalance>> + Send;

    fn get_sync_status(&self) -> impl std::future::Future<Output = Result<SyncStatus>> + Send;

    /// Height the wallet has synced to.
    fn get_height_info(&self) -> impl std::future::Future<Output = Result<u32>> + Send;

    /// Fingerprints of the keys loaded in the keyring.
    fn get_public_keys(&self) -> impl std::future::Future<Output = Result<Vec<u32>>> + Send;

    fn get_plots(&self) -> impl std::future::Future<Output = Result<PlotsResponse>> + Send;

    /// Subscribe to plotter queue updates; returns the current queue.
    fn register_plotter_queue(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<QueueJob>>> + Send;
}

/// Callback invoked for each pushed daemon event.
pub type EventHandler = Box<dyn Fn(&DaemonEvent) + Send + Sync>;

/// Source of pushed daemon events.
pub trait EventSource {
    /// Register a handler. Dropping the returned handle unsubscribes it.
    fn on_event(&self, handler: EventHandler) -> SubscriptionHandle;
}

/// One live connection to the daemon.
///
/// Pushed events and registrations are tied to the connection; after it is
/// lost a new session has to subscribe again.
pub trait DaemonSession: DaemonApi + EventSource {
    /// Resolves once the connection was closed or lost.
    fn closed(&self) -> impl std::future::Future<Output = ()> + Send;

    /// Close the connection and stop its background tasks.
    fn close(&self);
}

type HandlerList = parking_lot::Mutex<Vec<(u64, EventHandler)>>;

/// Fan-out of daemon events to registered handlers, in arrival order.
#[derive(Default)]
pub struct EventBus {
    handlers: Arc<HandlerList>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every handler. Handlers must not subscribe or
    /// unsubscribe from within the callback.
    pub fn publish(&self, event: &DaemonEvent) {
        let handlers = self.handlers.lock();
        for (_, handler) in handlers.iter() {
            handler(event);
        }
    }
}

impl EventSource for EventBus {
    fn on_event(&self, handler: EventHandler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));

        SubscriptionHandle {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }
}

/// Keeps an event handler registered until dropped.
#[must_use = "dropping the handle unsubscribes the handler"]
pub struct SubscriptionHandle {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
