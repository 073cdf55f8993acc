//! Event handlers turning daemon payloads into stats document fields.
//!
//! Every handler runs synchronously on the locked [`StatsState`] and
//! returns whether the document changed.

pub mod farmer;
pub mod full_node;
pub mod harvester;
pub mod plotter;
pub mod wallet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::daemon::DaemonEvent;
use crate::stats::{ServiceName, StatsState};

/// Apply one pushed daemon event.
///
/// Events for services that are disabled or not running are dropped,
/// except plotter queue updates which mark the plotter as running.
pub fn handle_event(state: &mut StatsState, event: &DaemonEvent, now: DateTime<Utc>) -> bool {
    let service = event_service(event);

    if service == ServiceName::Plotter && state.registry.is_enabled(service) {
        state.set_running(service, true);
    }

    if !state.accepts(service) {
        debug!(kind = event.kind(), %service, "dropping event for inactive service");
        return false;
    }

    match event {
        DaemonEvent::BlockchainState(blockchain) => {
            full_node::apply_blockchain_state(state, blockchain)
        }
        DaemonEvent::Connections {
            service,
            connections,
        } => full_node::apply_connections(state, *service, connections),
        DaemonEvent::SignagePoint(sp) => farmer::apply_signage_point(state, sp, now),
        DaemonEvent::FarmingInfo(info) => farmer::apply_farming_info(state, info, now),
        DaemonEvent::PlottingQueue(queue) => plotter::apply_queue(state, queue, now),
    }
}

/// Service an event belongs to.
pub fn event_service(event: &DaemonEvent) -> ServiceName {
    match event {
        DaemonEvent::BlockchainState(_) => ServiceName::FullNode,
        DaemonEvent::Connections { service, .. } => *service,
        DaemonEvent::SignagePoint(_) | DaemonEvent::FarmingInfo(_) => ServiceName::Farmer,
        DaemonEvent::PlottingQueue(_) => ServiceName::Plotter,
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode stats value");
        Value::Null
    })
}
