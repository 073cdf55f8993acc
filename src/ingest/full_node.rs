use serde_json::{json, Value};

use crate::daemon::types::{BlockchainState, Connection, NODE_TYPE_FULL_NODE, NODE_TYPE_HARVESTER};
use crate::stats::merge::Record;
use crate::stats::{ServiceName, StatsState};
use crate::units::{decimal_string, Capacity};

/// Normalized `blockchainState` record.
pub fn blockchain_state_record(state: &BlockchainState) -> Value {
    let peak_height = state.peak.as_ref().map(|p| p.height).unwrap_or(0);
    let (synced_height, tip_height) = if state.sync.synced {
        (peak_height, peak_height)
    } else {
        (state.sync.sync_progress_height, state.sync.sync_tip_height)
    };

    json!({
        "difficulty": state.difficulty,
        "spaceInGib": decimal_string(Capacity::from_bytes(state.space).gib()),
        "isSynced": state.sync.synced,
        "syncing": state.sync.sync_mode,
        "syncedHeight": synced_height,
        "tipHeight": tip_height,
    })
}

pub fn apply_blockchain_state(state: &mut StatsState, blockchain: &BlockchainState) -> bool {
    let mut candidate = Record::new();
    candidate.insert(
        "blockchainState".to_string(),
        blockchain_state_record(blockchain),
    );

    state.store.apply(ServiceName::FullNode, candidate)
}

/// Stores the count of relevant peers: full nodes for the full node,
/// harvesters for the farmer. Other services are ignored.
pub fn apply_connections(
    state: &mut StatsState,
    service: ServiceName,
    connections: &[Connection],
) -> bool {
    let (field, node_type) = match service {
        ServiceName::FullNode => ("fullNodeConnectionsCount", NODE_TYPE_FULL_NODE),
        ServiceName::Farmer => ("harvesterConnectionsCount", NODE_TYPE_HARVESTER),
        _ => return false,
    };

    let count = connections
        .iter()
        .filter(|c| c.node_type == node_type)
        .count();

    state.store.set_field(service, &[field], json!(count))
}
