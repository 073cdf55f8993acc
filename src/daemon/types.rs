//! Typed payloads exchanged with the node daemon.

use serde::{Deserialize, Serialize};

// --- Full node ---

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainStateResponse {
    pub blockchain_state: BlockchainState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainState {
    pub difficulty: u64,
    /// Estimated network space in bytes.
    pub space: u128,
    #[serde(default)]
    pub peak: Option<Peak>,
    pub sync: SyncState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Peak {
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncState {
    pub synced: bool,
    pub sync_mode: bool,
    #[serde(default)]
    pub sync_progress_height: u32,
    #[serde(default)]
    pub sync_tip_height: u32,
}

// --- Connections ---

/// Peer type of a full node connection.
pub const NODE_TYPE_FULL_NODE: u8 = 1;
/// Peer type of a harvester connection.
pub const NODE_TYPE_HARVESTER: u8 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(rename = "type")]
    pub node_type: u8,
}

// --- Farmer ---

#[derive(Debug, Clone, Deserialize)]
pub struct NewSignagePoint {
    pub signage_point: SignagePoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignagePoint {
    pub challenge_hash: String,
    pub challenge_chain_sp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFarmingInfo {
    pub farming_info: FarmingInfoEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FarmingInfoEvent {
    pub challenge_hash: String,
    pub signage_point: String,
    pub passed_filter: u64,
    pub proofs: u64,
    #[serde(default)]
    pub total_plots: u64,
}

// --- Plotter ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Running,
    Finished,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlotQueue {
    #[serde(default)]
    pub queue: Vec<QueueJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueJob {
    pub id: String,
    pub state: JobState,
    #[serde(default)]
    pub size: u8,
    #[serde(default)]
    pub deleted: bool,
    /// Full log text.
    #[serde(default)]
    pub log: Option<String>,
    /// Log tail since the previous event.
    #[serde(default)]
    pub log_new: Option<String>,
}

// --- Wallet ---

/// Wallet type of CAT token wallets.
pub const WALLET_TYPE_CAT: u8 = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsResponse {
    pub wallets: Vec<WalletInfo>,
    #[serde(default)]
    pub fingerprint: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletInfo {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub wallet_type: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalanceResponse {
    pub wallet_balance: WalletBalance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalance {
    pub confirmed_wallet_balance: u128,
    pub spendable_balance: u128,
    pub unconfirmed_wallet_balance: u128,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncStatus {
    pub synced: bool,
    pub syncing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeightInfo {
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicKeys {
    #[serde(default)]
    pub public_key_fingerprints: Vec<u32>,
}

// --- Harvester ---

#[derive(Debug, Clone, Deserialize)]
pub struct PlotsResponse {
    #[serde(default)]
    pub plots: Vec<Plot>,
    #[serde(default)]
    pub failed_to_open_filenames: Vec<String>,
    #[serde(default)]
    pub not_found_filenames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plot {
    pub size: u8,
    pub file_size: u64,
    /// Set for pool-NFT plots, absent for OG plots.
    #[serde(default)]
    pub pool_contract_puzzle_hash: Option<String>,
}

// --- Daemon ---

#[derive(Debug, Clone, Deserialize)]
pub struct IsRunningResponse {
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockchain_state_space_beyond_u64() {
        let raw = r#"{
            "blockchain_state": {
                "difficulty": 3072,
                "space": 36893488147419103232000,
                "peak": {"height": 4200000},
                "sync": {"synced": true, "sync_mode": false, "sync_progress_height": 0, "sync_tip_height": 0}
            }
        }"#;
        let parsed: BlockchainStateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.blockchain_state.space, 36_893_488_147_419_103_232_000u128);
        assert_eq!(parsed.blockchain_state.peak.unwrap().height, 4_200_000);
    }

    #[test]
    fn test_job_state_unknown_variant() {
        let job: QueueJob =
            serde_json::from_str(r#"{"id":"a","state":"PAUSED","size":32}"#).unwrap();
        assert_eq!(job.state, JobState::Unknown);
        assert!(!job.deleted);
        assert!(job.log.is_none());
    }

    #[test]
    fn test_plot_pool_hash_optional() {
        let plots: PlotsResponse = serde_json::from_str(
            r#"{"plots":[{"size":32,"file_size":108000000000,"pool_contract_puzzle_hash":null}]}"#,
        )
        .unwrap();
        assert!(plots.plots[0].pool_contract_puzzle_hash.is_none());
        assert!(plots.not_found_filenames.is_empty());
    }
}
