use serde_json::{json, Value};

use crate::daemon::types::{SyncStatus, WalletBalance, WalletInfo, WALLET_TYPE_CAT};
use crate::stats::merge::Record;
use crate::stats::{ServiceName, StatsState};
use crate::units::{ChiaAmount, CAT_DECIMAL_PLACES, NATIVE_DECIMAL_PLACES};

/// Wallet data gathered by one refresh round.
#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    pub wallets: Vec<(WalletInfo, WalletBalance)>,
    pub sync_status: SyncStatus,
    pub synced_height: u32,
    pub fingerprint: Option<u32>,
}

fn decimal_places(wallet_type: u8) -> i64 {
    if wallet_type == WALLET_TYPE_CAT {
        CAT_DECIMAL_PLACES
    } else {
        NATIVE_DECIMAL_PLACES
    }
}

fn balance_json(balance: &WalletBalance, places: i64) -> Value {
    let amount = |raw: u128| ChiaAmount::from_raw(raw, places).to_string();

    json!({
        "confirmed": amount(balance.confirmed_wallet_balance),
        "spendable": amount(balance.spendable_balance),
        "unconfirmed": amount(balance.unconfirmed_wallet_balance),
    })
}

pub fn wallet_record(snapshot: &WalletSnapshot) -> Record {
    let wallets: Vec<Value> = snapshot
        .wallets
        .iter()
        .map(|(info, balance)| {
            json!({
                "id": info.id,
                "name": info.name,
                "type": info.wallet_type,
                "balance": balance_json(balance, decimal_places(info.wallet_type)),
            })
        })
        .collect();

    let mut record = Record::new();
    record.insert("wallets".to_string(), Value::Array(wallets));
    record.insert(
        "syncStatus".to_string(),
        json!({
            "synced": snapshot.sync_status.synced,
            "syncing": snapshot.sync_status.syncing,
        }),
    );
    record.insert("syncedHeight".to_string(), json!(snapshot.synced_height));
    record.insert("fingerprint".to_string(), json!(snapshot.fingerprint));

    record
}

pub fn apply_wallet_snapshot(state: &mut StatsState, snapshot: &WalletSnapshot) -> bool {
    state.store.apply(ServiceName::Wallet, wallet_record(snapshot))
}
