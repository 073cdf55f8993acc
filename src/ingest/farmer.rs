use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::to_json;
use crate::daemon::types::{FarmingInfoEvent, SignagePoint};
use crate::stats::{ServiceName, StatsState};
use crate::units::decimal_string;

pub fn apply_signage_point(state: &mut StatsState, sp: &SignagePoint, now: DateTime<Utc>) -> bool {
    debug!(challenge = %sp.challenge_hash, sp = %sp.challenge_chain_sp, "new signage point");
    state
        .farming
        .on_signage_point(&sp.challenge_hash, &sp.challenge_chain_sp, now);

    publish(state)
}

pub fn apply_farming_info(
    state: &mut StatsState,
    info: &FarmingInfoEvent,
    now: DateTime<Utc>,
) -> bool {
    let sample = state.farming.on_farming_info(
        &info.challenge_hash,
        &info.signage_point,
        info.proofs,
        info.passed_filter,
        now,
    );
    if let Some(sample) = sample {
        state.response_times.push(sample);
    }

    publish(state)
}

/// Writes farming infos and response time aggregates into the farmer record.
fn publish(state: &mut StatsState) -> bool {
    let infos = to_json(&state.farming.entries());
    let average = optional_decimal(state.response_times.average());
    let worst = optional_decimal(state.response_times.max());

    let store = &mut state.store;
    let mut changed = store.set_field(ServiceName::Farmer, &["farmingInfos"], infos);
    changed |= store.set_field(
        ServiceName::Farmer,
        &["averageHarvesterResponseTime"],
        average,
    );
    changed |= store.set_field(ServiceName::Farmer, &["worstHarvesterResponseTime"], worst);

    changed
}

fn optional_decimal(value: Option<bigdecimal::BigDecimal>) -> Value {
    value
        .map(|v| Value::String(decimal_string(&v)))
        .unwrap_or(Value::Null)
}
