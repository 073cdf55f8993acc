use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::daemon::types::{Plot, PlotsResponse};
use crate::stats::merge::Record;
use crate::stats::{ServiceName, StatsState};
use crate::units::{decimal_string, effective_plot_capacity, Capacity};

/// Plot count and capacities of one plot group.
#[derive(Debug, Default)]
struct PlotGroup {
    count: u64,
    raw_bytes: u128,
    /// Plot count per k size.
    by_k: BTreeMap<u8, u64>,
}

impl PlotGroup {
    fn add(&mut self, plot: &Plot) {
        self.count += 1;
        self.raw_bytes += u128::from(plot.file_size);
        *self.by_k.entry(plot.size).or_default() += 1;
    }

    fn raw_capacity(&self) -> Capacity {
        Capacity::from_bytes(self.raw_bytes)
    }

    fn effective_capacity(&self) -> Capacity {
        effective_plot_capacity(self.by_k.iter().map(|(k, count)| (*k, *count)))
    }

    fn to_json(&self) -> Value {
        json!({
            "count": self.count,
            "rawCapacityInGib": decimal_string(self.raw_capacity().gib()),
            "effectiveCapacityInGib": decimal_string(self.effective_capacity().gib()),
        })
    }
}

/// Summarizes the harvester's plot inventory. Plots with a pool contract
/// are NFT plots, the rest are OG plots.
pub fn plot_summary(plots: &PlotsResponse) -> Record {
    let mut og = PlotGroup::default();
    let mut nft = PlotGroup::default();
    for plot in &plots.plots {
        match plot.pool_contract_puzzle_hash {
            Some(_) => nft.add(plot),
            None => og.add(plot),
        }
    }

    let total_raw: Capacity = [og.raw_capacity(), nft.raw_capacity()].into_iter().sum();
    let total_effective: Capacity = [og.effective_capacity(), nft.effective_capacity()]
        .into_iter()
        .sum();

    let summary = json!({
        "plotCount": plots.plots.len(),
        "totalRawPlotCapacityInGib": decimal_string(total_raw.gib()),
        "totalEffectivePlotCapacityInGib": decimal_string(total_effective.gib()),
        "ogPlots": og.to_json(),
        "nftPlots": nft.to_json(),
        "failedToOpenCount": plots.failed_to_open_filenames.len(),
        "notFoundCount": plots.not_found_filenames.len(),
    });

    match summary {
        Value::Object(record) => record,
        _ => Record::new(),
    }
}

pub fn apply_plots(state: &mut StatsState, plots: &PlotsResponse) -> bool {
    state.store.apply(ServiceName::Harvester, plot_summary(plots))
}
