use parking_lot::Mutex;

use super::farming::FarmingInfoList;
use super::plotter::PlotterJobs;
use super::samples::RollingSamples;
use super::service::{ServiceName, ServiceRegistry, Transition};
use super::store::{StatsPayload, StatsStore};

/// Values the collector takes from configuration.
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub excluded_services: Vec<String>,
    /// Send full records instead of diffs on every flush.
    pub compatibility_mode: bool,
    pub max_response_time_samples: usize,
    pub max_farming_infos: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            excluded_services: Vec::new(),
            compatibility_mode: false,
            max_response_time_samples: 100,
            max_farming_infos: 20,
        }
    }
}

/// All mutable collector state. Mutated only through [`StatsContext::with`].
#[derive(Debug)]
pub struct StatsState {
    pub registry: ServiceRegistry,
    pub store: StatsStore,
    pub farming: FarmingInfoList,
    pub response_times: RollingSamples,
    pub plotter: PlotterJobs,
}

impl StatsState {
    pub fn new(opts: &StatsOptions) -> Self {
        let registry = ServiceRegistry::new(&opts.excluded_services);
        let store = StatsStore::new(&registry.enabled());

        Self {
            registry,
            store,
            farming: FarmingInfoList::new(opts.max_farming_infos),
            response_times: RollingSamples::new(opts.max_response_time_samples),
            plotter: PlotterJobs::default(),
        }
    }

    /// Applies a running-state change; a stopped service loses its stats.
    pub fn set_running(&mut self, service: ServiceName, running: bool) -> Transition {
        let transition = self.registry.set_running(service, running);

        if transition == Transition::Stopped {
            self.store.delete(service);
            match service {
                ServiceName::Farmer => {
                    self.farming.clear();
                    self.response_times.clear();
                }
                ServiceName::Plotter => self.plotter.clear(),
                _ => {}
            }
        }

        transition
    }

    pub fn accepts(&self, service: ServiceName) -> bool {
        self.registry.is_enabled(service) && self.registry.is_running(service)
    }
}

/// Shared handle to the collector state.
///
/// The lock is held only for synchronous handler bodies, never across an
/// await, so a handler invocation is the unit of interleaving.
#[derive(Debug)]
pub struct StatsContext {
    state: Mutex<StatsState>,
    compatibility_mode: bool,
}

impl StatsContext {
    pub fn new(opts: &StatsOptions) -> Self {
        Self {
            state: Mutex::new(StatsState::new(opts)),
            compatibility_mode: opts.compatibility_mode,
        }
    }

    /// Runs `f` with exclusive access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&mut StatsState) -> R) -> R {
        f(&mut *self.state.lock())
    }

    pub fn is_enabled(&self, service: ServiceName) -> bool {
        self.state.lock().registry.is_enabled(service)
    }

    pub fn is_running(&self, service: ServiceName) -> bool {
        self.state.lock().registry.is_running(service)
    }

    pub fn set_running(&self, service: ServiceName, running: bool) -> Transition {
        self.state.lock().set_running(service, running)
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().store.has_pending()
    }

    pub fn compatibility_mode(&self) -> bool {
        self.compatibility_mode
    }

    /// Captures and clears the pending changes for one flush.
    pub fn take_payload(&self) -> StatsPayload {
        self.state.lock().store.take_payload(self.compatibility_mode)
    }
}
