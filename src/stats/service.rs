use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Independently lifecycled sub-service of the node daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceName {
    FullNode,
    Wallet,
    Farmer,
    Harvester,
    Plotter,
}

impl ServiceName {
    /// Returns all known services in document order.
    pub fn all() -> &'static [ServiceName] {
        &[
            ServiceName::FullNode,
            ServiceName::Wallet,
            ServiceName::Farmer,
            ServiceName::Harvester,
            ServiceName::Plotter,
        ]
    }

    /// Name used in the stats document and in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::FullNode => "fullNode",
            ServiceName::Wallet => "wallet",
            ServiceName::Farmer => "farmer",
            ServiceName::Harvester => "harvester",
            ServiceName::Plotter => "plotter",
        }
    }

    /// Name the daemon uses for the service process.
    pub fn daemon_name(&self) -> &'static str {
        match self {
            ServiceName::FullNode => "chia_full_node",
            ServiceName::Wallet => "chia_wallet",
            ServiceName::Farmer => "chia_farmer",
            ServiceName::Harvester => "chia_harvester",
            ServiceName::Plotter => "chia_plotter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.as_str() == name)
    }

    pub fn from_daemon_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.daemon_name() == name)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enabled and running flags of a single service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub enabled: bool,
    pub running: bool,
}

/// Outcome of a running-state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Started,
    Stopped,
}

/// Tracks which services are enabled and which are currently running.
#[derive(Debug)]
pub struct ServiceRegistry {
    states: HashMap<ServiceName, ServiceState>,
}

impl ServiceRegistry {
    /// Builds the registry from the configured exclusion list.
    /// Unknown names are ignored.
    pub fn new<S: AsRef<str>>(excluded: &[S]) -> Self {
        let mut states: HashMap<ServiceName, ServiceState> = ServiceName::all()
            .iter()
            .map(|s| {
                (
                    *s,
                    ServiceState {
                        enabled: true,
                        running: false,
                    },
                )
            })
            .collect();

        for name in excluded {
            let name = name.as_ref();
            match ServiceName::from_name(name) {
                Some(service) => {
                    if let Some(state) = states.get_mut(&service) {
                        state.enabled = false;
                    }
                }
                None => warn!(name, "ignoring unknown service in exclusion list"),
            }
        }

        Self { states }
    }

    pub fn is_enabled(&self, service: ServiceName) -> bool {
        self.states.get(&service).is_some_and(|s| s.enabled)
    }

    pub fn is_running(&self, service: ServiceName) -> bool {
        self.states.get(&service).is_some_and(|s| s.running)
    }

    pub fn state(&self, service: ServiceName) -> ServiceState {
        self.states.get(&service).copied().unwrap_or_default()
    }

    /// Enabled services in document order.
    pub fn enabled(&self) -> Vec<ServiceName> {
        ServiceName::all()
            .iter()
            .copied()
            .filter(|s| self.is_enabled(*s))
            .collect()
    }

    /// Updates the running flag. Disabled services never become running.
    pub fn set_running(&mut self, service: ServiceName, running: bool) -> Transition {
        let Some(state) = self.states.get_mut(&service) else {
            return Transition::Unchanged;
        };

        if !state.enabled || state.running == running {
            return Transition::Unchanged;
        }

        state.running = running;

        if running {
            info!(%service, "service started");
            Transition::Started
        } else {
            info!(%service, "service stopped");
            Transition::Stopped
        }
    }
}
