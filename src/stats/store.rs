use std::collections::{BTreeMap, HashMap};
use std::mem;

use serde::{Serialize, Serializer};
use serde_json::Value;

use super::merge::{
    diff_object, merge_object, prune_unchanged, record_at, set_at, value_at, Record,
};
use super::service::ServiceName;

/// Pending change for one service in the next flush.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceUpdate {
    /// The service's stats were removed. Serialized as `null`.
    Delete,
    /// Changed leaf fields only (or the full record in compatibility mode).
    Patch(Record),
}

impl Serialize for ServiceUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServiceUpdate::Delete => serializer.serialize_none(),
            ServiceUpdate::Patch(record) => record.serialize(serializer),
        }
    }
}

/// Body of one delivery: service name to update.
pub type StatsPayload = BTreeMap<ServiceName, ServiceUpdate>;

/// Current per-service stats plus the accumulated changes since the last flush.
///
/// `pending` holds exactly the leaf-level changes applied to `current`
/// since the last [`StatsStore::take_payload`]. A field written back to its
/// flushed value leaves `pending` again.
#[derive(Debug, Default)]
pub struct StatsStore {
    current: HashMap<ServiceName, Record>,
    pending: HashMap<ServiceName, ServiceUpdate>,
    /// `current` as of the last flush, kept while a patch is pending.
    flushed: HashMap<ServiceName, Record>,
}

impl StatsStore {
    /// Creates a store with an empty record for every enabled service.
    pub fn new(enabled: &[ServiceName]) -> Self {
        Self {
            current: enabled.iter().map(|s| (*s, Record::new())).collect(),
            pending: HashMap::new(),
            flushed: HashMap::new(),
        }
    }

    /// Stores a first observation as-is; the full record goes out once.
    pub fn set_full(&mut self, service: ServiceName, record: Record) {
        self.current.insert(service, record.clone());
        self.pending.insert(service, ServiceUpdate::Patch(record));
        self.flushed.remove(&service);
    }

    /// Writes a single field, recording it only when it differs from `current`.
    ///
    /// Returns whether anything changed.
    pub fn set_field(&mut self, service: ServiceName, path: &[&str], value: Value) -> bool {
        let Some(current) = self.current.get(&service) else {
            self.set_full(service, record_at(path, value));
            return true;
        };

        if value_at(current, path) == Some(&value) {
            return false;
        }

        self.remember_flushed(service);
        if let Some(current) = self.current.get_mut(&service) {
            set_at(current, path, value.clone());
        }
        self.record_pending(service, record_at(path, value));

        true
    }

    /// Records `partial` as changed, merging it into both `current` and `pending`.
    pub fn merge_nested(&mut self, service: ServiceName, partial: Record) {
        if !self.current.contains_key(&service) {
            self.set_full(service, partial);
            return;
        }

        self.remember_flushed(service);
        if let Some(current) = self.current.get_mut(&service) {
            merge_object(current, partial.clone());
        }
        self.record_pending(service, partial);
    }

    /// Diffs `candidate` against `current` and records only the changes.
    ///
    /// Returns whether anything changed.
    pub fn apply(&mut self, service: ServiceName, candidate: Record) -> bool {
        let Some(current) = self.current.get(&service) else {
            self.set_full(service, candidate);
            return true;
        };

        let changes = diff_object(current, &candidate);
        if changes.is_empty() {
            return false;
        }

        self.merge_nested(service, changes);

        true
    }

    /// Removes the service's stats and signals deletion on the next flush.
    pub fn delete(&mut self, service: ServiceName) {
        self.current.remove(&service);
        self.pending.insert(service, ServiceUpdate::Delete);
        self.flushed.remove(&service);
    }

    pub fn current(&self, service: ServiceName) -> Option<&Record> {
        self.current.get(&service)
    }

    pub fn pending(&self, service: ServiceName) -> Option<&ServiceUpdate> {
        self.pending.get(&service)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Captures and clears the accumulated changes.
    ///
    /// With `full_records` set, every patched service carries its full
    /// current record instead of the diff.
    pub fn take_payload(&mut self, full_records: bool) -> StatsPayload {
        let pending = mem::take(&mut self.pending);
        self.flushed.clear();

        pending
            .into_iter()
            .map(|(service, update)| match update {
                ServiceUpdate::Patch(diff) if full_records => {
                    let full = self.current.get(&service).cloned().unwrap_or(diff);
                    (service, ServiceUpdate::Patch(full))
                }
                other => (service, other),
            })
            .collect()
    }

    fn record_pending(&mut self, service: ServiceName, partial: Record) {
        match self.pending.get_mut(&service) {
            Some(ServiceUpdate::Patch(existing)) => merge_object(existing, partial),
            // A re-add after a deletion in the same cycle goes out as the full record.
            Some(ServiceUpdate::Delete) => {
                let full = self.current.get(&service).cloned().unwrap_or(partial);
                self.pending.insert(service, ServiceUpdate::Patch(full));
            }
            None => {
                self.pending.insert(service, ServiceUpdate::Patch(partial));
            }
        }

        self.prune_restored(service);
    }

    /// Snapshots `current` when the service gets its first change since the
    /// last flush.
    fn remember_flushed(&mut self, service: ServiceName) {
        if self.pending.contains_key(&service) {
            return;
        }
        if let Some(current) = self.current.get(&service) {
            self.flushed.insert(service, current.clone());
        }
    }

    /// Drops pending fields whose value is back at the flushed one.
    fn prune_restored(&mut self, service: ServiceName) {
        let Some(flushed) = self.flushed.get(&service) else {
            return;
        };
        let Some(ServiceUpdate::Patch(patch)) = self.pending.get_mut(&service) else {
            return;
        };

        prune_unchanged(patch, flushed);
        if patch.is_empty() {
            self.pending.remove(&service);
            self.flushed.remove(&service);
        }
    }
}
