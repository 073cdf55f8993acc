use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::timestamp_millis;

/// Farming activity grouped by (challenge, signage point).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmingInfo {
    pub challenge: String,
    pub signage_point: String,
    #[serde(with = "timestamp_millis")]
    pub received_at: DateTime<Utc>,
    pub proofs: u64,
    pub passed_filter: u64,
    #[serde(with = "timestamp_millis")]
    pub last_updated: DateTime<Utc>,
    /// Set once a farming-info event has been counted since the last reset.
    #[serde(skip)]
    pub has_farming_info: bool,
}

impl FarmingInfo {
    fn fresh(challenge: &str, signage_point: &str, now: DateTime<Utc>) -> Self {
        Self {
            challenge: challenge.to_string(),
            signage_point: signage_point.to_string(),
            received_at: now,
            proofs: 0,
            passed_filter: 0,
            last_updated: now,
            has_farming_info: false,
        }
    }

    fn matches(&self, challenge: &str, signage_point: &str) -> bool {
        self.challenge == challenge && self.signage_point == signage_point
    }
}

/// Bounded list of farming infos ordered by `received_at` descending.
#[derive(Debug, Clone)]
pub struct FarmingInfoList {
    entries: Vec<FarmingInfo>,
    max_len: usize,
}

impl FarmingInfoList {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_len + 1),
            max_len,
        }
    }

    /// A new signage point creates the entry or resets a matching one.
    pub fn on_signage_point(&mut self, challenge: &str, signage_point: &str, now: DateTime<Utc>) {
        match self.find_mut(challenge, signage_point) {
            Some(entry) => *entry = FarmingInfo::fresh(challenge, signage_point, now),
            None => self
                .entries
                .push(FarmingInfo::fresh(challenge, signage_point, now)),
        }

        self.reorder();
    }

    /// Adds the event's counters to the matching entry, creating it if needed.
    ///
    /// Returns the harvester response time in milliseconds when the entry
    /// had already counted a farming info.
    pub fn on_farming_info(
        &mut self,
        challenge: &str,
        signage_point: &str,
        proofs: u64,
        passed_filter: u64,
        now: DateTime<Utc>,
    ) -> Option<BigDecimal> {
        let sample = match self.find_mut(challenge, signage_point) {
            Some(entry) => {
                let sample = entry.has_farming_info.then(|| {
                    let elapsed = now.signed_duration_since(entry.received_at);
                    BigDecimal::from(elapsed.num_milliseconds())
                });
                entry.proofs += proofs;
                entry.passed_filter += passed_filter;
                entry.last_updated = now;
                entry.has_farming_info = true;
                sample
            }
            None => {
                let mut entry = FarmingInfo::fresh(challenge, signage_point, now);
                entry.proofs = proofs;
                entry.passed_filter = passed_filter;
                entry.has_farming_info = true;
                self.entries.push(entry);
                None
            }
        };

        self.reorder();

        sample
    }

    pub fn entries(&self) -> &[FarmingInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn find_mut(&mut self, challenge: &str, signage_point: &str) -> Option<&mut FarmingInfo> {
        self.entries
            .iter_mut()
            .find(|e| e.matches(challenge, signage_point))
    }

    fn reorder(&mut self) {
        self.entries
            .sort_by(|a, b| b.received_at.cmp(&a.received_at));
        self.entries.truncate(self.max_len);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_signage_point_then_two_farming_infos() {
        let mut list = FarmingInfoList::new(10);
        let start = t0();
        list.on_signage_point("c1", "s1", start);

        let first = list.on_farming_info("c1", "s1", 1, 3, start + Duration::milliseconds(400));
        let second = list.on_farming_info("c1", "s1", 2, 5, start + Duration::milliseconds(900));

        assert!(first.is_none());
        assert_eq!(second, Some(BigDecimal::from(900)));

        let entry = &list.entries()[0];
        assert_eq!(list.len(), 1);
        assert_eq!(entry.proofs, 3);
        assert_eq!(entry.passed_filter, 8);
        assert_eq!(entry.received_at, start);
        assert_eq!(entry.last_updated, start + Duration::milliseconds(900));
    }

    #[test]
    fn test_signage_point_resets_counters() {
        let mut list = FarmingInfoList::new(10);
        let start = t0();
        list.on_farming_info("c1", "s1", 4, 4, start);
        list.on_signage_point("c1", "s1", start + Duration::seconds(1));

        let entry = &list.entries()[0];
        assert_eq!(entry.proofs, 0);
        assert_eq!(entry.passed_filter, 0);
        assert_eq!(entry.received_at, start + Duration::seconds(1));

        // Counting restarts after a reset, so the next event is not a sample.
        assert!(list
            .on_farming_info("c1", "s1", 1, 1, start + Duration::seconds(2))
            .is_none());
    }

    #[test]
    fn test_ordered_newest_first_and_bounded() {
        let mut list = FarmingInfoList::new(3);
        let start = t0();
        for i in 0..5 {
            list.on_signage_point("c", &format!("s{i}"), start + Duration::seconds(i));
        }

        let sps: Vec<&str> = list
            .entries()
            .iter()
            .map(|e| e.signage_point.as_str())
            .collect();
        assert_eq!(sps, vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_update_does_not_reorder_by_last_updated() {
        let mut list = FarmingInfoList::new(5);
        let start = t0();
        list.on_signage_point("c", "old", start);
        list.on_signage_point("c", "new", start + Duration::seconds(9));
        list.on_farming_info("c", "old", 1, 1, start + Duration::seconds(10));

        assert_eq!(list.entries()[0].signage_point, "new");
        assert_eq!(list.entries()[1].signage_point, "old");
    }

    #[test]
    fn test_serialized_shape() {
        let mut list = FarmingInfoList::new(1);
        list.on_signage_point("c", "s", t0());
        let value = serde_json::to_value(&list.entries()[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "challenge": "c",
                "signagePoint": "s",
                "receivedAt": "2024-03-01T12:00:00.000Z",
                "proofs": 0,
                "passedFilter": 0,
                "lastUpdated": "2024-03-01T12:00:00.000Z",
            })
        );
    }
}
