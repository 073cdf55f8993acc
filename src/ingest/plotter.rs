use chrono::{DateTime, Utc};

use super::to_json;
use crate::daemon::types::QueueJob;
use crate::stats::{ServiceName, StatsState};

/// Applies a plotter queue snapshot and republishes the job list.
pub fn apply_queue(state: &mut StatsState, queue: &[QueueJob], now: DateTime<Utc>) -> bool {
    state.plotter.apply_queue(queue, now);
    let jobs = to_json(&state.plotter.jobs());

    state.store.set_field(ServiceName::Plotter, &["jobs"], jobs)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::daemon::types::JobState;
    use crate::stats::StatsOptions;

    fn job(id: &str, state: JobState, log_lines: usize) -> QueueJob {
        QueueJob {
            id: id.to_string(),
            state,
            size: 32,
            deleted: false,
            log: Some("l\n".repeat(log_lines)),
            log_new: None,
        }
    }

    #[test]
    fn test_empty_queue_publishes_empty_list() {
        let mut state = StatsState::new(&StatsOptions::default());
        assert!(apply_queue(&mut state, &[], Utc::now()));
        assert_eq!(
            state
                .store
                .current(ServiceName::Plotter)
                .and_then(|r| r.get("jobs")),
            Some(&json!([]))
        );
        assert!(!apply_queue(&mut state, &[], Utc::now()));
    }

    #[test]
    fn test_job_list_shape() {
        let mut state = StatsState::new(&StatsOptions::default());
        let now = DateTime::parse_from_rfc3339("2024-05-01T08:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        apply_queue(&mut state, &[job("a", JobState::Running, 1313)], now);

        let jobs = state
            .store
            .current(ServiceName::Plotter)
            .and_then(|r| r.get("jobs"))
            .cloned()
            .unwrap_or(Value::Null);
        assert_eq!(
            jobs,
            json!([{
                "id": "a",
                "state": "RUNNING",
                "kSize": 32,
                "progress": 0.5,
                "startedAt": "2024-05-01T08:00:00.250Z",
            }])
        );
    }
}
