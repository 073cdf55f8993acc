use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::timestamp_millis;
use crate::daemon::types::{JobState, QueueJob};

/// Log lines a standard plotting job writes from start to finish.
pub const EXPECTED_LOG_LINES: usize = 2626;

static LOG_TIMESTAMP: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"([0-9]+-[0-9]+-[0-9]+T[0-9]+:[0-9]+:[0-9]+\.[0-9]+)").ok()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotterJob {
    pub id: String,
    pub state: JobState,
    pub k_size: u8,
    pub progress: f64,
    #[serde(with = "timestamp_millis::option")]
    pub started_at: Option<DateTime<Utc>>,
}

impl PlotterJob {
    fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

/// Tracked plotting jobs and their accumulated logs.
#[derive(Debug, Default)]
pub struct PlotterJobs {
    jobs: Vec<PlotterJob>,
    logs: HashMap<String, String>,
}

impl PlotterJobs {
    /// Applies a queue snapshot. Returns whether any job changed.
    pub fn apply_queue(&mut self, queue: &[QueueJob], now: DateTime<Utc>) -> bool {
        let mut changed = false;
        let mut resort = false;

        for update in queue {
            if update.deleted || update.state == JobState::Finished {
                self.logs.remove(&update.id);
                let before = self.jobs.len();
                self.jobs.retain(|j| j.id != update.id);
                changed |= self.jobs.len() != before;
                continue;
            }

            if let Some(log) = &update.log {
                self.logs.insert(update.id.clone(), log.clone());
            } else if let Some(tail) = &update.log_new {
                self.logs
                    .entry(update.id.clone())
                    .or_default()
                    .push_str(tail);
            }
            let log = self.logs.get(&update.id).map(String::as_str).unwrap_or("");
            let progress = job_progress(update.state, log);

            match self.jobs.iter_mut().find(|j| j.id == update.id) {
                Some(job) => {
                    if job.state != update.state {
                        if update.state == JobState::Running {
                            job.started_at = Some(now);
                        }
                        job.state = update.state;
                        resort = true;
                    }
                    if job.progress != progress || job.k_size != update.size {
                        job.progress = progress;
                        job.k_size = update.size;
                        changed = true;
                    }
                }
                None => {
                    let started_at = (update.state == JobState::Running)
                        .then(|| log_start_time(log).unwrap_or(now));
                    self.jobs.push(PlotterJob {
                        id: update.id.clone(),
                        state: update.state,
                        k_size: update.size,
                        progress,
                        started_at,
                    });
                    resort = true;
                }
            }
        }

        if resort {
            self.jobs.sort_by(running_by_progress);
        }

        changed || resort
    }

    pub fn jobs(&self) -> &[PlotterJob] {
        &self.jobs
    }

    pub fn log(&self, id: &str) -> Option<&str> {
        self.logs.get(id).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
        self.logs.clear();
    }
}

/// Progress in [0, 1] derived from the job state and its log length.
pub fn job_progress(state: JobState, log: &str) -> f64 {
    match state {
        JobState::Submitted => 0.0,
        JobState::Finished => 1.0,
        JobState::Running | JobState::Unknown => {
            let lines = log.lines().count() as f64;
            (lines / EXPECTED_LOG_LINES as f64).min(1.0)
        }
    }
}

/// Parses the local start timestamp from the first log line.
pub fn log_start_time(log: &str) -> Option<DateTime<Utc>> {
    let first_line = log.lines().next()?;
    let captures = LOG_TIMESTAMP.as_ref()?.captures(first_line)?;
    let naive =
        NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), "%Y-%m-%dT%H:%M:%S%.f").ok()?;

    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

fn running_by_progress(a: &PlotterJob, b: &PlotterJob) -> Ordering {
    match (a.is_running(), b.is_running()) {
        (true, true) => b
            .progress
            .partial_cmp(&a.progress)
            .unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}
