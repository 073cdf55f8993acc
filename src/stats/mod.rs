//! Per-service stats tracking and differential updates.

pub mod context;
pub mod farming;
pub mod merge;
pub mod plotter;
pub mod samples;
pub mod service;
pub mod store;

pub use context::{StatsContext, StatsOptions, StatsState};
pub use service::{ServiceName, ServiceRegistry, ServiceState, Transition};
pub use store::{ServiceUpdate, StatsPayload, StatsStore};

/// RFC 3339 timestamps with millisecond precision.
pub(crate) mod timestamp_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::Serializer;

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_str(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }
    }
}
