//! Relay agent forwarding node service stats to a dashboard API.

pub mod agent;
pub mod config;
pub mod daemon;
pub mod export;
pub mod ingest;
pub mod sink;
pub mod stats;
pub mod units;

/// Build-time version info.
pub mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}
