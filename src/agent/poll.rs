//! Liveness and refresh rounds against the daemon.
//!
//! Both rounds are generic over [`DaemonApi`] so they run unchanged against
//! a scripted daemon in tests. Running flags can change while a request is
//! in flight, so every write re-checks [`StatsState::accepts`] after the
//! await.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::daemon::DaemonApi;
use crate::ingest::wallet::{self, WalletSnapshot};
use crate::ingest::{full_node, harvester, plotter};
use crate::stats::{ServiceName, StatsContext, StatsState, Transition};

/// Ask the daemon which services are running and apply the transitions.
///
/// The plotter has no liveness probe; it counts as running once its queue
/// was received. A wallet that just came up is only considered running when
/// its keyring has keys.
///
/// A failed probe leaves that service as it was. The round only fails when
/// no probe got an answer.
pub async fn check_liveness<D: DaemonApi>(
    daemon: &D,
    ctx: &StatsContext,
) -> Result<Vec<(ServiceName, Transition)>> {
    let mut transitions = Vec::new();
    let mut probed = 0;
    let mut failed = Vec::new();

    for &service in ServiceName::all() {
        if service == ServiceName::Plotter || !ctx.is_enabled(service) {
            continue;
        }

        probed += 1;
        let mut running = match daemon.is_service_running(service).await {
            Ok(running) => running,
            Err(e) => {
                warn!(%service, error = %format!("{e:#}"), "liveness probe failed");
                failed.push(service.as_str());
                continue;
            }
        };

        if running && service == ServiceName::Wallet && !ctx.is_running(service) {
            running = wallet_has_keys(daemon).await;
        }

        let transition = ctx.set_running(service, running);
        if transition != Transition::Unchanged {
            transitions.push((service, transition));
        }
    }

    if ctx.is_enabled(ServiceName::Plotter) && !ctx.is_running(ServiceName::Plotter) {
        match daemon.register_plotter_queue().await {
            Ok(queue) => {
                let transition = ctx.with(|s| {
                    let transition = s.set_running(ServiceName::Plotter, true);
                    plotter::apply_queue(s, &queue, Utc::now());
                    transition
                });
                // A pushed queue may have marked it running meanwhile.
                if transition != Transition::Unchanged {
                    transitions.push((ServiceName::Plotter, transition));
                }
            }
            Err(e) => debug!(error = %e, "plotter queue not available"),
        }
    }

    if probed > 0 && failed.len() == probed {
        return Err(anyhow!("liveness probes failed for {}", failed.join(", ")));
    }

    Ok(transitions)
}

async fn wallet_has_keys<D: DaemonApi>(daemon: &D) -> bool {
    match daemon.get_public_keys().await {
        Ok(keys) if !keys.is_empty() => true,
        Ok(_) => {
            info!("wallet is running without keys, treating as stopped");
            false
        }
        Err(e) => {
            warn!(error = %e, "failed to check wallet keys");
            false
        }
    }
}

/// Re-pull the poll-based stats of every running service.
///
/// Services are refreshed concurrently; a failure of one does not stop the
/// others. Returns whether any record changed.
pub async fn refresh_stats<D: DaemonApi>(daemon: &D, ctx: &StatsContext) -> Result<bool> {
    let (full_node, wallet, harvester, connections) = tokio::join!(
        refresh_full_node(daemon, ctx),
        refresh_wallet(daemon, ctx),
        refresh_harvester(daemon, ctx),
        refresh_connections(daemon, ctx),
    );

    let mut changed = false;
    let mut failed = Vec::new();
    for (name, result) in [
        ("full node", full_node),
        ("wallet", wallet),
        ("harvester", harvester),
        ("connections", connections),
    ] {
        match result {
            Ok(c) => changed |= c,
            Err(e) => {
                warn!(error = %format!("{e:#}"), part = name, "stats refresh failed");
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        return Err(anyhow!("refresh failed for {}", failed.join(", ")));
    }

    Ok(changed)
}

fn accepts(ctx: &StatsContext, service: ServiceName) -> bool {
    ctx.with(|s| s.accepts(service))
}

/// Apply `f` only if the service is still accepting writes.
fn apply_if_accepted(
    ctx: &StatsContext,
    service: ServiceName,
    f: impl FnOnce(&mut StatsState) -> bool,
) -> bool {
    ctx.with(|s| s.accepts(service) && f(s))
}

async fn refresh_full_node<D: DaemonApi>(daemon: &D, ctx: &StatsContext) -> Result<bool> {
    if !accepts(ctx, ServiceName::FullNode) {
        return Ok(false);
    }

    let blockchain = daemon.get_blockchain_state().await?;

    Ok(apply_if_accepted(ctx, ServiceName::FullNode, |s| {
        full_node::apply_blockchain_state(s, &blockchain)
    }))
}

async fn refresh_connections<D: DaemonApi>(daemon: &D, ctx: &StatsContext) -> Result<bool> {
    let mut changed = false;

    for service in [ServiceName::FullNode, ServiceName::Farmer] {
        if !accepts(ctx, service) {
            continue;
        }

        let connections = daemon.get_connections(service).await?;
        changed |= apply_if_accepted(ctx, service, |s| {
            full_node::apply_connections(s, service, &connections)
        });
    }

    Ok(changed)
}

async fn refresh_wallet<D: DaemonApi>(daemon: &D, ctx: &StatsContext) -> Result<bool> {
    if !accepts(ctx, ServiceName::Wallet) {
        return Ok(false);
    }

    let wallets = daemon.get_wallets().await?;
    let balances = try_join_all(
        wallets
            .wallets
            .iter()
            .map(|w| daemon.get_wallet_balance(w.id)),
    )
    .await?;
    let (sync_status, synced_height) =
        tokio::try_join!(daemon.get_sync_status(), daemon.get_height_info())?;

    let snapshot = WalletSnapshot {
        wallets: wallets.wallets.into_iter().zip(balances).collect(),
        sync_status,
        synced_height,
        fingerprint: wallets.fingerprint,
    };

    Ok(apply_if_accepted(ctx, ServiceName::Wallet, |s| {
        wallet::apply_wallet_snapshot(s, &snapshot)
    }))
}

async fn refresh_harvester<D: DaemonApi>(daemon: &D, ctx: &StatsContext) -> Result<bool> {
    if !accepts(ctx, ServiceName::Harvester) {
        return Ok(false);
    }

    let plots = daemon.get_plots().await?;

    Ok(apply_if_accepted(ctx, ServiceName::Harvester, |s| {
        harvester::apply_plots(s, &plots)
    }))
}

/// Run `op` until it succeeds, sleeping `backoff` between attempts.
///
/// Returns `None` if cancelled first.
pub async fn retry_until_ok<T, F, Fut>(
    what: &str,
    backoff: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = op() => result,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(what, attempt, "startup step succeeded after retrying");
                }
                return Some(value);
            }
            Err(e) => debug!(
                what,
                attempt,
                error = %format!("{e:#}"),
                "startup step failed, retrying",
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
