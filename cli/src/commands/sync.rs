use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe::spawn_probe;
use macrotrack_core::connectivity::ConnectivityMonitor;
use macrotrack_core::identity::{IdentityProvider, Session};
use macrotrack_core::service::{MacroService, SyncHandle};
use macrotrack_core::sync::SyncReport;

use super::helpers::json_error;

fn print_report(report: &SyncReport) {
    let Some(ref principal) = report.principal else {
        eprintln!("Not signed in; nothing synced");
        return;
    };
    println!("Synced as {principal}");
    if report.goals_pushed > 0 {
        println!("  goals pushed");
    }
    if report.goals_pulled > 0 {
        println!("  goals pulled");
    }
    println!(
        "  entries: {} pushed, {} pulled, {} already here",
        report.entries_pushed, report.entries_inserted, report.entries_present
    );
    if report.entries_malformed > 0 {
        println!("  skipped {} malformed remote entries", report.entries_malformed);
    }
}

/// Await a sync and print its report. Failures exit 1 via the returned error.
pub(crate) async fn run_sync(handle: SyncHandle, json: bool) -> Result<()> {
    let result = handle.await.context("sync task failed")?;
    match result {
        Ok(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Ok(report) => print_report(&report),
        Err(e) if json => {
            println!("{}", json_error(&e.to_string()));
            std::process::exit(1);
        }
        Err(e) => bail!("Sync failed: {e}"),
    }
    Ok(())
}

pub(crate) async fn cmd_sync(service: &MacroService, push: bool, json: bool) -> Result<()> {
    let handle = if push {
        service.push_all()
    } else {
        service.full_sync()
    };
    run_sync(handle, json).await
}

/// Follow the principal in the config file so `signin`/`signout` in another shell
/// reach a running watcher.
fn refresh_identity(config: &Config, session: &Session) {
    let principal = match Config::load_from(&config.data_dir) {
        Ok(fresh) => fresh.settings.principal,
        Err(e) => {
            warn!(error = %e, "could not reload config");
            return;
        }
    };
    if principal == session.current_principal() {
        return;
    }
    match principal {
        Some(ref p) => {
            info!(principal = %p, "principal changed");
            session.sign_in(p);
        }
        None => {
            info!("signed out");
            session.sign_out();
        }
    }
}

/// Stay running, syncing on sign-in and whenever the remote becomes reachable again.
pub(crate) async fn cmd_watch(
    service: &MacroService,
    session: &Arc<Session>,
    config: &Config,
    target: Option<(String, u16)>,
) -> Result<()> {
    let Some((host, port)) = target else {
        bail!("No remote configured. Run `macrotrack remote set <url>` first");
    };
    let interval = Duration::from_secs(config.settings.probe_interval_secs.max(1));

    let identity_task = service.watch_identity();
    let mut monitor = ConnectivityMonitor::new();
    service.bind_reconnect(&mut monitor);
    let mut status = service.engine().status();

    if let Err(e) = run_sync(service.full_sync(), false).await {
        eprintln!("{e:#}");
    }

    let (tx, rx) = mpsc::channel(16);
    let probe_task = spawn_probe(host.clone(), port, interval, tx);
    let monitor_task = tokio::spawn(monitor.run(rx));
    eprintln!("Watching {host}:{port} (every {}s). Press Ctrl-C to stop.", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    let mut last_completed = status.borrow().last_completed;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => refresh_identity(config, session),
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                debug!(in_flight = current.in_flight, "sync status changed");
                if current.syncing() {
                    continue;
                }
                if let Some(ref error) = current.last_error {
                    eprintln!("Sync failed: {error}");
                } else if current.last_completed != last_completed {
                    if let Some(at) = current.last_completed {
                        println!("Synced at {}", at.format("%H:%M:%S UTC"));
                    }
                }
                last_completed = current.last_completed;
            }
        }
    }

    probe_task.abort();
    monitor_task.abort();
    identity_task.abort();
    eprintln!("Stopped");
    Ok(())
}
