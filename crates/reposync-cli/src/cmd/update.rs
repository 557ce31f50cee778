//! Update command

use anyhow::{Context, Result, bail};
use chrono::Utc;
use reposync_core::config::Config;
use reposync_core::io::download::HttpFetcher;
use reposync_core::schedule::{self, GateDecision, NetworkClass, ScheduleInput};
use reposync_core::sync::RunLock;
use reposync_core::{Catalog, SyncOptions, Synchronizer, config_path, lock_path};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::DbHandle;
use crate::ui::Output;

/// Options of `reposync update`.
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Only update the repository at this address.
    pub repo: Option<String>,
    /// Consult the scheduling gate first.
    pub scheduled: bool,
    /// Current network class, for the gate.
    pub network: NetworkClass,
    /// Print the report as JSON.
    pub json: bool,
    /// Suppress progress output.
    pub quiet: bool,
}

/// Import configuration and synchronize every repository
pub async fn update(args: &UpdateArgs) -> Result<()> {
    let config = Config::load(&config_path())
        .await
        .context("Failed to load configuration")?;
    let db = DbHandle::spawn().context("Failed to open catalog database")?;

    for repo in &config.repositories {
        db.import_repository(repo)
            .await
            .with_context(|| format!("Failed to import repository {}", repo.address))?;
    }

    let output = if args.json || args.quiet {
        Output::silent()
    } else {
        Output::new()
    };

    if args.scheduled {
        let last_run = db.last_run().await?;
        let decision = schedule::evaluate(&ScheduleInput {
            interval_hours: config.update.interval_hours,
            last_run,
            now: Utc::now(),
            wifi_only: config.update.wifi_only,
            network: args.network,
        });
        if let GateDecision::Skip(reason) = decision {
            info!(%reason, "scheduled update skipped");
            if args.json {
                println!("{}", serde_json::json!({ "skipped": reason.to_string() }));
            } else {
                output.info(&format!("Skipping scheduled update: {reason}"));
                output.wait_async().await;
            }
            return Ok(());
        }
    }

    if let Some(address) = &args.repo {
        let address = address.trim_end_matches('/');
        let known = db.list_repositories().await?;
        if !known.iter().any(|r| r.address == address) {
            bail!("No repository configured at {address}");
        }
    }

    let lock = RunLock::acquire(&lock_path())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current repository");
            on_signal.cancel();
        }
    });

    let options = SyncOptions {
        device: config.device.clone(),
        notify: config.update.notify,
    };
    let synchronizer = Synchronizer::new(db.clone(), HttpFetcher::default(), output.clone(), options)
        .with_cancellation(cancel);

    let result = synchronizer.run(args.repo.as_deref()).await;
    output.wait_async().await;
    drop(lock);
    db.shutdown();

    let report = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let status = report.status();
    if status.is_fatal() {
        bail!("{status}");
    }
    Ok(())
}
