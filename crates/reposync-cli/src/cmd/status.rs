//! Status command
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use reposync_core::{Catalog, lock_path};

use crate::store::DbHandle;
use crate::ui::Theme;

/// Show last run time and catalog size
pub async fn status() -> Result<()> {
    let db = DbHandle::spawn().context("Failed to open catalog database")?;
    let theme = Theme::default();
    let label_width = 12;

    let last_run = db.last_run().await?;
    let counts = db.counts().await?;
    let updates = db.updatable_applications().await?;
    let repos = db.list_repositories().await?;
    db.shutdown();

    println!();
    println!("{}", "Catalog status".dark_grey());
    println!();
    println!(
        "{:<width$}{}",
        "Version:",
        env!("CARGO_PKG_VERSION"),
        width = label_width
    );
    println!(
        "{:<width$}{}",
        "Last run:",
        last_run.map_or_else(
            || "never".to_string(),
            |t| t
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        ),
        width = label_width
    );
    println!(
        "{:<width$}{} ({} enabled)",
        "Repos:",
        repos.len(),
        repos.iter().filter(|r| r.enabled).count(),
        width = label_width
    );
    println!(
        "{:<width$}{}",
        "Apps:",
        counts.applications,
        width = label_width
    );
    println!(
        "{:<width$}{}",
        "Packages:",
        counts.packages,
        width = label_width
    );
    if lock_path().exists() {
        println!(
            "{:<width$}{}",
            "Lock:",
            "update in progress".with(theme.colors.warning),
            width = label_width
        );
    }

    println!();
    if updates.is_empty() {
        println!("{}", "Installed applications are up to date".dark_grey());
    } else {
        println!(
            "{}",
            format!("{} applications can be updated", updates.len()).dark_grey()
        );
        for u in &updates {
            println!(
                "  {:<32} {}  ->  {}",
                u.app_id.as_str().with(theme.colors.primary),
                u.installed_vercode.to_string().dark_grey(),
                u.suggested_vercode.to_string().with(theme.colors.success)
            );
        }
    }
    println!();
    Ok(())
}
