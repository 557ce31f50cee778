//! Repos command

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use reposync_core::config::Config;
use reposync_core::trust::fingerprint;
use reposync_core::{Catalog, config_path};
use reposync_schema::Repository;

use crate::store::DbHandle;
use crate::ui::Theme;

/// List configured repositories
pub async fn repos() -> Result<()> {
    let config = Config::load(&config_path())
        .await
        .context("Failed to load configuration")?;
    let db = DbHandle::spawn().context("Failed to open catalog database")?;
    for repo in &config.repositories {
        db.import_repository(repo).await?;
    }
    let repos = db.list_repositories().await?;
    db.shutdown();

    let theme = Theme::default();
    if repos.is_empty() {
        println!("{}", "No repositories configured".dark_grey());
        return Ok(());
    }

    println!();
    for repo in &repos {
        let icon = if repo.enabled {
            theme.icons.success.with(theme.colors.success)
        } else {
            theme.icons.pending.with(theme.colors.secondary)
        };
        println!("{icon} {}", repo.address.as_str().with(theme.colors.primary));
        for line in describe(repo) {
            println!("    {}", line.dark_grey());
        }
    }
    println!();
    Ok(())
}

/// Detail lines shown under a repository's address.
fn describe(repo: &Repository) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(name) = &repo.name {
        lines.push(format!("name:        {name}"));
    }

    let mut flags = Vec::new();
    if !repo.enabled {
        flags.push("disabled");
    }
    if repo.peer {
        flags.push("peer");
    }
    if !flags.is_empty() {
        lines.push(format!("flags:       {}", flags.join(", ")));
    }

    let trusted = repo.signing_cert.as_deref().map(fingerprint);
    match (trusted, &repo.pinned_fingerprint) {
        (Some(fp), _) => lines.push(format!("fingerprint: {fp}")),
        (None, Some(pin)) => lines.push(format!("fingerprint: {pin} (pinned, not yet verified)")),
        (None, None) => lines.push("fingerprint: not yet trusted".to_string()),
    }

    lines.push(format!(
        "updated:     {}",
        repo.last_updated.map_or_else(
            || "never".to_string(),
            |t| t.format("%Y-%m-%d %H:%M UTC").to_string()
        )
    ));
    lines
}
