//! Installed command

use anyhow::{Context, Result};

use crate::store::DbHandle;
use crate::ui::Output;

/// Record the installed version of an application
pub async fn installed(app: &str, vercode: i32) -> Result<()> {
    let db = DbHandle::spawn().context("Failed to open catalog database")?;
    db.set_installed(app.to_string(), vercode).await?;

    let output = Output::new();
    match db.get_application(app.to_string()).await? {
        Some(summary) => match summary.suggested_vercode {
            Some(suggested) if suggested > vercode => {
                output.info(&format!("{app} {vercode} recorded; {suggested} is available"));
            }
            _ => output.info(&format!("{app} {vercode} recorded")),
        },
        None => output.warning(&format!("{app} {vercode} recorded, but no repository provides it")),
    }
    db.shutdown();
    output.wait_async().await;
    Ok(())
}
