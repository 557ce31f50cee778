use dirs::home_dir;
use std::path::PathBuf;

/// Environment variable overriding the reposync home directory.
pub const HOME_ENV: &str = "REPOSYNC_HOME";

/// Returns the primary state directory, or None if the user's home cannot be resolved.
pub fn try_reposync_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".reposync"))
}

/// Returns the reposync home directory (`~/.reposync`).
///
/// Falls back to `.reposync` in the working directory when neither
/// `REPOSYNC_HOME` nor the user's home directory is available.
pub fn reposync_home() -> PathBuf {
    try_reposync_home().unwrap_or_else(|| PathBuf::from(".reposync"))
}

/// Configuration file: ~/.reposync/config.toml
pub fn config_path() -> PathBuf {
    reposync_home().join("config.toml")
}

/// `SQLite` catalog path: ~/.reposync/catalog.db
pub fn db_path() -> PathBuf {
    reposync_home().join("catalog.db")
}

/// Run lock held for the duration of a synchronization: ~/.reposync/sync.lock
pub fn lock_path() -> PathBuf {
    reposync_home().join("sync.lock")
}

/// Location of the index document below a repository address.
///
/// # Example
///
/// ```
/// use reposync_core::paths::index_url;
///
/// assert_eq!(index_url("https://f-droid.org/repo/"), "https://f-droid.org/repo/index.xml");
/// ```
pub fn index_url(address: &str) -> String {
    format!(
        "{}/{}",
        address.trim_end_matches('/'),
        reposync_schema::INDEX_FILE_NAME
    )
}
