//! Multi-repository synchronization.
//!
//! A run walks the configured repositories in order. Each active repository
//! is fetched, parsed as it streams in, and written into the catalog's
//! staging area; only a complete, trusted index is committed. A failing
//! repository is recorded in the [`SyncReport`] and the run moves on. Once
//! every repository has been processed, and only if something changed, the
//! catalog is cleaned up and derived fields are recomputed exactly once.

mod lock;
mod outcome;

pub use lock::RunLock;
pub use outcome::{RepoOutcome, RepoResult, SyncReport, SyncStatus};

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use reposync_schema::{IndexError, IndexRecord, RepoId, Repository, RepositoryMetadata};
use thiserror::Error;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::config::DeviceProfile;
use crate::index::IndexReader;
use crate::io::download::{DownloadError, FetchOutcome, IndexBody, IndexFetcher, MeteredStream};
use crate::reporter::SyncReporter;
use crate::trust::{self, TrustDecision, TrustError};

/// A failure confined to one repository.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Index has no repository element")]
    MissingRepositoryElement,
}

/// A failure that aborts the whole run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Another update is already running (lock file {})", .0.display())]
    RunInProgress(PathBuf),

    #[error("Update cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-wide settings.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Device used for compatibility.
    pub device: DeviceProfile,
    /// Report installed applications with newer suggested versions.
    pub notify: bool,
}

/// Drives a synchronization run.
pub struct Synchronizer<C, F, R> {
    catalog: C,
    fetcher: F,
    reporter: R,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl<C, F, R> Synchronizer<C, F, R>
where
    C: Catalog,
    F: IndexFetcher,
    R: SyncReporter,
{
    pub fn new(catalog: C, fetcher: F, reporter: R, options: SyncOptions) -> Self {
        Self {
            catalog,
            fetcher,
            reporter,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between repositories once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The catalog this synchronizer writes to.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Run once over every repository, or only the one at `only_address`.
    ///
    /// The final status is reported before returning, including for global
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] for faults outside any single repository and on
    /// cancellation. Repository failures are part of the returned report.
    pub async fn run(&self, only_address: Option<&str>) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let result = self.run_inner(only_address).await;

        match &result {
            Ok(report) => self.reporter.status(&report.status()),
            Err(e) => {
                warn!("update aborted: {e}");
                self.reporter.status(&SyncStatus::ErrorGlobal(e.to_string()));
            }
        }
        info!(elapsed = ?started.elapsed(), "update finished");
        result
    }

    async fn run_inner(&self, only_address: Option<&str>) -> Result<SyncReport, SyncError> {
        let repos = self.catalog.list_repositories().await?;
        let mut report = SyncReport::default();
        let mut disabled: Vec<RepoId> = Vec::new();
        let mut cancelled = false;

        for repo in &repos {
            if !repo.enabled {
                disabled.push(repo.id);
                report.push(&repo.address, RepoOutcome::Disabled);
                continue;
            }
            match only_address {
                Some(address) if repo.address != address.trim_end_matches('/') => {
                    report.push(&repo.address, RepoOutcome::Unchanged);
                    continue;
                }
                None if repo.peer => {
                    debug!(address = %repo.address, "skipping peer repository in batch run");
                    continue;
                }
                _ => {}
            }
            if self.cancel.is_cancelled() {
                warn!(address = %repo.address, "cancelled before repository");
                cancelled = true;
                break;
            }

            self.reporter.status(&SyncStatus::Info(format!(
                "Connecting to {}",
                repo.address
            )));
            let outcome = match self.sync_repository(repo).await {
                Ok(true) => RepoOutcome::Updated,
                Ok(false) => RepoOutcome::Unchanged,
                Err(e) => {
                    warn!(address = %repo.address, "repository update failed: {e}");
                    RepoOutcome::Failed(e.to_string())
                }
            };
            info!(address = %repo.address, ?outcome, "repository processed");
            report.push(&repo.address, outcome);
        }

        if report.changed() {
            self.finalize(&disabled).await?;
        } else {
            debug!("no repository changed; skipping compatibility pass");
        }

        if cancelled {
            return Err(SyncError::Cancelled);
        }
        self.catalog.set_last_run(Utc::now()).await?;
        Ok(report)
    }

    /// Purge, recompute and notify after a changing run.
    ///
    /// Purging a disabled repository also forgets its index hash and ETag, so
    /// re-enabling it later restores its packages.
    async fn finalize(&self, disabled: &[RepoId]) -> Result<(), SyncError> {
        self.reporter
            .status(&SyncStatus::Info("Checking compatibility".to_string()));

        for repo in disabled {
            let removed = self.catalog.delete_packages_by_repository(*repo).await?;
            debug!(repo = %repo, removed, "purged packages of disabled repository");
        }
        let orphans = self.catalog.delete_applications_without_packages().await?;
        debug!(orphans, "purged applications without packages");

        self.catalog
            .recompute_derived_fields(&self.options.device)
            .await?;
        self.reporter.catalog_changed();

        if self.options.notify {
            let updates = self.catalog.updatable_applications().await?;
            if !updates.is_empty() {
                info!(count = updates.len(), "updates available");
                self.reporter.updates_available(&updates);
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` when new content was committed.
    async fn sync_repository(&self, repo: &Repository) -> Result<bool, RepoError> {
        let body = match self.fetcher.fetch(repo).await? {
            FetchOutcome::NotModified => {
                debug!(address = %repo.address, "index not modified");
                return Ok(false);
            }
            FetchOutcome::Fetched(body) => body,
        };

        self.catalog.begin_staging().await?;
        let applied = self.stage_index(repo, body).await;
        let committed = match applied {
            Ok(Some(updated)) => self
                .catalog
                .commit_staging(&updated)
                .await
                .map_err(RepoError::from),
            Ok(None) => {
                self.catalog.discard_staging().await?;
                return Ok(false);
            }
            Err(e) => Err(e),
        };

        match committed {
            Ok(()) => Ok(true),
            Err(e) => {
                if let Err(discard) = self.catalog.discard_staging().await {
                    warn!(address = %repo.address, "failed to discard staging: {discard}");
                }
                Err(e)
            }
        }
    }

    /// Stream the index into the staging area.
    ///
    /// Returns the repository record to persist, or `None` if the content is
    /// identical to the last committed index.
    async fn stage_index(
        &self,
        repo: &Repository,
        body: IndexBody,
    ) -> Result<Option<Repository>, RepoError> {
        self.catalog.stage_remove_repository(repo.id).await?;

        let IndexBody {
            stream,
            total,
            etag,
        } = body;
        let mut metered = MeteredStream::new(stream, |read| {
            self.reporter.progress(&repo.address, read, total);
        });

        let mut metadata: Option<RepositoryMetadata> = None;
        let mut apps = 0usize;
        {
            let mut reader = IndexReader::new(StreamReader::new(&mut metered), repo.id);
            while let Some(record) = reader.next_record().await? {
                match record {
                    IndexRecord::Repository(meta) => metadata = Some(meta),
                    IndexRecord::Application(app, packages) => {
                        self.catalog.stage_application(app, packages).await?;
                        apps += 1;
                    }
                }
            }
        }
        let bytes = metered.bytes_read();
        let index_hash = metered.finish();
        debug!(address = %repo.address, apps, bytes, "index parsed");

        if repo.index_hash.as_deref() == Some(index_hash.as_str()) {
            debug!(address = %repo.address, "index content unchanged");
            return Ok(None);
        }

        let metadata = metadata.ok_or(RepoError::MissingRepositoryElement)?;
        let decision = trust::verify(repo, metadata.signing_cert.as_deref())?;

        let mut updated = repo.clone();
        if decision == TrustDecision::FirstUse {
            info!(address = %repo.address, "trusting signing certificate on first use");
            updated.signing_cert = metadata.signing_cert;
        }
        if metadata.name.is_some() {
            updated.name = metadata.name;
        }
        if metadata.description.is_some() {
            updated.description = metadata.description;
        }
        updated.max_age = metadata.max_age;
        updated.format_version = metadata.format_version;
        updated.etag = etag;
        updated.index_hash = Some(index_hash);
        updated.last_updated = Some(Utc::now());
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests;
