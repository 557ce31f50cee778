//! The catalog storage collaborator.
//!
//! A [`Catalog`] owns repositories, applications and packages. Whole-repository
//! replacement goes through a staging area: writes land in a shadow copy of
//! the application and package tables, and [`Catalog::commit_staging`] swaps
//! that copy into place in one step. Readers observe either the old catalog or
//! the new one, never a mix.
//!
//! Implementations must serialize writers; callers additionally hold a
//! [`RunLock`](crate::sync::RunLock) so only one synchronization touches the
//! catalog at a time.

pub mod derived;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_schema::{AppId, ApplicationRecord, PackageRecord, RepoId, Repository};
use serde::Serialize;
use thiserror::Error;

use crate::config::{DeviceProfile, RepoConfig};

pub use memory::MemoryCatalog;

/// Errors raised by a catalog backend.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The storage engine failed.
    #[error("Catalog storage error: {0}")]
    Backend(String),

    /// A staged write or commit was attempted with no staging area open.
    #[error("No staging area is open")]
    NotStaging,

    /// The referenced repository does not exist.
    #[error("Unknown repository {0}")]
    UnknownRepository(RepoId),

    /// The catalog worker is no longer running.
    #[error("Catalog worker stopped")]
    Disconnected,
}

/// An installed application for which the catalog suggests a newer build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCandidate {
    /// Application identifier.
    pub app_id: AppId,
    /// Display name, if the index provided one.
    pub name: Option<String>,
    /// Version code currently installed.
    pub installed_vercode: i32,
    /// Version code the catalog suggests.
    pub suggested_vercode: i32,
}

/// Catalog storage used by the synchronizer.
///
/// Every method is transactional on its own; `commit_staging` is atomic
/// across both staged tables.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All configured repositories, ordered by id.
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError>;

    /// Insert or update a repository from configuration, keyed by address.
    ///
    /// Updates the enabled/peer flags, display name and pinned fingerprint;
    /// never deletes a repository and never touches a trusted certificate.
    async fn import_repository(&self, config: &RepoConfig) -> Result<Repository, CatalogError>;

    /// Replace any previous staging area with a snapshot of the canonical tables.
    async fn begin_staging(&self) -> Result<(), CatalogError>;

    /// Remove every package of `repo` from the staging area.
    async fn stage_remove_repository(&self, repo: RepoId) -> Result<(), CatalogError>;

    /// Upsert an application and its packages into the staging area.
    async fn stage_application(
        &self,
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    ) -> Result<(), CatalogError>;

    /// Atomically replace the canonical tables with the staging area and
    /// store `repo`'s synchronization metadata (certificate, ETag, index hash).
    ///
    /// The swap and the repository write land together or not at all. On
    /// failure the canonical tables and the repository row are unchanged and
    /// the staging area is left open for the caller to discard.
    async fn commit_staging(&self, repo: &Repository) -> Result<(), CatalogError>;

    /// Drop the staging area, if any.
    async fn discard_staging(&self) -> Result<(), CatalogError>;

    /// Delete every package of `repo`. Returns the number removed.
    ///
    /// Also forgets the repository's ETag and index hash: they describe
    /// content that is no longer in the catalog, so the next fetch must
    /// download and apply the full index.
    async fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, CatalogError>;

    /// Delete applications with no remaining packages. Returns the number removed.
    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError>;

    /// Recompute compatibility flags and suggested versions for the whole catalog.
    async fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), CatalogError>;

    /// Installed applications whose suggested version is newer than the installed one.
    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError>;

    /// Time of the last completed run.
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError>;

    /// Record the time of a completed run.
    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), CatalogError>;
}

#[async_trait]
impl<T: Catalog + ?Sized> Catalog for std::sync::Arc<T> {
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        (**self).list_repositories().await
    }
    async fn import_repository(&self, config: &RepoConfig) -> Result<Repository, CatalogError> {
        (**self).import_repository(config).await
    }
    async fn begin_staging(&self) -> Result<(), CatalogError> {
        (**self).begin_staging().await
    }
    async fn stage_remove_repository(&self, repo: RepoId) -> Result<(), CatalogError> {
        (**self).stage_remove_repository(repo).await
    }
    async fn stage_application(
        &self,
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    ) -> Result<(), CatalogError> {
        (**self).stage_application(app, packages).await
    }
    async fn commit_staging(&self, repo: &Repository) -> Result<(), CatalogError> {
        (**self).commit_staging(repo).await
    }
    async fn discard_staging(&self) -> Result<(), CatalogError> {
        (**self).discard_staging().await
    }
    async fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, CatalogError> {
        (**self).delete_packages_by_repository(repo).await
    }
    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError> {
        (**self).delete_applications_without_packages().await
    }
    async fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), CatalogError> {
        (**self).recompute_derived_fields(device).await
    }
    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError> {
        (**self).updatable_applications().await
    }
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        (**self).last_run().await
    }
    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), CatalogError> {
        (**self).set_last_run(at).await
    }
}
