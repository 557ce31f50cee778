//! In-memory [`Catalog`] used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_schema::{AppId, ApplicationRecord, PackageRecord, RepoId, Repository};
use tokio::sync::Mutex;

use super::derived::{is_compatible, suggested_vercode};
use super::{Catalog, CatalogError, UpdateCandidate};
use crate::config::{DeviceProfile, RepoConfig};

/// An application row with its derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredApp {
    /// The record as last declared by an index.
    pub record: ApplicationRecord,
    /// At least one package is compatible with the device.
    pub compatible: bool,
    /// Suggested version code, if any package is compatible.
    pub suggested_vercode: Option<i32>,
}

/// A package row with its derived compatibility flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPackage {
    /// The record as last declared by an index.
    pub record: PackageRecord,
    /// Runs on the configured device.
    pub compatible: bool,
}

/// Packages are unique per application, version code and repository.
type PackageKey = (AppId, i32, RepoId);

/// The application and package tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Applications by identifier.
    pub apps: BTreeMap<AppId, StoredApp>,
    packages: BTreeMap<PackageKey, StoredPackage>,
}

impl CatalogSnapshot {
    /// Packages in key order.
    pub fn packages(&self) -> impl Iterator<Item = &StoredPackage> {
        self.packages.values()
    }

    /// Packages belonging to `app`.
    pub fn packages_of<'a>(&'a self, app: &'a str) -> impl Iterator<Item = &'a StoredPackage> {
        self.packages
            .values()
            .filter(move |p| p.record.app_id.as_str() == app)
    }

    /// Number of packages.
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<RepoId, Repository>,
    canonical: CatalogSnapshot,
    staged: Option<CatalogSnapshot>,
    installed: HashMap<AppId, i32>,
    last_run: Option<DateTime<Utc>>,
    next_id: i64,
}

/// A [`Catalog`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the canonical tables.
    pub async fn snapshot(&self) -> CatalogSnapshot {
        self.state.lock().await.canonical.clone()
    }

    /// Look up a repository by address.
    pub async fn repository(&self, address: &str) -> Option<Repository> {
        let state = self.state.lock().await;
        state.repos.values().find(|r| r.address == address).cloned()
    }

    /// Record that `app` is installed at `vercode`.
    pub async fn set_installed(&self, app: impl Into<AppId>, vercode: i32) {
        self.state.lock().await.installed.insert(app.into(), vercode);
    }

    /// Whether a staging area is currently open.
    pub async fn is_staging(&self) -> bool {
        self.state.lock().await.staged.is_some()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        Ok(self.state.lock().await.repos.values().cloned().collect())
    }

    async fn import_repository(&self, config: &RepoConfig) -> Result<Repository, CatalogError> {
        let mut state = self.state.lock().await;
        let address = config.normalized_address();

        if let Some(repo) = state.repos.values_mut().find(|r| r.address == address) {
            repo.enabled = config.enabled;
            repo.peer = config.peer;
            repo.pinned_fingerprint.clone_from(&config.fingerprint);
            if config.name.is_some() {
                repo.name.clone_from(&config.name);
            }
            return Ok(repo.clone());
        }

        state.next_id += 1;
        let mut repo = Repository::new(RepoId::new(state.next_id), address);
        repo.enabled = config.enabled;
        repo.peer = config.peer;
        repo.name.clone_from(&config.name);
        repo.pinned_fingerprint.clone_from(&config.fingerprint);
        state.repos.insert(repo.id, repo.clone());
        Ok(repo)
    }

    async fn begin_staging(&self) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        state.staged = Some(state.canonical.clone());
        Ok(())
    }

    async fn stage_remove_repository(&self, repo: RepoId) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        let staged = state.staged.as_mut().ok_or(CatalogError::NotStaging)?;
        staged.packages.retain(|(_, _, r), _| *r != repo);
        Ok(())
    }

    async fn stage_application(
        &self,
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        let staged = state.staged.as_mut().ok_or(CatalogError::NotStaging)?;

        for record in packages {
            let key = (record.app_id.clone(), record.vercode, record.repo_id);
            staged.packages.insert(
                key,
                StoredPackage {
                    record,
                    compatible: false,
                },
            );
        }

        let previous = staged.apps.remove(&app.id);
        staged.apps.insert(
            app.id.clone(),
            StoredApp {
                record: app,
                compatible: previous.as_ref().is_some_and(|p| p.compatible),
                suggested_vercode: previous.and_then(|p| p.suggested_vercode),
            },
        );
        Ok(())
    }

    async fn commit_staging(&self, repo: &Repository) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        if state.staged.is_none() {
            return Err(CatalogError::NotStaging);
        }
        if !state.repos.contains_key(&repo.id) {
            return Err(CatalogError::UnknownRepository(repo.id));
        }
        state.repos.insert(repo.id, repo.clone());
        if let Some(staged) = state.staged.take() {
            state.canonical = staged;
        }
        Ok(())
    }

    async fn discard_staging(&self) -> Result<(), CatalogError> {
        self.state.lock().await.staged = None;
        Ok(())
    }

    async fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, CatalogError> {
        let mut state = self.state.lock().await;
        let before = state.canonical.packages.len();
        state.canonical.packages.retain(|(_, _, r), _| *r != repo);
        if let Some(stored) = state.repos.get_mut(&repo) {
            stored.etag = None;
            stored.index_hash = None;
        }
        Ok(before - state.canonical.packages.len())
    }

    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError> {
        let mut state = self.state.lock().await;
        let canonical = &mut state.canonical;
        let before = canonical.apps.len();
        let packages = &canonical.packages;
        canonical
            .apps
            .retain(|id, _| packages.keys().any(|(app, _, _)| app == id));
        Ok(before - canonical.apps.len())
    }

    async fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        let canonical = &mut state.canonical;

        for pkg in canonical.packages.values_mut() {
            let r = &pkg.record;
            pkg.compatible = is_compatible(r.min_sdk, r.max_sdk, r.native_code.as_ref(), device);
        }

        for (id, app) in &mut canonical.apps {
            let compatible: Vec<i32> = canonical
                .packages
                .values()
                .filter(|p| p.compatible && p.record.app_id == *id)
                .map(|p| p.record.vercode)
                .collect();
            app.compatible = !compatible.is_empty();
            app.suggested_vercode = suggested_vercode(app.record.upstream_vercode, compatible);
        }
        Ok(())
    }

    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError> {
        let state = self.state.lock().await;
        let mut updates: Vec<UpdateCandidate> = state
            .installed
            .iter()
            .filter_map(|(id, &installed)| {
                let app = state.canonical.apps.get(id)?;
                let suggested = app.suggested_vercode?;
                (suggested > installed).then(|| UpdateCandidate {
                    app_id: id.clone(),
                    name: app.record.name.clone(),
                    installed_vercode: installed,
                    suggested_vercode: suggested,
                })
            })
            .collect();
        updates.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Ok(updates)
    }

    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        Ok(self.state.lock().await.last_run)
    }

    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), CatalogError> {
        self.state.lock().await.last_run = Some(at);
        Ok(())
    }
}
