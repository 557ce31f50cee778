//! DB Actor - Thread-safe access to the catalog database
//!
//! SQLite connections are not `Sync`, and the staging area lives in
//! connection-local TEMP tables, so a single connection must serve every
//! catalog call of a run. The connection is hosted on a dedicated thread and
//! driven through message passing.

use std::fmt;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_core::catalog::{Catalog, CatalogError, UpdateCandidate};
use reposync_core::config::{DeviceProfile, RepoConfig};
use reposync_schema::{ApplicationRecord, PackageRecord, RepoId, Repository};
use tokio::sync::oneshot;

use super::db::{AppSummary, CatalogCounts, CatalogDb, DbError};

type Reply<T> = oneshot::Sender<Result<T, DbError>>;

/// Events that can be sent to the DB actor
pub enum DbEvent {
    /// List configured repositories
    ListRepositories { resp: Reply<Vec<Repository>> },
    /// Insert or update a repository from configuration
    ImportRepository {
        config: RepoConfig,
        resp: Reply<Repository>,
    },
    /// Open a fresh staging area
    BeginStaging { resp: Reply<()> },
    /// Drop a repository's packages from the staging area
    StageRemoveRepository { repo: RepoId, resp: Reply<()> },
    /// Upsert an application with its packages into the staging area
    StageApplication {
        app: Box<ApplicationRecord>,
        packages: Vec<PackageRecord>,
        resp: Reply<()>,
    },
    /// Swap the staging area in and store the repository's sync metadata
    CommitStaging {
        repo: Box<Repository>,
        resp: Reply<()>,
    },
    /// Drop the staging area
    DiscardStaging { resp: Reply<()> },
    /// Delete a repository's packages
    DeletePackagesByRepository { repo: RepoId, resp: Reply<usize> },
    /// Delete applications with no packages
    DeleteOrphanApplications { resp: Reply<usize> },
    /// Recompute compatibility and suggested versions
    RecomputeDerived {
        device: DeviceProfile,
        resp: Reply<()>,
    },
    /// Installed applications with newer suggested versions
    UpdatableApplications { resp: Reply<Vec<UpdateCandidate>> },
    /// Time of the last completed run
    GetLastRun {
        resp: Reply<Option<DateTime<Utc>>>,
    },
    /// Record a completed run
    SetLastRun { at: DateTime<Utc>, resp: Reply<()> },
    /// Record an installed application version
    SetInstalled {
        app: String,
        vercode: i32,
        resp: Reply<()>,
    },
    /// Application and package counts
    Counts { resp: Reply<CatalogCounts> },
    /// Look up one application
    GetApplication {
        id: String,
        resp: Reply<Option<AppSummary>>,
    },
    /// Shutdown the actor
    Shutdown,
}

impl fmt::Debug for DbEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListRepositories { .. } => write!(f, "ListRepositories"),
            Self::ImportRepository { config, .. } => f
                .debug_struct("ImportRepository")
                .field("address", &config.address)
                .finish_non_exhaustive(),
            Self::BeginStaging { .. } => write!(f, "BeginStaging"),
            Self::StageRemoveRepository { repo, .. } => f
                .debug_struct("StageRemoveRepository")
                .field("repo", repo)
                .finish_non_exhaustive(),
            Self::StageApplication { app, packages, .. } => f
                .debug_struct("StageApplication")
                .field("app", &app.id)
                .field("packages", &packages.len())
                .finish_non_exhaustive(),
            Self::CommitStaging { repo, .. } => f
                .debug_struct("CommitStaging")
                .field("repo", &repo.id)
                .finish_non_exhaustive(),
            Self::DiscardStaging { .. } => write!(f, "DiscardStaging"),
            Self::DeletePackagesByRepository { repo, .. } => f
                .debug_struct("DeletePackagesByRepository")
                .field("repo", repo)
                .finish_non_exhaustive(),
            Self::DeleteOrphanApplications { .. } => write!(f, "DeleteOrphanApplications"),
            Self::RecomputeDerived { device, .. } => f
                .debug_struct("RecomputeDerived")
                .field("sdk", &device.sdk)
                .finish_non_exhaustive(),
            Self::UpdatableApplications { .. } => write!(f, "UpdatableApplications"),
            Self::GetLastRun { .. } => write!(f, "GetLastRun"),
            Self::SetLastRun { at, .. } => f
                .debug_struct("SetLastRun")
                .field("at", at)
                .finish_non_exhaustive(),
            Self::SetInstalled { app, vercode, .. } => f
                .debug_struct("SetInstalled")
                .field("app", app)
                .field("vercode", vercode)
                .finish_non_exhaustive(),
            Self::Counts { .. } => write!(f, "Counts"),
            Self::GetApplication { id, .. } => f
                .debug_struct("GetApplication")
                .field("id", id)
                .finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A handle to the Database Actor that is Send + Sync and Clone.
#[derive(Clone)]
pub struct DbHandle {
    sender: mpsc::Sender<DbEvent>,
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle").finish_non_exhaustive()
    }
}

impl DbHandle {
    /// Spawn a new DB actor thread on the default catalog database
    pub fn spawn() -> Result<Self, DbError> {
        Ok(Self::start(CatalogDb::open()?))
    }

    /// Spawn a DB actor on the database at `path`
    pub fn spawn_at(path: &Path) -> Result<Self, DbError> {
        Ok(Self::start(CatalogDb::open_at(path)?))
    }

    fn start(db: CatalogDb) -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            run_db_event_loop(db, receiver);
        });
        Self { sender }
    }

    /// Helper to send a request and wait for the response
    async fn request<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(Reply<T>) -> DbEvent,
    {
        let (tx, rx) = oneshot::channel();
        self.sender.send(f(tx)).map_err(|_| DbError::ActorDied)?;
        rx.await.map_err(|_| DbError::ActorDied)?
    }

    /// Stop the actor thread once queued events are handled
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbEvent::Shutdown);
    }

    /// Record an installed application version
    pub async fn set_installed(&self, app: String, vercode: i32) -> Result<(), DbError> {
        self.request(|resp| DbEvent::SetInstalled { app, vercode, resp })
            .await
    }

    /// Application and package counts
    pub async fn counts(&self) -> Result<CatalogCounts, DbError> {
        self.request(|resp| DbEvent::Counts { resp }).await
    }

    /// Look up one application
    pub async fn get_application(&self, id: String) -> Result<Option<AppSummary>, DbError> {
        self.request(|resp| DbEvent::GetApplication { id, resp })
            .await
    }
}

impl From<DbError> for CatalogError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotStaging => Self::NotStaging,
            DbError::UnknownRepository(id) => Self::UnknownRepository(id),
            DbError::ActorDied => Self::Disconnected,
            DbError::Sqlite(e) => Self::Backend(e.to_string()),
            DbError::Io(e) => Self::Backend(e.to_string()),
        }
    }
}

#[async_trait]
impl Catalog for DbHandle {
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        Ok(self
            .request(|resp| DbEvent::ListRepositories { resp })
            .await?)
    }

    async fn import_repository(&self, config: &RepoConfig) -> Result<Repository, CatalogError> {
        let config = config.clone();
        Ok(self
            .request(|resp| DbEvent::ImportRepository { config, resp })
            .await?)
    }

    async fn begin_staging(&self) -> Result<(), CatalogError> {
        Ok(self.request(|resp| DbEvent::BeginStaging { resp }).await?)
    }

    async fn stage_remove_repository(&self, repo: RepoId) -> Result<(), CatalogError> {
        Ok(self
            .request(|resp| DbEvent::StageRemoveRepository { repo, resp })
            .await?)
    }

    async fn stage_application(
        &self,
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    ) -> Result<(), CatalogError> {
        let app = Box::new(app);
        Ok(self
            .request(|resp| DbEvent::StageApplication {
                app,
                packages,
                resp,
            })
            .await?)
    }

    async fn commit_staging(&self, repo: &Repository) -> Result<(), CatalogError> {
        let repo = Box::new(repo.clone());
        Ok(self
            .request(|resp| DbEvent::CommitStaging { repo, resp })
            .await?)
    }

    async fn discard_staging(&self) -> Result<(), CatalogError> {
        Ok(self.request(|resp| DbEvent::DiscardStaging { resp }).await?)
    }

    async fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, CatalogError> {
        Ok(self
            .request(|resp| DbEvent::DeletePackagesByRepository { repo, resp })
            .await?)
    }

    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError> {
        Ok(self
            .request(|resp| DbEvent::DeleteOrphanApplications { resp })
            .await?)
    }

    async fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), CatalogError> {
        let device = device.clone();
        Ok(self
            .request(|resp| DbEvent::RecomputeDerived { device, resp })
            .await?)
    }

    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError> {
        Ok(self
            .request(|resp| DbEvent::UpdatableApplications { resp })
            .await?)
    }

    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        Ok(self.request(|resp| DbEvent::GetLastRun { resp }).await?)
    }

    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), CatalogError> {
        Ok(self
            .request(|resp| DbEvent::SetLastRun { at, resp })
            .await?)
    }
}

/// The actual event loop running in the background thread
// The db and receiver are moved into this thread for exclusive ownership.
#[allow(clippy::needless_pass_by_value)]
fn run_db_event_loop(db: CatalogDb, receiver: mpsc::Receiver<DbEvent>) {
    while let Ok(event) = receiver.recv() {
        match event {
            DbEvent::ListRepositories { resp } => {
                let _ = resp.send(db.list_repositories());
            }
            DbEvent::ImportRepository { config, resp } => {
                let _ = resp.send(db.import_repository(&config));
            }
            DbEvent::BeginStaging { resp } => {
                let _ = resp.send(db.begin_staging());
            }
            DbEvent::StageRemoveRepository { repo, resp } => {
                let _ = resp.send(db.stage_remove_repository(repo));
            }
            DbEvent::StageApplication {
                app,
                packages,
                resp,
            } => {
                let _ = resp.send(db.stage_application(&app, &packages));
            }
            DbEvent::CommitStaging { repo, resp } => {
                let _ = resp.send(db.commit_staging(&repo));
            }
            DbEvent::DiscardStaging { resp } => {
                let _ = resp.send(db.discard_staging());
            }
            DbEvent::DeletePackagesByRepository { repo, resp } => {
                let _ = resp.send(db.delete_packages_by_repository(repo));
            }
            DbEvent::DeleteOrphanApplications { resp } => {
                let _ = resp.send(db.delete_applications_without_packages());
            }
            DbEvent::RecomputeDerived { device, resp } => {
                let _ = resp.send(db.recompute_derived_fields(&device));
            }
            DbEvent::UpdatableApplications { resp } => {
                let _ = resp.send(db.updatable_applications());
            }
            DbEvent::GetLastRun { resp } => {
                let _ = resp.send(db.last_run());
            }
            DbEvent::SetLastRun { at, resp } => {
                let _ = resp.send(db.set_last_run(at));
            }
            DbEvent::SetInstalled { app, vercode, resp } => {
                let _ = resp.send(db.set_installed(&app, vercode));
            }
            DbEvent::Counts { resp } => {
                let _ = resp.send(db.counts());
            }
            DbEvent::GetApplication { id, resp } => {
                let _ = resp.send(db.get_application(&id));
            }
            DbEvent::Shutdown => break,
        }
    }
}
