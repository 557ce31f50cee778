use serde::Serialize;

/// What happened to one repository during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum RepoOutcome {
    /// New index content was committed.
    Updated,
    /// Nothing to do: not modified, identical content, or excluded by a filter.
    Unchanged,
    /// The repository is disabled; its packages are purged if the run changed anything.
    Disabled,
    /// The repository failed; the catalog kept its previous content.
    Failed(String),
}

/// One repository's line in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoResult {
    /// Repository address.
    pub address: String,
    /// Its outcome.
    #[serde(flatten)]
    pub outcome: RepoOutcome,
}

/// Aggregated result of a run, in repository order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Per-repository outcomes. Peer repositories skipped by a batch run are absent.
    pub repositories: Vec<RepoResult>,
}

impl SyncReport {
    pub(crate) fn push(&mut self, address: &str, outcome: RepoOutcome) {
        self.repositories.push(RepoResult {
            address: address.to_string(),
            outcome,
        });
    }

    /// At least one repository committed new content.
    pub fn changed(&self) -> bool {
        self.repositories
            .iter()
            .any(|r| r.outcome == RepoOutcome::Updated)
    }

    /// Error messages prefixed with their repository address.
    pub fn errors(&self) -> Vec<String> {
        self.repositories
            .iter()
            .filter_map(|r| match &r.outcome {
                RepoOutcome::Failed(msg) => Some(format!("{}: {msg}", r.address)),
                _ => None,
            })
            .collect()
    }

    /// Repositories that ended updated or unchanged.
    pub fn succeeded(&self) -> usize {
        self.repositories
            .iter()
            .filter(|r| matches!(r.outcome, RepoOutcome::Updated | RepoOutcome::Unchanged))
            .count()
    }

    /// The single status for the whole run.
    pub fn status(&self) -> SyncStatus {
        let errors = self.errors();
        if errors.is_empty() {
            if self.changed() {
                SyncStatus::CompleteWithChanges
            } else {
                SyncStatus::CompleteAndUnchanged
            }
        } else if self.succeeded() == 0 {
            SyncStatus::ErrorLocalAll(errors)
        } else {
            SyncStatus::ErrorLocalPartial(errors)
        }
    }
}

/// Status surface consumed by presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Every repository succeeded and at least one changed.
    CompleteWithChanges,
    /// Every repository succeeded and nothing changed.
    CompleteAndUnchanged,
    /// The run aborted on a fault outside any single repository.
    ErrorGlobal(String),
    /// Every repository failed.
    ErrorLocalAll(Vec<String>),
    /// Some repositories failed; the rest were fine.
    ErrorLocalPartial(Vec<String>),
    /// Progress information.
    Info(String),
}

impl SyncStatus {
    /// Whether this status should fail a command-line invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ErrorGlobal(_) | Self::ErrorLocalAll(_))
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompleteWithChanges => write!(f, "Catalog updated"),
            Self::CompleteAndUnchanged => write!(f, "All repositories up to date"),
            Self::ErrorGlobal(msg) => write!(f, "Update failed: {msg}"),
            Self::ErrorLocalAll(errors) => write!(f, "Update failed: {}", errors.join("; ")),
            Self::ErrorLocalPartial(errors) => {
                write!(f, "{} (all other repositories fine)", errors.join("; "))
            }
            Self::Info(msg) => write!(f, "{msg}"),
        }
    }
}
