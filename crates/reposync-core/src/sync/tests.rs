use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reposync_schema::{AppId, ApplicationRecord, PackageRecord};

use super::*;
use crate::catalog::{MemoryCatalog, UpdateCandidate};
use crate::config::RepoConfig;
use crate::reporter::NullReporter;

const A: &str = "https://a.example/repo";
const B: &str = "https://b.example/repo";
const C: &str = "https://c.example/repo";

/// Serves canned index documents, split into small chunks.
#[derive(Default)]
struct StaticFetcher {
    indexes: Mutex<HashMap<String, Result<String, u16>>>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    fn serve(&self, address: &str, xml: String) {
        self.indexes
            .lock()
            .unwrap()
            .insert(address.to_string(), Ok(xml));
    }

    fn fail(&self, address: &str, status: u16) {
        self.indexes
            .lock()
            .unwrap()
            .insert(address.to_string(), Err(status));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexFetcher for StaticFetcher {
    async fn fetch(&self, repo: &Repository) -> Result<FetchOutcome, DownloadError> {
        self.calls.lock().unwrap().push(repo.address.clone());
        let entry = self.indexes.lock().unwrap().get(&repo.address).cloned();
        match entry {
            Some(Ok(xml)) => {
                let total = xml.len() as u64;
                let chunks: Vec<std::io::Result<Bytes>> = xml
                    .as_bytes()
                    .chunks(5)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(FetchOutcome::Fetched(IndexBody {
                    stream: Box::pin(futures::stream::iter(chunks)),
                    total: Some(total),
                    etag: None,
                }))
            }
            Some(Err(status)) => Err(DownloadError::Status {
                status,
                url: repo.address.clone(),
            }),
            None => Err(DownloadError::Status {
                status: 404,
                url: repo.address.clone(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingReporter {
    statuses: Mutex<Vec<SyncStatus>>,
    progress: Mutex<Vec<(String, u64)>>,
    updates: Mutex<Vec<UpdateCandidate>>,
    changed: Mutex<usize>,
}

impl SyncReporter for RecordingReporter {
    fn status(&self, status: &SyncStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
    fn progress(&self, address: &str, bytes_read: u64, _total: Option<u64>) {
        self.progress
            .lock()
            .unwrap()
            .push((address.to_string(), bytes_read));
    }
    fn catalog_changed(&self) {
        *self.changed.lock().unwrap() += 1;
    }
    fn updates_available(&self, updates: &[UpdateCandidate]) {
        self.updates.lock().unwrap().extend_from_slice(updates);
    }
}

impl RecordingReporter {
    fn last_status(&self) -> Option<SyncStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

fn index(pubkey: &str, apps: &[(&str, &[i32])]) -> String {
    let mut xml = format!(r#"<?xml version="1.0"?><repo name="Test" pubkey="{pubkey}" version="12" maxage="14">"#);
    for (id, codes) in apps {
        xml.push_str(&format!(r#"<application id="{id}"><name>{id}</name>"#));
        for code in *codes {
            xml.push_str(&format!(
                "<package><versioncode>{code}</versioncode><hash type=\"sha256\">h{code}</hash></package>"
            ));
        }
        xml.push_str("</application>");
    }
    xml.push_str("</repo>");
    xml
}

type TestSync = Synchronizer<Arc<MemoryCatalog>, Arc<StaticFetcher>, Arc<RecordingReporter>>;

struct Harness {
    catalog: Arc<MemoryCatalog>,
    fetcher: Arc<StaticFetcher>,
    reporter: Arc<RecordingReporter>,
    sync: TestSync,
}

async fn harness(addresses: &[&str]) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    for address in addresses {
        catalog
            .import_repository(&RepoConfig::new(*address))
            .await
            .unwrap();
    }
    let fetcher = Arc::new(StaticFetcher::default());
    let reporter = Arc::new(RecordingReporter::default());
    let sync = Synchronizer::new(
        catalog.clone(),
        fetcher.clone(),
        reporter.clone(),
        SyncOptions {
            notify: true,
            ..SyncOptions::default()
        },
    );
    Harness {
        catalog,
        fetcher,
        reporter,
        sync,
    }
}

fn outcome_of<'a>(report: &'a SyncReport, address: &str) -> &'a RepoOutcome {
    &report
        .repositories
        .iter()
        .find(|r| r.address == address)
        .unwrap()
        .outcome
}

#[tokio::test]
async fn first_run_commits_and_trusts() {
    let h = harness(&[A]).await;
    h.fetcher.serve(A, index("3082AA", &[("org.x", &[1, 2])]));

    let report = h.sync.run(None).await.unwrap();

    assert_eq!(report.status(), SyncStatus::CompleteWithChanges);
    let repo = h.catalog.repository(A).await.unwrap();
    assert_eq!(repo.signing_cert.as_deref(), Some("3082AA"));
    assert_eq!(repo.name.as_deref(), Some("Test"));
    assert_eq!(repo.format_version, 12);
    assert_eq!(repo.max_age, 14);
    assert!(repo.index_hash.is_some());
    assert!(repo.last_updated.is_some());

    let snap = h.catalog.snapshot().await;
    assert_eq!(snap.packages_of("org.x").count(), 2);
    assert!(snap.apps[&AppId::new("org.x")].compatible);
    assert!(h.catalog.last_run().await.unwrap().is_some());
    assert_eq!(*h.reporter.changed.lock().unwrap(), 1);
    assert_eq!(
        h.reporter.last_status(),
        Some(SyncStatus::CompleteWithChanges)
    );
}

#[tokio::test]
async fn second_run_against_same_index_is_unchanged() {
    let h = harness(&[A]).await;
    h.fetcher.serve(A, index("3082AA", &[("org.x", &[1]), ("org.y", &[4])]));

    h.sync.run(None).await.unwrap();
    let after_first = h.catalog.snapshot().await;
    let repo_after_first = h.catalog.repository(A).await.unwrap();

    let report = h.sync.run(None).await.unwrap();

    assert_eq!(report.status(), SyncStatus::CompleteAndUnchanged);
    assert_eq!(h.catalog.snapshot().await, after_first);
    assert_eq!(h.catalog.repository(A).await.unwrap(), repo_after_first);
    assert!(!h.catalog.is_staging().await);
    assert_eq!(*h.reporter.changed.lock().unwrap(), 1);
}

#[tokio::test]
async fn one_failure_among_three_is_partial() {
    let h = harness(&[A, B, C]).await;
    h.fetcher.serve(A, index("AA", &[("org.a", &[1])]));
    h.fetcher.serve(B, index("BB", &[("org.b", &[1])]));
    h.fetcher.serve(C, index("CC", &[("org.c", &[1])]));
    h.sync.run(None).await.unwrap();

    h.fetcher.fail(B, 503);
    let report = h.sync.run(None).await.unwrap();

    assert!(!report.changed());
    assert_eq!(report.errors().len(), 1);
    assert!(matches!(report.status(), SyncStatus::ErrorLocalPartial(ref e) if e.len() == 1));
    assert!(matches!(outcome_of(&report, B), RepoOutcome::Failed(_)));
    // Previously committed content of the failing repository survives.
    assert_eq!(h.catalog.snapshot().await.packages_of("org.b").count(), 1);
}

#[tokio::test]
async fn every_repository_failing_is_error_local_all() {
    let h = harness(&[A, B]).await;
    h.fetcher.fail(A, 500);

    let report = h.sync.run(None).await.unwrap();

    let SyncStatus::ErrorLocalAll(errors) = report.status() else {
        panic!("expected all repositories to fail");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with(A));
    assert!(h.catalog.last_run().await.unwrap().is_some());
}

#[tokio::test]
async fn changed_certificate_is_rejected_and_not_stored() {
    let h = harness(&[A]).await;
    h.fetcher.serve(A, index("3082AA", &[("org.x", &[1])]));
    h.sync.run(None).await.unwrap();
    let before = h.catalog.snapshot().await;

    h.fetcher.serve(A, index("3082BB", &[("org.x", &[1, 2]), ("org.evil", &[1])]));
    let report = h.sync.run(None).await.unwrap();

    let RepoOutcome::Failed(message) = outcome_of(&report, A) else {
        panic!("expected a trust failure");
    };
    assert!(message.contains("certificate changed"), "{message}");
    let repo = h.catalog.repository(A).await.unwrap();
    assert_eq!(repo.signing_cert.as_deref(), Some("3082AA"));
    assert_eq!(h.catalog.snapshot().await, before);
    assert!(!h.catalog.is_staging().await);
}

#[tokio::test]
async fn missing_certificate_fails_repository() {
    let h = harness(&[A]).await;
    h.fetcher
        .serve(A, r#"<repo><application id="org.x"/></repo>"#.to_string());

    let report = h.sync.run(None).await.unwrap();

    assert!(matches!(outcome_of(&report, A), RepoOutcome::Failed(_)));
    assert!(h.catalog.snapshot().await.apps.is_empty());
}

#[tokio::test]
async fn malformed_document_leaves_catalog_untouched() {
    let h = harness(&[A]).await;
    h.fetcher.serve(A, index("AA", &[("org.x", &[1])]));
    h.sync.run(None).await.unwrap();
    let before = h.catalog.snapshot().await;

    h.fetcher.serve(
        A,
        r#"<repo pubkey="AA"><application id="org.x"></application><application id="org.y"><name>y</nam></application></repo>"#
            .to_string(),
    );
    let report = h.sync.run(None).await.unwrap();

    let RepoOutcome::Failed(message) = outcome_of(&report, A) else {
        panic!("expected a parse failure");
    };
    assert!(message.starts_with("Document parse failed"), "{message}");
    assert_eq!(h.catalog.snapshot().await, before);
}

#[tokio::test]
async fn packages_dropped_from_index_are_removed() {
    let h = harness(&[A]).await;
    h.fetcher
        .serve(A, index("AA", &[("org.x", &[1, 2]), ("org.gone", &[1])]));
    h.sync.run(None).await.unwrap();

    h.fetcher.serve(A, index("AA", &[("org.x", &[2, 3])]));
    h.sync.run(None).await.unwrap();

    let snap = h.catalog.snapshot().await;
    let codes: Vec<i32> = snap.packages_of("org.x").map(|p| p.record.vercode).collect();
    assert_eq!(codes, vec![2, 3]);
    assert!(!snap.apps.contains_key(&AppId::new("org.gone")));
}

#[tokio::test]
async fn disabled_repository_is_purged_on_changing_run() {
    let h = harness(&[A, B]).await;
    h.fetcher.serve(A, index("AA", &[("org.shared", &[1])]));
    h.fetcher
        .serve(B, index("BB", &[("org.shared", &[2]), ("org.only_b", &[1])]));
    h.sync.run(None).await.unwrap();

    let mut disable = RepoConfig::new(B);
    disable.enabled = false;
    h.catalog.import_repository(&disable).await.unwrap();
    h.fetcher.serve(A, index("AA", &[("org.shared", &[1, 5])]));

    let report = h.sync.run(None).await.unwrap();

    assert_eq!(outcome_of(&report, B), &RepoOutcome::Disabled);
    assert_eq!(report.status(), SyncStatus::CompleteWithChanges);
    let snap = h.catalog.snapshot().await;
    assert!(!snap.apps.contains_key(&AppId::new("org.only_b")));
    let codes: Vec<i32> = snap
        .packages_of("org.shared")
        .map(|p| p.record.vercode)
        .collect();
    assert_eq!(codes, vec![1, 5]);
    assert!(!h.fetcher.calls().iter().skip(2).any(|c| c == B));
}

#[tokio::test]
async fn reenabled_repository_restores_its_packages() {
    let h = harness(&[A, B]).await;
    h.fetcher.serve(A, index("AA", &[("org.shared", &[1])]));
    h.fetcher.serve(B, index("BB", &[("org.only_b", &[1])]));
    h.sync.run(None).await.unwrap();

    let mut config = RepoConfig::new(B);
    config.enabled = false;
    h.catalog.import_repository(&config).await.unwrap();
    h.fetcher.serve(A, index("AA", &[("org.shared", &[1, 2])]));
    h.sync.run(None).await.unwrap();
    assert_eq!(h.catalog.snapshot().await.packages_of("org.only_b").count(), 0);
    assert!(h.catalog.repository(B).await.unwrap().index_hash.is_none());

    config.enabled = true;
    h.catalog.import_repository(&config).await.unwrap();
    let report = h.sync.run(None).await.unwrap();

    assert_eq!(outcome_of(&report, B), &RepoOutcome::Updated);
    assert_eq!(h.catalog.snapshot().await.packages_of("org.only_b").count(), 1);
    // The certificate trusted before the repository was disabled still applies
    let repo = h.catalog.repository(B).await.unwrap();
    assert_eq!(repo.signing_cert.as_deref(), Some("BB"));
}

#[tokio::test]
async fn peers_only_sync_on_request_and_filter_counts_others_unchanged() {
    let h = harness(&[A]).await;
    let mut peer = RepoConfig::new(B);
    peer.peer = true;
    h.catalog.import_repository(&peer).await.unwrap();
    h.fetcher.serve(A, index("AA", &[("org.a", &[1])]));
    h.fetcher.serve(B, index("BB", &[("org.b", &[1])]));

    let batch = h.sync.run(None).await.unwrap();
    assert_eq!(batch.repositories.len(), 1);
    assert_eq!(h.fetcher.calls(), vec![A.to_string()]);

    let single = h.sync.run(Some(B)).await.unwrap();
    assert_eq!(outcome_of(&single, A), &RepoOutcome::Unchanged);
    assert_eq!(outcome_of(&single, B), &RepoOutcome::Updated);
    assert_eq!(h.fetcher.calls(), vec![A.to_string(), B.to_string()]);
}

#[tokio::test]
async fn progress_is_monotonic_per_repository() {
    let h = harness(&[A]).await;
    let xml = index("AA", &[("org.x", &[1, 2, 3])]);
    let len = xml.len() as u64;
    h.fetcher.serve(A, xml);

    h.sync.run(None).await.unwrap();

    let progress = h.reporter.progress.lock().unwrap().clone();
    assert!(progress.len() > 1);
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(progress.last().map(|p| p.1), Some(len));
}

#[tokio::test]
async fn updates_are_announced_for_installed_apps() {
    let h = harness(&[A]).await;
    h.catalog.set_installed("org.x", 1).await;
    h.fetcher.serve(A, index("AA", &[("org.x", &[1, 2])]));

    h.sync.run(None).await.unwrap();

    let updates = h.reporter.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].app_id, "org.x");
    assert_eq!(updates[0].suggested_vercode, 2);
}

#[tokio::test]
async fn cancellation_skips_remaining_and_last_run() {
    let h = harness(&[A, B]).await;
    h.fetcher.serve(A, index("AA", &[("org.a", &[1])]));
    let token = CancellationToken::new();
    token.cancel();
    let sync = Synchronizer::new(
        h.catalog.clone(),
        h.fetcher.clone(),
        h.reporter.clone(),
        SyncOptions::default(),
    )
    .with_cancellation(token);

    let err = sync.run(None).await.unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert!(h.fetcher.calls().is_empty());
    assert!(h.catalog.last_run().await.unwrap().is_none());
    assert!(matches!(
        h.reporter.last_status(),
        Some(SyncStatus::ErrorGlobal(_))
    ));
}

/// A catalog whose storage is unavailable.
struct BrokenCatalog;

fn broken<T>() -> Result<T, CatalogError> {
    Err(CatalogError::Backend("disk I/O error".to_string()))
}

#[async_trait]
impl Catalog for BrokenCatalog {
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        broken()
    }
    async fn import_repository(&self, _: &RepoConfig) -> Result<Repository, CatalogError> {
        broken()
    }
    async fn begin_staging(&self) -> Result<(), CatalogError> {
        broken()
    }
    async fn stage_remove_repository(&self, _: RepoId) -> Result<(), CatalogError> {
        broken()
    }
    async fn stage_application(
        &self,
        _: ApplicationRecord,
        _: Vec<PackageRecord>,
    ) -> Result<(), CatalogError> {
        broken()
    }
    async fn commit_staging(&self, _: &Repository) -> Result<(), CatalogError> {
        broken()
    }
    async fn discard_staging(&self) -> Result<(), CatalogError> {
        broken()
    }
    async fn delete_packages_by_repository(&self, _: RepoId) -> Result<usize, CatalogError> {
        broken()
    }
    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError> {
        broken()
    }
    async fn recompute_derived_fields(&self, _: &DeviceProfile) -> Result<(), CatalogError> {
        broken()
    }
    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError> {
        broken()
    }
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        broken()
    }
    async fn set_last_run(&self, _: DateTime<Utc>) -> Result<(), CatalogError> {
        broken()
    }
}

#[tokio::test]
async fn storage_fault_is_a_global_error() {
    let reporter = Arc::new(RecordingReporter::default());
    let sync = Synchronizer::new(
        BrokenCatalog,
        StaticFetcher::default(),
        reporter.clone(),
        SyncOptions::default(),
    );

    let err = sync.run(None).await.unwrap_err();

    assert!(matches!(err, SyncError::Catalog(_)));
    let Some(SyncStatus::ErrorGlobal(message)) = reporter.last_status() else {
        panic!("expected a global error status");
    };
    assert!(message.contains("disk I/O error"));
}

/// Wraps a [`MemoryCatalog`] whose commit always fails.
struct CommitFails(Arc<MemoryCatalog>);

#[async_trait]
impl Catalog for CommitFails {
    async fn list_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        self.0.list_repositories().await
    }
    async fn import_repository(&self, config: &RepoConfig) -> Result<Repository, CatalogError> {
        self.0.import_repository(config).await
    }
    async fn begin_staging(&self) -> Result<(), CatalogError> {
        self.0.begin_staging().await
    }
    async fn stage_remove_repository(&self, repo: RepoId) -> Result<(), CatalogError> {
        self.0.stage_remove_repository(repo).await
    }
    async fn stage_application(
        &self,
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    ) -> Result<(), CatalogError> {
        self.0.stage_application(app, packages).await
    }
    async fn commit_staging(&self, _: &Repository) -> Result<(), CatalogError> {
        broken()
    }
    async fn discard_staging(&self) -> Result<(), CatalogError> {
        self.0.discard_staging().await
    }
    async fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, CatalogError> {
        self.0.delete_packages_by_repository(repo).await
    }
    async fn delete_applications_without_packages(&self) -> Result<usize, CatalogError> {
        self.0.delete_applications_without_packages().await
    }
    async fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), CatalogError> {
        self.0.recompute_derived_fields(device).await
    }
    async fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, CatalogError> {
        self.0.updatable_applications().await
    }
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        self.0.last_run().await
    }
    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), CatalogError> {
        self.0.set_last_run(at).await
    }
}

#[tokio::test]
async fn failed_commit_leaves_catalog_and_trust_untouched() {
    let memory = Arc::new(MemoryCatalog::new());
    memory.import_repository(&RepoConfig::new(A)).await.unwrap();
    let fetcher = Arc::new(StaticFetcher::default());
    fetcher.serve(A, index("3082AA", &[("org.x", &[1])]));
    let sync = Synchronizer::new(
        CommitFails(memory.clone()),
        fetcher,
        NullReporter,
        SyncOptions::default(),
    );

    let report = sync.run(None).await.unwrap();

    let RepoOutcome::Failed(message) = outcome_of(&report, A) else {
        panic!("expected the commit failure to fail the repository");
    };
    assert!(message.contains("disk I/O error"), "{message}");
    assert!(matches!(report.status(), SyncStatus::ErrorLocalAll(_)));
    assert_eq!(memory.snapshot().await.package_count(), 0);
    assert!(!memory.is_staging().await);
    let repo = memory.repository(A).await.unwrap();
    assert!(repo.signing_cert.is_none());
    assert!(repo.index_hash.is_none());
}
