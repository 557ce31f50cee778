use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

use crate::hash::HashAlgorithm;

/// Catalog identifier of a configured repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(i64);

impl RepoId {
    /// Wrap a raw catalog row id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Return the raw catalog row id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable application identifier (e.g. `org.fdroid.fdroid`).
///
/// Unlike package names elsewhere, identifiers are case-sensitive and stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Create a new identifier from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty (the `id` attribute was missing).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for AppId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AppId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for AppId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AppId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A parsed comma-separated tag set (`permissions`, `categories`, `nativecode`, ...).
///
/// Order is preserved as declared; empty items are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TagList(Vec<String>);

impl TagList {
    /// Parse a comma-separated list. Returns `None` when no non-empty item remains.
    ///
    /// # Example
    ///
    /// ```
    /// use reposync_schema::TagList;
    ///
    /// let tags = TagList::parse("INTERNET, CAMERA,,").unwrap();
    /// assert_eq!(tags.as_slice(), ["INTERNET", "CAMERA"]);
    /// assert!(TagList::parse(" , ").is_none());
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let items: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect();
        if items.is_empty() { None } else { Some(Self(items)) }
    }

    /// Return the tags as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if `tag` is a member of this set.
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    /// Serialize back to the comma-separated wire form.
    pub fn to_joined(&self) -> String {
        self.0.join(",")
    }
}

impl std::fmt::Display for TagList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_joined())
    }
}

/// A configured package repository.
///
/// Created by configuration import and mutated only by a successful,
/// trust-verified synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Stable catalog id.
    pub id: RepoId,
    /// Network address of the repository (index is fetched relative to it).
    pub address: String,
    /// Display name, as last declared by the index.
    pub name: Option<String>,
    /// Display description, as last declared by the index.
    pub description: Option<String>,
    /// Signing certificate trusted on first successful sync. Never changed afterwards.
    pub signing_cert: Option<String>,
    /// Fingerprint pinned by configuration, checked before first trust.
    pub pinned_fingerprint: Option<String>,
    /// Index format version declared by the last synced index (-1 when unknown).
    pub format_version: i32,
    /// Maximum index age in days declared by the repository (-1 when unknown).
    pub max_age: i32,
    /// Disabled repositories are skipped and their packages purged.
    pub enabled: bool,
    /// Ephemeral peer repositories are excluded from unfiltered batch runs.
    pub peer: bool,
    /// HTTP entity tag of the last fetched index.
    pub etag: Option<String>,
    /// SHA-256 of the last applied index document.
    pub index_hash: Option<String>,
    /// When the repository was last changed by a sync.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Repository {
    /// Create an enabled repository with no trust established yet.
    pub fn new(id: RepoId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            name: None,
            description: None,
            signing_cert: None,
            pinned_fingerprint: None,
            format_version: -1,
            max_age: -1,
            enabled: true,
            peer: false,
            etag: None,
            index_hash: None,
            last_updated: None,
        }
    }

    /// Label used in logs and error messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Repository-level metadata captured from the outer index element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    /// Repository display name (whitespace collapsed).
    pub name: Option<String>,
    /// Repository description (whitespace collapsed).
    pub description: Option<String>,
    /// Signing certificate declared by the `pubkey` attribute.
    pub signing_cert: Option<String>,
    /// Declared maximum index age (-1 when absent or malformed).
    pub max_age: i32,
    /// Declared index format version (-1 when absent or malformed).
    pub format_version: i32,
}

/// An application declared by a repository index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationRecord {
    /// Unique application identifier.
    pub id: AppId,
    /// Display name.
    pub name: Option<String>,
    /// One-line summary.
    pub summary: Option<String>,
    /// Long description (HTML fragment).
    pub description: Option<String>,
    /// Icon file name relative to the repository icon directory.
    pub icon: Option<String>,
    /// License identifier.
    pub license: Option<String>,
    /// Project website.
    pub web_url: Option<String>,
    /// Source code location.
    pub source_url: Option<String>,
    /// Issue tracker.
    pub tracker_url: Option<String>,
    /// Changelog location.
    pub changelog_url: Option<String>,
    /// Donation page.
    pub donate_url: Option<String>,
    /// Bitcoin donation address.
    pub bitcoin_addr: Option<String>,
    /// Litecoin donation address.
    pub litecoin_addr: Option<String>,
    /// Dogecoin donation address.
    pub dogecoin_addr: Option<String>,
    /// Flattr identifier.
    pub flattr_id: Option<String>,
    /// Category tags.
    pub categories: Option<TagList>,
    /// Anti-feature tags.
    pub anti_features: Option<TagList>,
    /// Runtime requirements (e.g. `root`).
    pub requirements: Option<TagList>,
    /// When the application was first added to the repository.
    pub added: Option<NaiveDate>,
    /// When the application was last updated in the repository.
    pub last_updated: Option<NaiveDate>,
    /// Upstream version name hint.
    pub upstream_version: Option<String>,
    /// Upstream version code hint (-1 when absent or malformed).
    pub upstream_vercode: i32,
}

impl ApplicationRecord {
    /// Start a record seeded with its identifier.
    pub fn new(id: impl Into<AppId>) -> Self {
        Self {
            id: id.into(),
            upstream_vercode: -1,
            ..Self::default()
        }
    }
}

/// One concrete installable build of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Owning application.
    pub app_id: AppId,
    /// Owning repository.
    pub repo_id: RepoId,
    /// Human-readable version string.
    pub version: Option<String>,
    /// Monotonic version code (-1 when absent or malformed).
    pub vercode: i32,
    /// File size in bytes (0 when absent or malformed).
    pub size: i64,
    /// Content hash, hex encoded.
    pub hash: Option<String>,
    /// Algorithm of [`Self::hash`].
    pub hash_type: Option<HashAlgorithm>,
    /// Detached signature value.
    pub sig: Option<String>,
    /// Source tarball file name.
    pub src_name: Option<String>,
    /// Package file name.
    pub apk_name: Option<String>,
    /// Minimum platform version (0 when unbounded).
    pub min_sdk: i32,
    /// Maximum platform version (0 when unbounded).
    pub max_sdk: i32,
    /// When the build was added.
    pub added: Option<NaiveDate>,
    /// Requested permissions.
    pub permissions: Option<TagList>,
    /// Required hardware features.
    pub features: Option<TagList>,
    /// Native code ABIs.
    pub native_code: Option<TagList>,
}

impl PackageRecord {
    /// Start a record owned by the given application and repository.
    pub fn new(app_id: AppId, repo_id: RepoId) -> Self {
        Self {
            app_id,
            repo_id,
            version: None,
            vercode: -1,
            size: 0,
            hash: None,
            hash_type: None,
            sig: None,
            src_name: None,
            apk_name: None,
            min_sdk: 0,
            max_sdk: 0,
            added: None,
            permissions: None,
            features: None,
            native_code: None,
        }
    }
}
