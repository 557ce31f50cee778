use crate::fields::{collapse_whitespace, parse_date, parse_int_or};
use crate::hash::HashAlgorithm;
use crate::types::{ApplicationRecord, PackageRecord, RepoId, RepositoryMetadata, TagList};

use super::IndexReceiver;

/// Structural position inside the document.
///
/// Records in progress live inside the state that owns them, so a partially
/// populated package can only escape through `</package>`.
#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    InApplication {
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
    },
    InPackage {
        app: ApplicationRecord,
        packages: Vec<PackageRecord>,
        package: PackageRecord,
        /// `type` attribute of the most recently opened `<hash>`.
        hash_type: Option<String>,
    },
}

/// Push-style state machine over index element events.
///
/// Single-threaded and non-reentrant: feed it events in document order.
#[derive(Debug)]
pub struct IndexParser {
    repo_id: RepoId,
    state: State,
    metadata: RepositoryMetadata,
    text: String,
}

impl IndexParser {
    /// Create a parser for the index of the given repository.
    ///
    /// Every package record is stamped with `repo_id`.
    pub fn new(repo_id: RepoId) -> Self {
        Self {
            repo_id,
            state: State::Idle,
            metadata: RepositoryMetadata {
                max_age: -1,
                format_version: -1,
                ..RepositoryMetadata::default()
            },
            text: String::new(),
        }
    }

    /// Returns `true` while an application element is open.
    pub fn in_application(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Handle an element opening. `attrs` are `(local name, unescaped value)` pairs.
    pub fn start_element(&mut self, name: &str, attrs: &[(String, String)]) {
        let state = std::mem::take(&mut self.state);
        self.state = match (name, state) {
            ("repo", state) => {
                self.capture_repo_attrs(attrs);
                state
            }
            ("application", State::Idle) => {
                let id = attr(attrs, "id").unwrap_or_default();
                State::InApplication {
                    app: ApplicationRecord::new(id),
                    packages: Vec::new(),
                }
            }
            ("package", State::InApplication { app, packages }) => State::InPackage {
                package: PackageRecord::new(app.id.clone(), self.repo_id),
                app,
                packages,
                hash_type: None,
            },
            (
                "hash",
                State::InPackage {
                    app,
                    packages,
                    package,
                    ..
                },
            ) => State::InPackage {
                app,
                packages,
                package,
                hash_type: attr(attrs, "type").map(ToString::to_string),
            },
            (_, state) => state,
        };
        self.text.clear();
    }

    /// Append character data to the current element's text.
    pub fn text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    /// Handle an element closing, emitting completed entities to `receiver`.
    pub fn end_element<R: IndexReceiver + ?Sized>(&mut self, name: &str, receiver: &mut R) {
        let value = self.text.trim().to_string();
        let state = std::mem::take(&mut self.state);

        self.state = match (name, state) {
            ("application", State::InApplication { app, packages }) => {
                receiver.on_application(app, packages);
                State::Idle
            }
            (
                "package",
                State::InPackage {
                    app,
                    mut packages,
                    package,
                    ..
                },
            ) => {
                packages.push(package);
                State::InApplication { app, packages }
            }
            ("repo", state) => {
                receiver.on_repository(self.metadata.clone());
                state
            }
            (
                field,
                State::InPackage {
                    app,
                    packages,
                    mut package,
                    hash_type,
                },
            ) => {
                if !value.is_empty() {
                    apply_package_field(&mut package, field, value, hash_type.as_deref());
                }
                State::InPackage {
                    app,
                    packages,
                    package,
                    hash_type,
                }
            }
            (field, State::InApplication { mut app, packages }) => {
                if !value.is_empty() {
                    apply_app_field(&mut app, field, value);
                }
                State::InApplication { app, packages }
            }
            ("description", State::Idle) => {
                if !value.is_empty() {
                    self.metadata.description = Some(collapse_whitespace(&value));
                }
                State::Idle
            }
            (_, state) => state,
        };
    }

    fn capture_repo_attrs(&mut self, attrs: &[(String, String)]) {
        self.metadata = RepositoryMetadata {
            name: attr(attrs, "name").map(collapse_whitespace),
            description: attr(attrs, "description").map(collapse_whitespace),
            signing_cert: attr(attrs, "pubkey").map(ToString::to_string),
            max_age: parse_int_or(attr(attrs, "maxage"), -1),
            format_version: parse_int_or(attr(attrs, "version"), -1),
        };
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn apply_package_field(
    package: &mut PackageRecord,
    field: &str,
    value: String,
    hash_type: Option<&str>,
) {
    match field {
        "version" => package.version = Some(value),
        "versioncode" => package.vercode = parse_int_or(Some(&value), -1),
        "size" => package.size = parse_int_or(Some(&value), 0),
        "hash" => {
            // sha256 always wins; md5 (or untyped) only fills an empty slot,
            // so a strong digest is never shadowed by a later legacy one.
            if let Some(algo) = HashAlgorithm::from_type_attr(hash_type) {
                if algo.overrides_existing() || package.hash.is_none() {
                    package.hash = Some(value);
                    package.hash_type = Some(algo);
                }
            } else {
                tracing::debug!(
                    app = %package.app_id,
                    hash_type = hash_type.unwrap_or_default(),
                    "ignoring hash of unknown type"
                );
            }
        }
        "sig" => package.sig = Some(value),
        "srcname" => package.src_name = Some(value),
        "apkname" => package.apk_name = Some(value),
        "sdkver" => package.min_sdk = parse_int_or(Some(&value), 0),
        "maxsdkver" => package.max_sdk = parse_int_or(Some(&value), 0),
        "added" => package.added = parse_date(&value),
        "permissions" => package.permissions = TagList::parse(&value),
        "features" => package.features = TagList::parse(&value),
        "nativecode" => package.native_code = TagList::parse(&value),
        _ => {}
    }
}

fn apply_app_field(app: &mut ApplicationRecord, field: &str, value: String) {
    match field {
        "name" => app.name = Some(value),
        "icon" => app.icon = Some(value),
        // Old-style plain text description. Newer indexes follow it with
        // <desc>, which replaces it verbatim.
        "description" => app.description = Some(format!("<p>{value}</p>")),
        "desc" => app.description = Some(value),
        "summary" => app.summary = Some(value),
        "license" => app.license = Some(value),
        "source" => app.source_url = Some(value),
        "changelog" => app.changelog_url = Some(value),
        "donate" => app.donate_url = Some(value),
        "bitcoin" => app.bitcoin_addr = Some(value),
        "litecoin" => app.litecoin_addr = Some(value),
        "dogecoin" => app.dogecoin_addr = Some(value),
        "flattr" => app.flattr_id = Some(value),
        "web" => app.web_url = Some(value),
        "tracker" => app.tracker_url = Some(value),
        "added" => app.added = parse_date(&value),
        "lastupdated" => app.last_updated = parse_date(&value),
        "marketversion" => app.upstream_version = Some(value),
        "marketvercode" => app.upstream_vercode = parse_int_or(Some(&value), -1),
        "categories" => app.categories = TagList::parse(&value),
        "antifeatures" => app.anti_features = TagList::parse(&value),
        "requirements" => app.requirements = TagList::parse(&value),
        _ => {}
    }
}
