//! SQLite catalog database
//!
//! Holds repositories, applications and packages. Whole-repository
//! replacement is staged in connection-local TEMP tables and swapped into the
//! canonical tables inside one transaction.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use reposync_core::catalog::UpdateCandidate;
use reposync_core::catalog::derived::{is_compatible, suggested_vercode};
use reposync_core::config::{DeviceProfile, RepoConfig};
use reposync_core::db_path;
use reposync_schema::{
    AppId, ApplicationRecord, HashAlgorithm, PackageRecord, RepoId, Repository, TagList,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

/// Errors from the catalog database
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite rejected a statement
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A staged write or commit ran without `begin_staging`
    #[error("No staging area is open")]
    NotStaging,

    /// No repository row has this id
    #[error("Unknown repository {0}")]
    UnknownRepository(RepoId),

    /// The actor thread is gone
    #[error("Database actor died")]
    ActorDied,
}

/// Application and package row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogCounts {
    /// Rows in `apps`
    pub applications: usize,
    /// Rows in `packages`
    pub packages: usize,
}

/// Application row as shown by listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSummary {
    /// Application id
    pub id: String,
    /// Display name from the index
    pub name: Option<String>,
    /// At least one package runs on the device
    pub compatible: bool,
    /// Version the catalog suggests installing
    pub suggested_vercode: Option<i32>,
}

const REPO_COLUMNS: &str = "id, address, name, description, signing_cert, pinned_fingerprint,
     format_version, max_age, enabled, peer, etag, index_hash, last_updated";

/// Catalog database for synchronized repository content
#[derive(Debug)]
pub struct CatalogDb {
    conn: Connection,
    staging: Cell<bool>,
}

impl CatalogDb {
    /// Open or create the catalog database
    pub fn open() -> Result<Self, DbError> {
        let path = db_path();
        Self::open_in_dir(&path)
    }

    /// Open the database at `path`, creating its directory first
    fn open_in_dir(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open_at(path)
    }

    /// Open database at a specific path (for testing)
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // Readers see the pre-commit catalog until the swap lands
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self {
            conn,
            staging: Cell::new(false),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                name TEXT,
                description TEXT,
                signing_cert TEXT,
                pinned_fingerprint TEXT,
                format_version INTEGER NOT NULL DEFAULT -1,
                max_age INTEGER NOT NULL DEFAULT -1,
                enabled INTEGER NOT NULL DEFAULT 1,
                peer INTEGER NOT NULL DEFAULT 0,
                etag TEXT,
                index_hash TEXT,
                last_updated TEXT
            );

            CREATE TABLE IF NOT EXISTS apps (
                id TEXT PRIMARY KEY,
                name TEXT,
                summary TEXT,
                description TEXT,
                icon TEXT,
                license TEXT,
                web_url TEXT,
                source_url TEXT,
                tracker_url TEXT,
                changelog_url TEXT,
                donate_url TEXT,
                bitcoin_addr TEXT,
                litecoin_addr TEXT,
                dogecoin_addr TEXT,
                flattr_id TEXT,
                categories TEXT,
                anti_features TEXT,
                requirements TEXT,
                added TEXT,
                last_updated TEXT,
                upstream_version TEXT,
                upstream_vercode INTEGER NOT NULL DEFAULT -1,
                compatible INTEGER NOT NULL DEFAULT 0,
                suggested_vercode INTEGER
            );

            CREATE TABLE IF NOT EXISTS packages (
                app_id TEXT NOT NULL,
                repo_id INTEGER NOT NULL,
                vercode INTEGER NOT NULL,
                version TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                hash TEXT,
                hash_type TEXT,
                sig TEXT,
                src_name TEXT,
                apk_name TEXT,
                min_sdk INTEGER NOT NULL DEFAULT 0,
                max_sdk INTEGER NOT NULL DEFAULT 0,
                added TEXT,
                permissions TEXT,
                features TEXT,
                native_code TEXT,
                compatible INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (app_id, vercode, repo_id)
            );

            CREATE INDEX IF NOT EXISTS idx_packages_repo ON packages(repo_id);

            CREATE TABLE IF NOT EXISTS installed_apps (
                app_id TEXT PRIMARY KEY,
                vercode INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // --- Repositories ---

    /// All repositories ordered by id
    pub fn list_repositories(&self) -> Result<Vec<Repository>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {REPO_COLUMNS} FROM repositories ORDER BY id"))?;
        let repos = stmt.query_map([], repository_from_row)?;
        repos.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Look up a repository by address
    pub fn get_repository(&self, address: &str) -> Result<Option<Repository>, DbError> {
        self.conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE address = ?1"),
                params![address],
                repository_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert or update a configured repository, keyed by address
    pub fn import_repository(&self, config: &RepoConfig) -> Result<Repository, DbError> {
        let address = config.normalized_address();
        self.conn.execute(
            "INSERT INTO repositories (address, name, pinned_fingerprint, enabled, peer)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(address) DO UPDATE SET
                name = COALESCE(excluded.name, repositories.name),
                pinned_fingerprint = excluded.pinned_fingerprint,
                enabled = excluded.enabled,
                peer = excluded.peer",
            params![
                address,
                config.name,
                config.fingerprint,
                config.enabled,
                config.peer
            ],
        )?;
        self.get_repository(address)?
            .ok_or_else(|| DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    // --- Staging ---

    /// Replace any previous staging area with a snapshot of the canonical tables
    pub fn begin_staging(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS temp.staged_apps;
            DROP TABLE IF EXISTS temp.staged_packages;
            CREATE TEMP TABLE staged_apps AS SELECT * FROM main.apps;
            CREATE TEMP TABLE staged_packages AS SELECT * FROM main.packages;
            CREATE UNIQUE INDEX temp.staged_apps_pk ON staged_apps(id);
            CREATE UNIQUE INDEX temp.staged_packages_pk
                ON staged_packages(app_id, vercode, repo_id);
            ",
        )?;
        self.staging.set(true);
        Ok(())
    }

    fn ensure_staging(&self) -> Result<(), DbError> {
        if self.staging.get() {
            Ok(())
        } else {
            Err(DbError::NotStaging)
        }
    }

    /// Remove every staged package of `repo`
    pub fn stage_remove_repository(&self, repo: RepoId) -> Result<(), DbError> {
        self.ensure_staging()?;
        self.conn.execute(
            "DELETE FROM temp.staged_packages WHERE repo_id = ?1",
            params![repo.get()],
        )?;
        Ok(())
    }

    /// Upsert an application and its packages into the staging area
    pub fn stage_application(
        &self,
        app: &ApplicationRecord,
        packages: &[PackageRecord],
    ) -> Result<(), DbError> {
        self.ensure_staging()?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO temp.staged_apps (
                id, name, summary, description, icon, license, web_url, source_url,
                tracker_url, changelog_url, donate_url, bitcoin_addr, litecoin_addr,
                dogecoin_addr, flattr_id, categories, anti_features, requirements,
                added, last_updated, upstream_version, upstream_vercode,
                compatible, suggested_vercode
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, 0, NULL)",
            params![
                app.id.as_str(),
                app.name,
                app.summary,
                app.description,
                app.icon,
                app.license,
                app.web_url,
                app.source_url,
                app.tracker_url,
                app.changelog_url,
                app.donate_url,
                app.bitcoin_addr,
                app.litecoin_addr,
                app.dogecoin_addr,
                app.flattr_id,
                tags_to_sql(app.categories.as_ref()),
                tags_to_sql(app.anti_features.as_ref()),
                tags_to_sql(app.requirements.as_ref()),
                app.added.map(|d| d.to_string()),
                app.last_updated.map(|d| d.to_string()),
                app.upstream_version,
                app.upstream_vercode,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO temp.staged_packages (
                    app_id, repo_id, vercode, version, size, hash, hash_type, sig,
                    src_name, apk_name, min_sdk, max_sdk, added, permissions, features,
                    native_code, compatible
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 0)",
            )?;
            for pkg in packages {
                stmt.execute(params![
                    pkg.app_id.as_str(),
                    pkg.repo_id.get(),
                    pkg.vercode,
                    pkg.version,
                    pkg.size,
                    pkg.hash,
                    pkg.hash_type.map(HashAlgorithm::as_str),
                    pkg.sig,
                    pkg.src_name,
                    pkg.apk_name,
                    pkg.min_sdk,
                    pkg.max_sdk,
                    pkg.added.map(|d| d.to_string()),
                    tags_to_sql(pkg.permissions.as_ref()),
                    tags_to_sql(pkg.features.as_ref()),
                    tags_to_sql(pkg.native_code.as_ref()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Atomically replace the canonical tables with the staging area and
    /// store the synchronization metadata of `repo`
    pub fn commit_staging(&self, repo: &Repository) -> Result<(), DbError> {
        self.commit_staging_with(repo, |_| Ok(()))
    }

    /// Commit with a hook between the delete and re-insert steps.
    ///
    /// An error from `between` or from the repository write rolls the whole
    /// swap back and leaves the staging area open.
    fn commit_staging_with<F>(&self, repo: &Repository, between: F) -> Result<(), DbError>
    where
        F: FnOnce(&Connection) -> Result<(), DbError>,
    {
        self.ensure_staging()?;
        let tx = self.conn.unchecked_transaction()?;
        write_repository(&tx, repo)?;
        tx.execute("DELETE FROM main.apps", [])?;
        tx.execute("DELETE FROM main.packages", [])?;
        between(&tx)?;
        tx.execute("INSERT INTO main.apps SELECT * FROM temp.staged_apps", [])?;
        tx.execute(
            "INSERT INTO main.packages SELECT * FROM temp.staged_packages",
            [],
        )?;
        tx.commit()?;
        self.discard_staging()
    }

    /// Drop the staging area, if any
    pub fn discard_staging(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS temp.staged_apps;
            DROP TABLE IF EXISTS temp.staged_packages;
            ",
        )?;
        self.staging.set(false);
        Ok(())
    }

    // --- Cleanup and derived fields ---

    /// Delete every package of a repository and forget its ETag and index hash
    pub fn delete_packages_by_repository(&self, repo: RepoId) -> Result<usize, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let n = tx.execute(
            "DELETE FROM main.packages WHERE repo_id = ?1",
            params![repo.get()],
        )?;
        tx.execute(
            "UPDATE repositories SET etag = NULL, index_hash = NULL WHERE id = ?1",
            params![repo.get()],
        )?;
        tx.commit()?;
        Ok(n)
    }

    /// Delete applications that have no packages left
    pub fn delete_applications_without_packages(&self) -> Result<usize, DbError> {
        let n = self.conn.execute(
            "DELETE FROM main.apps WHERE id NOT IN (SELECT DISTINCT app_id FROM main.packages)",
            [],
        )?;
        Ok(n)
    }

    /// Recompute package compatibility and application suggested versions
    pub fn recompute_derived_fields(&self, device: &DeviceProfile) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;

        let mut compatible_codes: HashMap<String, Vec<i32>> = HashMap::new();
        {
            let mut select = tx.prepare(
                "SELECT rowid, app_id, vercode, min_sdk, max_sdk, native_code FROM main.packages",
            )?;
            let mut update = tx.prepare("UPDATE main.packages SET compatible = ?2 WHERE rowid = ?1")?;
            let rows = select
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i32>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, i32>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (rowid, app_id, vercode, min_sdk, max_sdk, native) in rows {
                let native = native.as_deref().and_then(TagList::parse);
                let ok = is_compatible(min_sdk, max_sdk, native.as_ref(), device);
                update.execute(params![rowid, ok])?;
                if ok {
                    compatible_codes.entry(app_id).or_default().push(vercode);
                }
            }
        }

        {
            let mut select = tx.prepare("SELECT id, upstream_vercode FROM main.apps")?;
            let mut update = tx.prepare(
                "UPDATE main.apps SET compatible = ?2, suggested_vercode = ?3 WHERE id = ?1",
            )?;
            let apps = select
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            for (id, upstream) in apps {
                let codes = compatible_codes.remove(&id).unwrap_or_default();
                let compatible = !codes.is_empty();
                let suggested = suggested_vercode(upstream, codes);
                update.execute(params![id, compatible, suggested])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // --- Installed applications ---

    /// Record an installed application version
    pub fn set_installed(&self, app: &str, vercode: i32) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO installed_apps (app_id, vercode) VALUES (?1, ?2)",
            params![app, vercode],
        )?;
        Ok(())
    }

    /// Installed applications with a newer suggested version
    pub fn updatable_applications(&self) -> Result<Vec<UpdateCandidate>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.app_id, a.name, i.vercode, a.suggested_vercode
             FROM installed_apps i JOIN main.apps a ON a.id = i.app_id
             WHERE a.suggested_vercode IS NOT NULL AND a.suggested_vercode > i.vercode
             ORDER BY i.app_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UpdateCandidate {
                app_id: AppId::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
                installed_vercode: row.get(2)?,
                suggested_vercode: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // --- Queries ---

    /// Application and package counts of the canonical catalog
    pub fn counts(&self) -> Result<CatalogCounts, DbError> {
        let applications: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM main.apps", [], |row| row.get(0))?;
        let packages: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM main.packages", [], |row| row.get(0))?;
        Ok(CatalogCounts {
            applications: usize::try_from(applications).unwrap_or_default(),
            packages: usize::try_from(packages).unwrap_or_default(),
        })
    }

    /// Look up one application
    pub fn get_application(&self, id: &str) -> Result<Option<AppSummary>, DbError> {
        self.conn
            .query_row(
                "SELECT id, name, compatible, suggested_vercode FROM main.apps WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AppSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        compatible: row.get(2)?,
                        suggested_vercode: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Version codes of an application's packages, ascending
    pub fn package_vercodes(&self, app: &str) -> Result<Vec<i32>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT vercode FROM main.packages WHERE app_id = ?1 ORDER BY vercode")?;
        let codes = stmt.query_map(params![app], |row| row.get(0))?;
        codes.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Fetch a package with every stored field
    pub fn get_package(
        &self,
        app: &str,
        vercode: i32,
        repo: RepoId,
    ) -> Result<Option<PackageRecord>, DbError> {
        self.conn
            .query_row(
                "SELECT app_id, repo_id, vercode, version, size, hash, hash_type, sig, src_name,
                        apk_name, min_sdk, max_sdk, added, permissions, features, native_code
                 FROM main.packages WHERE app_id = ?1 AND vercode = ?2 AND repo_id = ?3",
                params![app, vercode, repo.get()],
                package_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    // --- Run metadata ---

    /// Time of the last completed run
    pub fn last_run(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'last_run'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref().and_then(parse_timestamp))
    }

    /// Record the time of a completed run
    pub fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_run', ?1)",
            params![at.to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Persist synchronization metadata of a repository
fn write_repository(conn: &Connection, repo: &Repository) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE repositories SET
            name = ?2, description = ?3, signing_cert = ?4, format_version = ?5,
            max_age = ?6, etag = ?7, index_hash = ?8, last_updated = ?9
         WHERE id = ?1",
        params![
            repo.id.get(),
            repo.name,
            repo.description,
            repo.signing_cert,
            repo.format_version,
            repo.max_age,
            repo.etag,
            repo.index_hash,
            repo.last_updated.map(|t| t.to_rfc3339()),
        ],
    )?;
    if updated == 0 {
        return Err(DbError::UnknownRepository(repo.id));
    }
    Ok(())
}

fn tags_to_sql(tags: Option<&TagList>) -> Option<String> {
    tags.map(TagList::to_joined)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_day(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let mut repo = Repository::new(RepoId::new(row.get(0)?), row.get::<_, String>(1)?);
    repo.name = row.get(2)?;
    repo.description = row.get(3)?;
    repo.signing_cert = row.get(4)?;
    repo.pinned_fingerprint = row.get(5)?;
    repo.format_version = row.get(6)?;
    repo.max_age = row.get(7)?;
    repo.enabled = row.get(8)?;
    repo.peer = row.get(9)?;
    repo.etag = row.get(10)?;
    repo.index_hash = row.get(11)?;
    repo.last_updated = row
        .get::<_, Option<String>>(12)?
        .as_deref()
        .and_then(parse_timestamp);
    Ok(repo)
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<PackageRecord> {
    let mut pkg = PackageRecord::new(
        AppId::new(row.get::<_, String>(0)?),
        RepoId::new(row.get(1)?),
    );
    pkg.vercode = row.get(2)?;
    pkg.version = row.get(3)?;
    pkg.size = row.get(4)?;
    pkg.hash = row.get(5)?;
    pkg.hash_type = row
        .get::<_, Option<String>>(6)?
        .as_deref()
        .and_then(HashAlgorithm::from_canonical);
    pkg.sig = row.get(7)?;
    pkg.src_name = row.get(8)?;
    pkg.apk_name = row.get(9)?;
    pkg.min_sdk = row.get(10)?;
    pkg.max_sdk = row.get(11)?;
    pkg.added = parse_day(row.get(12)?);
    pkg.permissions = row.get::<_, Option<String>>(13)?.as_deref().and_then(TagList::parse);
    pkg.features = row.get::<_, Option<String>>(14)?.as_deref().and_then(TagList::parse);
    pkg.native_code = row.get::<_, Option<String>>(15)?.as_deref().and_then(TagList::parse);
    Ok(pkg)
}
