use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use query_governance_core::{AuditId, AuditRecord, ItemKey, ItemStatus, TrackedItem};
use query_governance_engine::{AuditLog, RecordStore};
use rusqlite::{params, Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tracked_items (
  name TEXT NOT NULL,
  owner TEXT NOT NULL,
  app TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('ok','suspicious','flagged','notified','review','disabled','resolved')),
  flagged_at TEXT,
  notified_at TEXT,
  remediation_deadline TEXT,
  reason TEXT NOT NULL DEFAULT '',
  notes TEXT NOT NULL DEFAULT '',
  flagged_by TEXT NOT NULL DEFAULT '',
  whitelisted INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (name, owner, app)
);

CREATE TABLE IF NOT EXISTS audit_log (
  id TEXT PRIMARY KEY,
  at TEXT NOT NULL,
  action TEXT NOT NULL,
  name TEXT NOT NULL,
  owner TEXT NOT NULL,
  app TEXT NOT NULL,
  actor TEXT NOT NULL,
  details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracked_items_status ON tracked_items(status);
CREATE INDEX IF NOT EXISTS idx_tracked_items_deadline ON tracked_items(remediation_deadline);
CREATE INDEX IF NOT EXISTS idx_audit_log_key ON audit_log(name, owner, app);
CREATE INDEX IF NOT EXISTS idx_audit_log_at ON audit_log(at);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed governance store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            tx.execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![1_i64, now_rfc3339()?],
            )
            .context("failed to record migration version 1")?;
            tx.commit().context("failed to commit migration v1")?;
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Audit trail, optionally restricted to one item key.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_audit(&self, key: Option<&ItemKey>) -> Result<Vec<AuditRecord>> {
        let (sql, bindings): (&str, Vec<&str>) = match key {
            Some(key) => (
                "SELECT id, at, action, name, owner, app, actor, details
                 FROM audit_log
                 WHERE name = ?1 AND owner = ?2 AND app = ?3
                 ORDER BY at ASC, id ASC",
                vec![key.name.as_str(), key.owner.as_str(), key.app.as_str()],
            ),
            None => (
                "SELECT id, at, action, name, owner, app, actor, details
                 FROM audit_log
                 ORDER BY at ASC, id ASC",
                Vec::new(),
            ),
        };

        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let id_raw: String = row.get(0)?;
            let id = Ulid::from_string(&id_raw)
                .map(AuditId)
                .with_context(|| format!("invalid audit ULID: {id_raw}"))?;
            records.push(AuditRecord {
                id,
                at: parse_rfc3339(&row.get::<_, String>(1)?)?,
                action: row.get(2)?,
                key: ItemKey::new(
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ),
                actor: row.get(6)?,
                details: row.get(7)?,
            });
        }

        Ok(records)
    }

    /// Export the audit trail as deterministic NDJSON plus a sha256 manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created or written.
    pub fn export_audit(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let records = self.list_audit(None)?;
        let audit_path = out_dir.join("audit_log.ndjson");
        let (sha256, record_count) = write_ndjson_file(&audit_path, &records)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![ExportFileDigest {
                path: "audit_log.ndjson".to_string(),
                sha256,
                records: record_count,
            }],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Copy the live database to a standalone `SQLite` file.
    ///
    /// # Errors
    /// Returns an error when the destination cannot be created or the backup
    /// fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or
    /// migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()?;
        Ok(())
    }

    /// Run `PRAGMA quick_check` and report it together with schema status.
    ///
    /// # Errors
    /// Returns an error when the check itself cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .context("failed to run quick_check")?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status: self.schema_status()?,
        })
    }
}

impl RecordStore for SqliteStore {
    fn read_all(&mut self) -> Result<Vec<TrackedItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, owner, app, status, flagged_at, notified_at, remediation_deadline,
                    reason, notes, flagged_by, whitelisted
             FROM tracked_items
             ORDER BY app ASC, owner ASC, name ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let status_raw: String = row.get(3)?;
            let status = ItemStatus::parse(&status_raw)
                .ok_or_else(|| anyhow!("unknown item status: {status_raw}"))?;
            items.push(TrackedItem {
                key: ItemKey::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ),
                status,
                flagged_at: parse_optional_rfc3339(row.get::<_, Option<String>>(4)?)?,
                notified_at: parse_optional_rfc3339(row.get::<_, Option<String>>(5)?)?,
                remediation_deadline: parse_optional_rfc3339(row.get::<_, Option<String>>(6)?)?,
                reason: row.get(7)?,
                notes: row.get(8)?,
                flagged_by: row.get(9)?,
                whitelisted: row.get(10)?,
            });
        }

        Ok(items)
    }

    fn write_all(&mut self, items: &[TrackedItem]) -> Result<()> {
        for item in items {
            item.validate().map_err(|err| anyhow!("item validation failed: {err}"))?;
        }

        // The store contract is whole-table overwrite inside one transaction.
        let tx = self.conn.transaction().context("failed to start write transaction")?;
        tx.execute("DELETE FROM tracked_items", [])
            .context("failed to clear tracked_items")?;
        for item in items {
            tx.execute(
                "INSERT INTO tracked_items(
                    name, owner, app, status, flagged_at, notified_at, remediation_deadline,
                    reason, notes, flagged_by, whitelisted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    item.key.name,
                    item.key.owner,
                    item.key.app,
                    item.status.as_str(),
                    optional_rfc3339(item.flagged_at)?,
                    optional_rfc3339(item.notified_at)?,
                    optional_rfc3339(item.remediation_deadline)?,
                    item.reason,
                    item.notes,
                    item.flagged_by,
                    item.whitelisted,
                ],
            )
            .with_context(|| format!("failed to insert tracked item {}", item.key))?;
        }
        tx.commit().context("failed to commit write transaction")?;
        Ok(())
    }
}

impl AuditLog for SqliteStore {
    fn append(&mut self, record: &AuditRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_log(id, at, action, name, owner, app, actor, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    rfc3339(record.at)?,
                    record.action,
                    record.key.name,
                    record.key.owner,
                    record.key.app,
                    record.actor,
                    record.details,
                ],
            )
            .context("failed to append audit record")?;
        Ok(())
    }

    fn list(&mut self, key: Option<&ItemKey>) -> Result<Vec<AuditRecord>> {
        self.list_audit(key)
    }
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value.format(&Rfc3339).context("failed to format RFC3339 timestamp")
}

fn optional_rfc3339(value: Option<OffsetDateTime>) -> Result<Option<String>> {
    value.map(rfc3339).transpose()
}

fn parse_rfc3339(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {raw}"))
}

fn parse_optional_rfc3339(raw: Option<String>) -> Result<Option<OffsetDateTime>> {
    raw.as_deref().map(parse_rfc3339).transpose()
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")?;
    Ok(version.unwrap_or(0))
}

fn write_ndjson_file<T: serde::Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}
