//! civis persistence: confirmed bindings stored as JSON documents in SQLite,
//! keyed by an entry id. Synchronous; nothing here is latency sensitive.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use civis_core::{now_ts, ResourceBinding};
use metrics::{counter, histogram};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DB_PATH_ENV: &str = "CIVIS_DB_PATH";

/// A binding as stored under its entry id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBinding {
    pub id: String,
    pub saved_ts: i64,
    pub binding: ResourceBinding,
}

pub trait BindingStore {
    /// Store a new binding and return its entry id.
    fn save(&self, binding: &ResourceBinding) -> Result<String>;
    /// Replace the binding behind an existing entry id.
    fn update(&self, id: &str, binding: &ResourceBinding) -> Result<()>;
    fn load(&self, id: &str) -> Result<Option<StoredBinding>>;
    /// All bindings, oldest first.
    fn load_all(&self) -> Result<Vec<StoredBinding>>;
    /// Returns whether the entry existed.
    fn delete(&self, id: &str) -> Result<bool>;
}

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// `CIVIS_DB_PATH`, else `~/.civis/civis.db`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var_os(DB_PATH_ENV).map(PathBuf::from).unwrap_or_else(default_db_path);
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let started = Instant::now();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path.display()))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS bindings (
                id     TEXT PRIMARY KEY,
                title  TEXT NOT NULL,
                format TEXT NOT NULL,
                ts     INTEGER NOT NULL,
                body   TEXT NOT NULL
            )",
            [],
        )
        .context("creating bindings table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %path.display(), "persist: opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> { self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned")) }
}

fn encode(binding: &ResourceBinding) -> Result<String> { serde_json::to_string(binding).context("encoding binding") }

fn decode(id: String, ts: i64, body: &str) -> Result<StoredBinding> {
    let binding = serde_json::from_str(body).with_context(|| format!("decoding binding {id}"))?;
    Ok(StoredBinding { id, saved_ts: ts, binding })
}

impl BindingStore for SqliteStore {
    fn save(&self, binding: &ResourceBinding) -> Result<String> {
        let started = Instant::now();
        let id = uuid::Uuid::new_v4().to_string();
        let body = encode(binding)?;
        self.conn()?
            .execute(
                "INSERT INTO bindings(id, title, format, ts, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                (&id, &binding.title, binding.format.as_str(), now_ts(), &body),
            )
            .context("inserting binding")?;
        histogram!("persist_save_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_save_total", 1u64);
        debug!(id = %id, title = %binding.title, "persist: saved");
        Ok(id)
    }

    fn update(&self, id: &str, binding: &ResourceBinding) -> Result<()> {
        let body = encode(binding)?;
        let changed = self
            .conn()?
            .execute(
                "UPDATE bindings SET title = ?2, format = ?3, ts = ?4, body = ?5 WHERE id = ?1",
                (id, &binding.title, binding.format.as_str(), now_ts(), &body),
            )
            .context("updating binding")?;
        if changed == 0 {
            bail!("no binding with id {id}");
        }
        counter!("persist_update_total", 1u64);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredBinding>> {
        let db = self.conn()?;
        let row: Option<(i64, String)> = db
            .query_row("SELECT ts, body FROM bindings WHERE id = ?1", [id], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()
            .context("reading binding")?;
        row.map(|(ts, body)| decode(id.to_string(), ts, &body)).transpose()
    }

    fn load_all(&self) -> Result<Vec<StoredBinding>> {
        let started = Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, ts, body FROM bindings ORDER BY ts ASC, rowid ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get(2)?;
            out.push(decode(row.get(0)?, row.get(1)?, &body)?);
        }
        histogram!("persist_load_all_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let n = self.conn()?.execute("DELETE FROM bindings WHERE id = ?1", [id]).context("deleting binding")?;
        if n > 0 {
            counter!("persist_delete_total", 1u64);
        }
        Ok(n > 0)
    }
}

fn default_db_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".civis").join("civis.db"),
        None => PathBuf::from("civis.db"),
    }
}
