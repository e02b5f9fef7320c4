use crate::models::CachedRecipeRecord;
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DB_FILE_NAME: &str = "cocktail_offline.sqlite";

/// Durable key/value cache of recipe snapshots keyed by recipe id.
///
/// Each call runs as its own statement on a blocking thread; there is no
/// cross-key transaction and concurrent writes to one id are last-write-wins.
#[derive(Clone)]
pub struct OfflineStore {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

fn lock(db: &Mutex<Connection>) -> anyhow::Result<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|e| anyhow::anyhow!("offline store lock poisoned: {}", e))
}

impl OfflineStore {
    pub fn new(base_path: &str) -> anyhow::Result<Self> {
        let dir = Path::new(base_path);
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating storage directory {:?}", dir))?;
        }
        let db_path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {:?}", db_path))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cached_recipes (
                id TEXT PRIMARY KEY,
                cached_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            ",
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Upsert the snapshot for `id`, replacing any earlier one
    pub async fn put(&self, id: &str, recipe: serde_json::Value) -> anyhow::Result<()> {
        let record = CachedRecipeRecord::new(id, recipe);
        let payload = serde_json::to_string(&record.recipe)?;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            conn.execute(
                "INSERT INTO cached_recipes (id, cached_at, data)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                   cached_at = excluded.cached_at,
                   data = excluded.data",
                params![record.id, record.cached_at, payload],
            )
            .context("upserting cached recipe")?;
            Ok::<_, anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    /// Snapshot for `id`, or `None` when nothing is cached
    pub async fn get(&self, id: &str) -> anyhow::Result<Option<CachedRecipeRecord>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let record = tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            let row = conn
                .query_row(
                    "SELECT id, cached_at, data FROM cached_recipes WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(decode_record).transpose()
        })
        .await??;
        Ok(record)
    }

    /// Remove the snapshot for `id`; returns whether one existed
    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let deleted = tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            let deleted = conn
                .execute("DELETE FROM cached_recipes WHERE id = ?1", params![id])
                .context("deleting cached recipe")?;
            Ok::<_, anyhow::Error>(deleted > 0)
        })
        .await??;
        Ok(deleted)
    }

    /// All cached snapshots in insertion order
    pub async fn list_all(&self) -> anyhow::Result<Vec<CachedRecipeRecord>> {
        let db = Arc::clone(&self.db);
        let records = tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            let mut stmt =
                conn.prepare("SELECT id, cached_at, data FROM cached_recipes ORDER BY rowid ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(decode_record((row.get(0)?, row.get(1)?, row.get(2)?))?);
            }
            Ok::<_, anyhow::Error>(out)
        })
        .await??;
        Ok(records)
    }

    /// Ids of every cached snapshot
    pub async fn ids(&self) -> anyhow::Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let ids = tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            let mut stmt = conn.prepare("SELECT id FROM cached_recipes ORDER BY rowid ASC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, anyhow::Error>(ids)
        })
        .await??;
        Ok(ids)
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        let db = Arc::clone(&self.db);
        let count = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
            let conn = lock(&db)?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cached_recipes", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await??;
        Ok(count)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn decode_record((id, cached_at, data): (String, i64, String)) -> anyhow::Result<CachedRecipeRecord> {
    let recipe = serde_json::from_str(&data)
        .with_context(|| format!("decoding cached recipe {}", id))?;
    Ok(CachedRecipeRecord {
        id,
        recipe,
        cached_at,
    })
}
