mod nodes;
mod remote_config;
mod settings;

use parking_lot::ReentrantMutex;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

/// Persistent panel state in a single sqlite file: settings, the node list
/// and cached subscription payloads.
#[derive(Debug)]
pub struct Store {
    conn: ReentrantMutex<Connection>,
}

impl Store {
    const TABLE_KV: &'static str = "kv";
    const TABLE_NODES: &'static str = "nodes";
    const TABLE_REMOTE_CONFIG_CACHE: &'static str = "remote_config_cache";

    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = match Connection::open(&path) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("open db `{:?}` error: {}, delete and reinitialize db", &path, e);
                std::fs::remove_file(&path)?;
                Connection::open(&path)?
            }
        };
        let store = Store {
            conn: ReentrantMutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: ReentrantMutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {kv} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {nodes} (
                position INTEGER PRIMARY KEY,
                tag TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {cache} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                data BLOB NOT NULL,
                last_update INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {cache}_last_update ON {cache} (last_update);
            "#,
            kv = Self::TABLE_KV,
            nodes = Self::TABLE_NODES,
            cache = Self::TABLE_REMOTE_CONFIG_CACHE,
        ))?;
        Ok(())
    }
}

// region: kv
impl Store {
    pub(crate) fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT value FROM {} WHERE key = ?"#,
            Self::TABLE_KV
        ))?;
        let ret = stmt
            .query_row((key,), |row| row.get::<_, String>("value"))
            .optional()?;
        Ok(ret)
    }

    pub(crate) fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)"#,
            Self::TABLE_KV
        ))?;
        let _affected = stmt.execute((key, value))?;
        Ok(())
    }

    pub(crate) fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"DELETE FROM {} WHERE key = ?"#,
            Self::TABLE_KV
        ))?;
        let _affected = stmt.execute((key,))?;
        Ok(())
    }
}
// endregion: kv

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
