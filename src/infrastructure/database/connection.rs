use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::db_schema::initialize_schema;
use crate::errors::CellyardError;

const POOL_SIZE: u32 = 4;

/// r2d2 manager opening sqlite connections on a single file.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    path: PathBuf,
}

impl SqliteConnectionManager {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl r2d2::ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, or at the default
    /// data-dir location when `None`, and applies the schema.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(path) => path,
            None => default_db_path()?,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(SqliteConnectionManager::file(&path))
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let db = Self { pool, path };
        initialize_schema(&db)?;
        log::info!("Database ready at {}", db.path.display());
        Ok(db)
    }

    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            CellyardError::DatabaseError {
                message: format!("failed to get connection from pool: {e}"),
            }
            .into()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` on the blocking pool so a busy sqlite file never stalls the
    /// async runtime or the timers racing it.
    pub async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| CellyardError::DatabaseError {
                message: format!("database task failed: {e}"),
            })?
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("could not determine data directory")?;
    Ok(data_dir.join("cellyard").join("cellyard.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_parent_directories_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cells.db");
        let db = Database::new(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());

        let conn = db.get_conn().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('cells', 'cell_timing_events')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
