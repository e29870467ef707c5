pub mod ghosts;
pub mod logins;
pub mod merge;
pub mod migrations;
pub mod models;
pub mod reactions;

use anyhow::Result;
use ghostlink_types::ids::BridgeId;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Bridge database. Every query is scoped to the bridge id the handle was
/// opened with.
pub struct Database {
    conn: Mutex<Connection>,
    bridge_id: BridgeId,
}

impl Database {
    pub fn open(path: &Path, bridge_id: BridgeId) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers from other processes
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, bridge_id)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(bridge_id: BridgeId) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, bridge_id)
    }

    fn from_connection(conn: Connection, bridge_id: BridgeId) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            bridge_id,
        })
    }

    pub fn bridge_id(&self) -> &BridgeId {
        &self.bridge_id
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(migrations::current_version)
    }

    /// Fills in an empty bridge id on a row about to be written, and refuses
    /// rows that belong to a different bridge. A mismatch means rows from two
    /// bridges got mixed up in memory, which is not recoverable.
    pub(crate) fn ensure_bridge_id_matches(&self, row_bridge_id: &mut BridgeId) {
        if row_bridge_id.is_empty() {
            *row_bridge_id = self.bridge_id.clone();
        } else if *row_bridge_id != self.bridge_id {
            panic!(
                "bridge id mismatch: row has {}, database is scoped to {}",
                row_bridge_id, self.bridge_id
            );
        }
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
