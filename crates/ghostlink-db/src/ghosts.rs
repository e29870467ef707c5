use anyhow::{Context, Result};
use ghostlink_types::ids::{AvatarId, ContentUri, UserId};
use rusqlite::Row;

use crate::models::{GhostRow, metadata_column};
use crate::{Database, OptionalExt};

const GHOST_COLUMNS: &str =
    "bridge_id, id, name, avatar_id, avatar_hash, avatar_mxc, name_set, avatar_set, metadata";

impl Database {
    pub fn get_ghost_by_id(&self, id: &UserId) -> Result<Option<GhostRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {GHOST_COLUMNS} FROM ghost WHERE bridge_id = ?1 AND id = ?2");
            conn.query_row(&sql, (self.bridge_id().as_str(), id.as_str()), scan_ghost)
                .optional()
        })
    }

    pub fn insert_ghost(&self, ghost: &mut GhostRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut ghost.bridge_id);
        let metadata = ghost.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO ghost ({GHOST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                rusqlite::params![
                    ghost.bridge_id.as_str(),
                    ghost.id.as_str(),
                    ghost.name,
                    ghost.avatar_id.as_str(),
                    encode_hash(&ghost.avatar_hash),
                    ghost.avatar_mxc.as_str(),
                    ghost.name_set,
                    ghost.avatar_set,
                    metadata,
                ],
            )
            .with_context(|| format!("inserting ghost {}", ghost.id))?;
            Ok(())
        })
    }

    pub fn update_ghost(&self, ghost: &mut GhostRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut ghost.bridge_id);
        let metadata = ghost.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE ghost SET name = ?3, avatar_id = ?4, avatar_hash = ?5, avatar_mxc = ?6,
                     name_set = ?7, avatar_set = ?8, metadata = ?9
                 WHERE bridge_id = ?1 AND id = ?2",
                rusqlite::params![
                    ghost.bridge_id.as_str(),
                    ghost.id.as_str(),
                    ghost.name,
                    ghost.avatar_id.as_str(),
                    encode_hash(&ghost.avatar_hash),
                    ghost.avatar_mxc.as_str(),
                    ghost.name_set,
                    ghost.avatar_set,
                    metadata,
                ],
            )
            .with_context(|| format!("updating ghost {}", ghost.id))?;
            Ok(())
        })
    }

    pub fn count_ghosts(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM ghost WHERE bridge_id = ?1",
                [self.bridge_id().as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn scan_ghost(row: &Row<'_>) -> rusqlite::Result<GhostRow> {
    let hash: String = row.get(4)?;
    Ok(GhostRow {
        bridge_id: row.get::<_, String>(0)?.into(),
        id: row.get::<_, String>(1)?.into(),
        name: row.get(2)?,
        avatar_id: AvatarId::from(row.get::<_, String>(3)?),
        avatar_hash: decode_hash(&hash).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        avatar_mxc: ContentUri::from(row.get::<_, String>(5)?),
        name_set: row.get(6)?,
        avatar_set: row.get(7)?,
        metadata: metadata_column(row, 8)?,
    })
}

/// An all-zero hash means "no avatar" and is stored as an empty string.
fn encode_hash(hash: &[u8; 32]) -> String {
    if hash.iter().all(|b| *b == 0) {
        String::new()
    } else {
        hex::encode(hash)
    }
}

fn decode_hash(value: &str) -> std::result::Result<[u8; 32], hex::FromHexError> {
    let mut hash = [0u8; 32];
    if !value.is_empty() {
        hex::decode_to_slice(value, &mut hash)?;
    }
    Ok(hash)
}
