use anyhow::{Context, Result};
use ghostlink_types::ids::{EmojiId, EventId, MessageId, PartId, PortalKey, UserId};
use rusqlite::{Connection, Row};

use crate::models::{ReactionRow, from_nanos, metadata_column, to_nanos};
use crate::{Database, OptionalExt};

const REACTION_COLUMNS: &str = "bridge_id, message_id, message_part_id, sender_id, emoji_id, \
                                room_id, room_receiver, mxid, timestamp, metadata";

impl Database {
    /// Inserts the reaction, or replaces the local event id, timestamp and
    /// metadata of the existing row with the same natural key.
    pub fn upsert_reaction(&self, reaction: &mut ReactionRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut reaction.bridge_id);
        let metadata = reaction.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO reaction ({REACTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT (bridge_id, room_receiver, message_id, message_part_id, sender_id, emoji_id)
                     DO UPDATE SET mxid = excluded.mxid, timestamp = excluded.timestamp,
                                   metadata = excluded.metadata"
                ),
                rusqlite::params![
                    reaction.bridge_id.as_str(),
                    reaction.message_id.as_str(),
                    reaction.message_part_id.as_str(),
                    reaction.sender_id.as_str(),
                    reaction.emoji_id.as_str(),
                    reaction.room.id.as_str(),
                    reaction.room.receiver.as_str(),
                    reaction.mxid.as_str(),
                    to_nanos(reaction.timestamp),
                    metadata,
                ],
            )
            .with_context(|| {
                format!(
                    "upserting reaction {} by {} to {}",
                    reaction.emoji_id, reaction.sender_id, reaction.message_id
                )
            })?;
            Ok(())
        })
    }

    pub fn delete_reaction(&self, reaction: &mut ReactionRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut reaction.bridge_id);
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM reaction
                 WHERE bridge_id = ?1 AND room_receiver = ?2 AND message_id = ?3
                   AND message_part_id = ?4 AND sender_id = ?5 AND emoji_id = ?6",
                (
                    reaction.bridge_id.as_str(),
                    reaction.room.receiver.as_str(),
                    reaction.message_id.as_str(),
                    reaction.message_part_id.as_str(),
                    reaction.sender_id.as_str(),
                    reaction.emoji_id.as_str(),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_reaction_by_id(
        &self,
        message_id: &MessageId,
        part_id: &PartId,
        sender_id: &UserId,
        emoji_id: &EmojiId,
    ) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REACTION_COLUMNS} FROM reaction
                 WHERE bridge_id = ?1 AND message_id = ?2 AND message_part_id = ?3
                   AND sender_id = ?4 AND emoji_id = ?5"
            );
            conn.query_row(
                &sql,
                (
                    self.bridge_id().as_str(),
                    message_id.as_str(),
                    part_id.as_str(),
                    sender_id.as_str(),
                    emoji_id.as_str(),
                ),
                scan_reaction,
            )
            .optional()
        })
    }

    /// Like [`Database::get_reaction_by_id`] without the part; the lowest part
    /// id wins when the same emoji is on several parts.
    pub fn get_reaction_by_id_without_part(
        &self,
        message_id: &MessageId,
        sender_id: &UserId,
        emoji_id: &EmojiId,
    ) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REACTION_COLUMNS} FROM reaction
                 WHERE bridge_id = ?1 AND message_id = ?2 AND sender_id = ?3 AND emoji_id = ?4
                 ORDER BY message_part_id ASC LIMIT 1"
            );
            conn.query_row(
                &sql,
                (
                    self.bridge_id().as_str(),
                    message_id.as_str(),
                    sender_id.as_str(),
                    emoji_id.as_str(),
                ),
                scan_reaction,
            )
            .optional()
        })
    }

    /// Newest first.
    pub fn get_reactions_to_message_by_sender(
        &self,
        message_id: &MessageId,
        sender_id: &UserId,
    ) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REACTION_COLUMNS} FROM reaction
                 WHERE bridge_id = ?1 AND message_id = ?2 AND sender_id = ?3
                 ORDER BY timestamp DESC"
            );
            query_reactions(
                conn,
                &sql,
                &[self.bridge_id().as_str(), message_id.as_str(), sender_id.as_str()],
            )
        })
    }

    pub fn get_reactions_to_message(&self, message_id: &MessageId) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REACTION_COLUMNS} FROM reaction WHERE bridge_id = ?1 AND message_id = ?2"
            );
            query_reactions(conn, &sql, &[self.bridge_id().as_str(), message_id.as_str()])
        })
    }

    pub fn get_reaction_by_mxid(&self, mxid: &EventId) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {REACTION_COLUMNS} FROM reaction WHERE bridge_id = ?1 AND mxid = ?2");
            conn.query_row(&sql, (self.bridge_id().as_str(), mxid.as_str()), scan_reaction)
                .optional()
        })
    }

    pub fn count_reactions(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM reaction WHERE bridge_id = ?1",
                [self.bridge_id().as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn scan_reaction(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        bridge_id: row.get::<_, String>(0)?.into(),
        message_id: row.get::<_, String>(1)?.into(),
        message_part_id: row.get::<_, String>(2)?.into(),
        sender_id: row.get::<_, String>(3)?.into(),
        emoji_id: row.get::<_, String>(4)?.into(),
        room: PortalKey::with_receiver(row.get::<_, String>(5)?, row.get::<_, String>(6)?),
        mxid: row.get::<_, String>(7)?.into(),
        timestamp: from_nanos(row.get(8)?),
        metadata: metadata_column(row, 9)?,
    })
}

fn query_reactions(conn: &Connection, sql: &str, params: &[&str]) -> Result<Vec<ReactionRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), scan_reaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
