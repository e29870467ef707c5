use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const LATEST_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version = current_version(conn)?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            r#"
            CREATE TABLE "user" (
                bridge_id       TEXT NOT NULL,
                mxid            TEXT NOT NULL,
                management_room TEXT,
                PRIMARY KEY (bridge_id, mxid)
            );

            CREATE TABLE user_login (
                bridge_id   TEXT NOT NULL,
                user_mxid   TEXT NOT NULL,
                id          TEXT NOT NULL,
                space_room  TEXT,
                metadata    TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (bridge_id, id),
                FOREIGN KEY (bridge_id, user_mxid) REFERENCES "user" (bridge_id, mxid)
                    ON DELETE CASCADE ON UPDATE CASCADE
            );

            CREATE TABLE ghost (
                bridge_id   TEXT NOT NULL,
                id          TEXT NOT NULL,
                name        TEXT NOT NULL DEFAULT '',
                avatar_id   TEXT NOT NULL DEFAULT '',
                avatar_hash TEXT NOT NULL DEFAULT '',
                avatar_mxc  TEXT NOT NULL DEFAULT '',
                name_set    INTEGER NOT NULL DEFAULT 0,
                avatar_set  INTEGER NOT NULL DEFAULT 0,
                metadata    TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (bridge_id, id)
            );

            CREATE TABLE user_portal (
                bridge_id       TEXT NOT NULL,
                user_mxid       TEXT NOT NULL,
                login_id        TEXT NOT NULL,
                portal_id       TEXT NOT NULL,
                portal_receiver TEXT NOT NULL DEFAULT '',
                in_space        INTEGER NOT NULL DEFAULT 0,
                preferred       INTEGER NOT NULL DEFAULT 0,
                last_read       INTEGER,
                metadata        TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (bridge_id, user_mxid, login_id, portal_id, portal_receiver),
                FOREIGN KEY (bridge_id, login_id) REFERENCES user_login (bridge_id, id)
                    ON DELETE CASCADE ON UPDATE CASCADE
            );

            CREATE INDEX user_portal_portal_idx
                ON user_portal (bridge_id, portal_id, portal_receiver);

            CREATE TABLE reaction (
                bridge_id       TEXT NOT NULL,
                message_id      TEXT NOT NULL,
                message_part_id TEXT NOT NULL,
                sender_id       TEXT NOT NULL,
                emoji_id        TEXT NOT NULL,
                room_id         TEXT NOT NULL,
                room_receiver   TEXT NOT NULL DEFAULT '',
                mxid            TEXT NOT NULL,
                timestamp       INTEGER NOT NULL,
                metadata        TEXT NOT NULL DEFAULT '{}',
                UNIQUE (bridge_id, room_receiver, message_id, message_part_id, sender_id, emoji_id)
            );

            CREATE INDEX reaction_message_idx ON reaction (bridge_id, message_id);
            CREATE INDEX reaction_mxid_idx ON reaction (bridge_id, mxid);

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}
