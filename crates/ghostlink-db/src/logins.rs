use anyhow::{Context, Result};
use ghostlink_types::ids::{LocalUserId, PortalKey, RoomId, UserLoginId};
use rusqlite::{Connection, Row};

use crate::models::{
    UserLoginRow, UserPortalRow, UserRow, from_nanos, metadata_column, optional_id, to_nanos,
};
use crate::{Database, OptionalExt};

const LOGIN_COLUMNS: &str = "bridge_id, user_mxid, id, space_room, metadata";
const USER_PORTAL_COLUMNS: &str = "bridge_id, user_mxid, login_id, portal_id, portal_receiver, \
                                   in_space, preferred, last_read, metadata";

impl Database {
    // -- Users --

    pub fn get_user_by_mxid(&self, mxid: &LocalUserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"SELECT bridge_id, mxid, management_room FROM "user"
                   WHERE bridge_id = ?1 AND mxid = ?2"#,
                (self.bridge_id().as_str(), mxid.as_str()),
                |row| {
                    Ok(UserRow {
                        bridge_id: row.get::<_, String>(0)?.into(),
                        mxid: row.get::<_, String>(1)?.into(),
                        management_room: optional_id(row.get(2)?),
                    })
                },
            )
            .optional()
        })
    }

    pub fn insert_user(&self, user: &mut UserRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut user.bridge_id);
        self.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO "user" (bridge_id, mxid, management_room) VALUES (?1, ?2, ?3)"#,
                rusqlite::params![
                    user.bridge_id.as_str(),
                    user.mxid.as_str(),
                    user.management_room.as_ref().map(RoomId::as_str),
                ],
            )
            .with_context(|| format!("inserting user {}", user.mxid))?;
            Ok(())
        })
    }

    pub fn update_user(&self, user: &mut UserRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut user.bridge_id);
        self.with_conn(|conn| {
            conn.execute(
                r#"UPDATE "user" SET management_room = ?3 WHERE bridge_id = ?1 AND mxid = ?2"#,
                rusqlite::params![
                    user.bridge_id.as_str(),
                    user.mxid.as_str(),
                    user.management_room.as_ref().map(RoomId::as_str),
                ],
            )?;
            Ok(())
        })
    }

    // -- User logins --

    pub fn get_user_login_by_id(&self, id: &UserLoginId) -> Result<Option<UserLoginRow>> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {LOGIN_COLUMNS} FROM user_login WHERE bridge_id = ?1 AND id = ?2");
            conn.query_row(&sql, (self.bridge_id().as_str(), id.as_str()), scan_login)
                .optional()
        })
    }

    pub fn get_user_logins_for_user(&self, mxid: &LocalUserId) -> Result<Vec<UserLoginRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LOGIN_COLUMNS} FROM user_login WHERE bridge_id = ?1 AND user_mxid = ?2"
            );
            query_logins(conn, &sql, &[self.bridge_id().as_str(), mxid.as_str()])
        })
    }

    pub fn get_all_user_logins(&self) -> Result<Vec<UserLoginRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {LOGIN_COLUMNS} FROM user_login WHERE bridge_id = ?1");
            query_logins(conn, &sql, &[self.bridge_id().as_str()])
        })
    }

    /// Logins that have a membership row for the given conversation.
    pub fn get_user_logins_in_portal(&self, portal: &PortalKey) -> Result<Vec<UserLoginRow>> {
        self.with_conn(|conn| {
            let sql = "SELECT ul.bridge_id, ul.user_mxid, ul.id, ul.space_room, ul.metadata
                       FROM user_portal up
                       JOIN user_login ul ON up.bridge_id = ul.bridge_id AND up.login_id = ul.id
                       WHERE up.bridge_id = ?1 AND up.portal_id = ?2 AND up.portal_receiver = ?3";
            query_logins(
                conn,
                sql,
                &[
                    self.bridge_id().as_str(),
                    portal.id.as_str(),
                    portal.receiver.as_str(),
                ],
            )
        })
    }

    pub fn insert_user_login(&self, login: &mut UserLoginRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut login.bridge_id);
        let metadata = login.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO user_login ({LOGIN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                rusqlite::params![
                    login.bridge_id.as_str(),
                    login.user_mxid.as_str(),
                    login.id.as_str(),
                    login.space_room.as_ref().map(RoomId::as_str),
                    metadata,
                ],
            )
            .with_context(|| format!("inserting user login {}", login.id))?;
            Ok(())
        })
    }

    pub fn update_user_login(&self, login: &mut UserLoginRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut login.bridge_id);
        let metadata = login.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE user_login SET space_room = ?3, metadata = ?4 WHERE bridge_id = ?1 AND id = ?2",
                rusqlite::params![
                    login.bridge_id.as_str(),
                    login.id.as_str(),
                    login.space_room.as_ref().map(RoomId::as_str),
                    metadata,
                ],
            )
            .with_context(|| format!("updating user login {}", login.id))?;
            Ok(())
        })
    }

    /// Deletes the login row; its membership rows go with it.
    pub fn delete_user_login(&self, id: &UserLoginId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM user_login WHERE bridge_id = ?1 AND id = ?2",
                (self.bridge_id().as_str(), id.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn count_user_logins(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM user_login WHERE bridge_id = ?1",
                [self.bridge_id().as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- User portals --

    pub fn get_user_portals_for_login(&self, login_id: &UserLoginId) -> Result<Vec<UserPortalRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_PORTAL_COLUMNS} FROM user_portal WHERE bridge_id = ?1 AND login_id = ?2"
            );
            query_user_portals(conn, &sql, &[self.bridge_id().as_str(), login_id.as_str()])
        })
    }

    pub fn get_user_portal(
        &self,
        login_id: &UserLoginId,
        portal: &PortalKey,
    ) -> Result<Option<UserPortalRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_PORTAL_COLUMNS} FROM user_portal
                 WHERE bridge_id = ?1 AND login_id = ?2 AND portal_id = ?3 AND portal_receiver = ?4"
            );
            conn.query_row(
                &sql,
                (
                    self.bridge_id().as_str(),
                    login_id.as_str(),
                    portal.id.as_str(),
                    portal.receiver.as_str(),
                ),
                scan_user_portal,
            )
            .optional()
        })
    }

    /// Memberships of all logins of one local account in one conversation.
    pub fn get_user_portals_in_portal_for_user(
        &self,
        mxid: &LocalUserId,
        portal: &PortalKey,
    ) -> Result<Vec<UserPortalRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_PORTAL_COLUMNS} FROM user_portal
                 WHERE bridge_id = ?1 AND user_mxid = ?2 AND portal_id = ?3 AND portal_receiver = ?4"
            );
            query_user_portals(
                conn,
                &sql,
                &[
                    self.bridge_id().as_str(),
                    mxid.as_str(),
                    portal.id.as_str(),
                    portal.receiver.as_str(),
                ],
            )
        })
    }

    /// Inserts the membership unless it already exists. Returns true if a
    /// row was inserted.
    pub fn ensure_user_portal(&self, up: &mut UserPortalRow) -> Result<bool> {
        self.ensure_bridge_id_matches(&mut up.bridge_id);
        let metadata = up.metadata.to_json()?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO user_portal ({USER_PORTAL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT DO NOTHING"
                ),
                rusqlite::params![
                    up.bridge_id.as_str(),
                    up.user_mxid.as_str(),
                    up.login_id.as_str(),
                    up.portal.id.as_str(),
                    up.portal.receiver.as_str(),
                    up.in_space,
                    up.preferred,
                    up.last_read.map(to_nanos),
                    metadata,
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn update_user_portal(&self, up: &mut UserPortalRow) -> Result<()> {
        self.ensure_bridge_id_matches(&mut up.bridge_id);
        let metadata = up.metadata.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE user_portal SET in_space = ?6, preferred = ?7, last_read = ?8, metadata = ?9
                 WHERE bridge_id = ?1 AND user_mxid = ?2 AND login_id = ?3
                   AND portal_id = ?4 AND portal_receiver = ?5",
                rusqlite::params![
                    up.bridge_id.as_str(),
                    up.user_mxid.as_str(),
                    up.login_id.as_str(),
                    up.portal.id.as_str(),
                    up.portal.receiver.as_str(),
                    up.in_space,
                    up.preferred,
                    up.last_read.map(to_nanos),
                    metadata,
                ],
            )?;
            Ok(())
        })
    }

    /// Makes `login` the preferred login of its user in `portal`, clearing the
    /// flag on the user's other logins there.
    pub fn mark_user_portal_preferred(&self, login: &UserLoginRow, portal: &PortalKey) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE user_portal SET preferred = (login_id = ?3)
                 WHERE bridge_id = ?1 AND user_mxid = ?2 AND portal_id = ?4 AND portal_receiver = ?5",
                (
                    self.bridge_id().as_str(),
                    login.user_mxid.as_str(),
                    login.id.as_str(),
                    portal.id.as_str(),
                    portal.receiver.as_str(),
                ),
            )?;
            Ok(())
        })
    }
}

fn scan_login(row: &Row<'_>) -> rusqlite::Result<UserLoginRow> {
    Ok(UserLoginRow {
        bridge_id: row.get::<_, String>(0)?.into(),
        user_mxid: row.get::<_, String>(1)?.into(),
        id: row.get::<_, String>(2)?.into(),
        space_room: optional_id(row.get(3)?),
        metadata: metadata_column(row, 4)?,
    })
}

fn scan_user_portal(row: &Row<'_>) -> rusqlite::Result<UserPortalRow> {
    Ok(UserPortalRow {
        bridge_id: row.get::<_, String>(0)?.into(),
        user_mxid: row.get::<_, String>(1)?.into(),
        login_id: row.get::<_, String>(2)?.into(),
        portal: PortalKey::with_receiver(row.get::<_, String>(3)?, row.get::<_, String>(4)?),
        in_space: row.get(5)?,
        preferred: row.get(6)?,
        last_read: row.get::<_, Option<i64>>(7)?.map(from_nanos),
        metadata: metadata_column(row, 8)?,
    })
}

fn query_logins(conn: &Connection, sql: &str, params: &[&str]) -> Result<Vec<UserLoginRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), scan_login)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_user_portals(conn: &Connection, sql: &str, params: &[&str]) -> Result<Vec<UserPortalRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), scan_user_portal)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostlink_types::ids::BridgeId;

    fn setup() -> Database {
        let db = Database::open_in_memory(BridgeId::from("bridge")).unwrap();
        let mut user = UserRow {
            mxid: LocalUserId::from("@alice:local"),
            ..Default::default()
        };
        db.insert_user(&mut user).unwrap();
        db
    }

    fn login(id: &str) -> UserLoginRow {
        UserLoginRow {
            user_mxid: LocalUserId::from("@alice:local"),
            id: UserLoginId::from(id),
            ..Default::default()
        }
    }

    fn membership(login_id: &str, portal: &PortalKey) -> UserPortalRow {
        UserPortalRow {
            user_mxid: LocalUserId::from("@alice:local"),
            login_id: UserLoginId::from(login_id),
            portal: portal.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn login_roundtrip_and_listing() {
        let db = setup();
        let mut row = login("l1");
        row.metadata.remote_name = "Alice Remote".to_string();
        db.insert_user_login(&mut row).unwrap();
        db.insert_user_login(&mut login("l2")).unwrap();

        let loaded = db.get_user_login_by_id(&UserLoginId::from("l1")).unwrap().unwrap();
        assert_eq!(loaded, row);
        assert_eq!(
            db.get_user_logins_for_user(&LocalUserId::from("@alice:local")).unwrap().len(),
            2
        );
        assert_eq!(db.get_all_user_logins().unwrap().len(), 2);
    }

    #[test]
    fn login_requires_existing_user() {
        let db = setup();
        let mut orphan = UserLoginRow {
            user_mxid: LocalUserId::from("@nobody:local"),
            id: UserLoginId::from("l9"),
            ..Default::default()
        };
        assert!(db.insert_user_login(&mut orphan).is_err());
    }

    #[test]
    fn deleting_login_cascades_memberships() {
        let db = setup();
        db.insert_user_login(&mut login("l1")).unwrap();
        let portal = PortalKey::new("chat1");
        assert!(db.ensure_user_portal(&mut membership("l1", &portal)).unwrap());
        assert!(!db.ensure_user_portal(&mut membership("l1", &portal)).unwrap());
        assert_eq!(db.get_user_logins_in_portal(&portal).unwrap().len(), 1);

        db.delete_user_login(&UserLoginId::from("l1")).unwrap();
        assert!(db.get_user_login_by_id(&UserLoginId::from("l1")).unwrap().is_none());
        assert!(db.get_user_portals_for_login(&UserLoginId::from("l1")).unwrap().is_empty());
    }

    #[test]
    fn preferred_login_is_exclusive_per_portal() {
        let db = setup();
        let l1 = login("l1");
        let l2 = login("l2");
        db.insert_user_login(&mut l1.clone()).unwrap();
        db.insert_user_login(&mut l2.clone()).unwrap();
        let portal = PortalKey::new("chat1");
        db.ensure_user_portal(&mut membership("l1", &portal)).unwrap();
        db.ensure_user_portal(&mut membership("l2", &portal)).unwrap();

        db.mark_user_portal_preferred(&l1, &portal).unwrap();
        db.mark_user_portal_preferred(&l2, &portal).unwrap();

        let rows = db
            .get_user_portals_in_portal_for_user(&LocalUserId::from("@alice:local"), &portal)
            .unwrap();
        let preferred: Vec<_> = rows.iter().filter(|r| r.preferred).map(|r| r.login_id.clone()).collect();
        assert_eq!(preferred, vec![UserLoginId::from("l2")]);
    }

    #[test]
    fn user_portal_update_persists_metadata() {
        let db = setup();
        db.insert_user_login(&mut login("l1")).unwrap();
        let portal = PortalKey::with_receiver("dm", "l1");
        let mut row = membership("l1", &portal);
        db.ensure_user_portal(&mut row).unwrap();

        row.in_space = true;
        row.metadata.extra.insert("muted_until".to_string(), serde_json::json!(42));
        db.update_user_portal(&mut row).unwrap();

        let loaded = db.get_user_portal(&UserLoginId::from("l1"), &portal).unwrap().unwrap();
        assert_eq!(loaded, row);
    }
}
