use std::sync::Arc;

use ghostlink_db::models::UserRow;
use ghostlink_types::ids::{LocalUserId, RoomId};
use tokio::sync::Mutex;

use crate::bridge::BridgeContext;
use crate::error::{BridgeError, Result};

/// A local account. Owns zero or more logins; the logins themselves are
/// indexed by the bridge cache.
pub struct User {
    mxid: LocalUserId,
    row: Mutex<UserRow>,
    ctx: Arc<BridgeContext>,
}

impl User {
    pub(crate) fn new(ctx: Arc<BridgeContext>, row: UserRow) -> Self {
        Self {
            mxid: row.mxid.clone(),
            row: Mutex::new(row),
            ctx,
        }
    }

    pub fn mxid(&self) -> &LocalUserId {
        &self.mxid
    }

    pub async fn management_room(&self) -> Option<RoomId> {
        self.row.lock().await.management_room.clone()
    }

    pub async fn set_management_room(&self, room: Option<RoomId>) -> Result<()> {
        let mut row = self.row.lock().await;
        row.management_room = room;
        self.ctx
            .db
            .update_user(&mut row)
            .map_err(|e| BridgeError::save("user", &self.mxid, e))
    }
}
