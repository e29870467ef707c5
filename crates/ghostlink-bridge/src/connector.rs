//! Capabilities the bridge core consumes from its collaborators: the local
//! messaging side, the remote network, and wherever bridge states are
//! reported to.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ghostlink_types::ids::{ContentUri, LocalUserId, PortalKey, RoomId, UserId, UserLoginId};
use ghostlink_types::state::BridgeState;
use serde::Serialize;

use crate::ghost::{Ghost, UserInfo};
use crate::user_login::UserLogin;

/// Extra profile fields published for a ghost on the local side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileExtra {
    pub remote_id: String,
    pub identifiers: Vec<String>,
    pub service: String,
    pub network: String,
    pub is_bridge_bot: bool,
    pub is_network_bot: bool,
}

/// Acts on the local side as one particular account (a ghost or the bridge
/// bot).
#[async_trait]
pub trait LocalIntent: Send + Sync {
    async fn set_display_name(&self, name: &str) -> Result<()>;

    /// An empty uri removes the avatar.
    async fn set_avatar_url(&self, uri: &ContentUri) -> Result<()>;

    async fn set_extra_profile_meta(&self, meta: &ProfileExtra) -> Result<()>;

    /// Returns the content reference and the stored size in bytes.
    async fn upload_media(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<(ContentUri, u64)>;

    async fn delete_room(&self, room: &RoomId) -> Result<()>;

    async fn kick_user(&self, room: &RoomId, user: &LocalUserId, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait LocalConnector: Send + Sync {
    fn ghost_intent(&self, id: &UserId) -> Arc<dyn LocalIntent>;

    fn bot_intent(&self) -> Arc<dyn LocalIntent>;

    /// Maps a local account id back to the remote user it shadows, if it is
    /// a ghost.
    fn parse_ghost_user_id(&self, mxid: &LocalUserId) -> Option<UserId>;

    /// The local room a conversation is bridged into, if it has one.
    async fn portal_room(&self, portal: &PortalKey) -> Result<Option<RoomId>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkName {
    pub display_name: String,
    pub network_id: String,
    pub bridge_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCapabilities {
    /// Refresh sender profiles on routine events even when the name is
    /// already known.
    pub aggressive_update_info: bool,
}

#[async_trait]
pub trait NetworkConnector: Send + Sync {
    fn name(&self) -> NetworkName;

    fn capabilities(&self) -> NetworkCapabilities;

    /// Builds the remote client for a login loaded from storage. A failure
    /// leaves the login unavailable until the next lookup.
    async fn load_user_login(&self, login: &UserLogin) -> Result<Arc<dyn NetworkApi>>;
}

/// A remote-network client bound to one login.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn get_user_info(&self, ghost: &Ghost) -> Result<Option<UserInfo>>;

    async fn disconnect(&self);

    async fn logout_remote(&self);
}

#[async_trait]
pub trait BridgeStateSink: Send + Sync {
    async fn push(&self, login_id: &UserLoginId, state: &BridgeState) -> Result<()>;
}
