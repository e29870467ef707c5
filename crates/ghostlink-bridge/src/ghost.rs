use std::sync::Arc;

use ghostlink_db::models::GhostRow;
use ghostlink_types::events::RemoteEventType;
use ghostlink_types::ids::{ContentUri, UserId};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::avatar::Avatar;
use crate::bridge::BridgeContext;
use crate::connector::{LocalIntent, ProfileExtra};
use crate::updaters::ExtraUpdater;
use crate::user_login::UserLogin;

/// Profile of a remote user as reported by the network. `None` fields are
/// left untouched.
#[derive(Default)]
pub struct UserInfo {
    pub identifiers: Option<Vec<String>>,
    pub name: Option<String>,
    pub avatar: Option<Avatar>,
    pub is_bot: Option<bool>,
    pub extra_updates: Option<ExtraUpdater<GhostRow>>,
}

/// Outcome of a reconciliation step. `changed` is true whenever the cached
/// state was modified, even if the local-side write then failed; the failure
/// is carried in `warning` and retried on a later reconciliation.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changed {
    pub changed: bool,
    pub warning: Option<String>,
}

impl Changed {
    pub const fn none() -> Self {
        Self {
            changed: false,
            warning: None,
        }
    }

    pub const fn updated() -> Self {
        Self {
            changed: true,
            warning: None,
        }
    }

    fn soft_failure(context: &str, err: &anyhow::Error) -> Self {
        Self {
            changed: true,
            warning: Some(format!("{context}: {err:#}")),
        }
    }

    pub fn or(self, other: Changed) -> Changed {
        let warning = match (self.warning, other.warning) {
            (Some(a), Some(b)) => Some(format!("{a}; {b}")),
            (a, b) => a.or(b),
        };
        Changed {
            changed: self.changed || other.changed,
            warning,
        }
    }
}

/// In-memory shadow of one remote user. At most one exists per user id; get
/// it through [`crate::Bridge::get_ghost_by_id`].
///
/// Reconciliation on one ghost is serialized by its row lock, which is held
/// across the local-side writes of a single update.
pub struct Ghost {
    id: UserId,
    row: Mutex<GhostRow>,
    intent: Arc<dyn LocalIntent>,
    ctx: Arc<BridgeContext>,
}

impl Ghost {
    pub(crate) fn new(ctx: Arc<BridgeContext>, row: GhostRow) -> Self {
        let intent = ctx.local.ghost_intent(&row.id);
        Self {
            id: row.id.clone(),
            row: Mutex::new(row),
            intent,
            ctx,
        }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn intent(&self) -> &Arc<dyn LocalIntent> {
        &self.intent
    }

    /// Snapshot of the cached row.
    pub async fn row(&self) -> GhostRow {
        self.row.lock().await.clone()
    }

    pub async fn update_name(&self, name: &str) -> Changed {
        let mut row = self.row.lock().await;
        let result = self.apply_name(&mut row, name).await;
        self.persist_if_changed(&mut row, result)
    }

    pub async fn update_avatar(&self, avatar: &Avatar) -> Changed {
        let mut row = self.row.lock().await;
        let result = self.apply_avatar(&mut row, avatar).await;
        self.persist_if_changed(&mut row, result)
    }

    pub async fn update_contact_info(
        &self,
        identifiers: Option<Vec<String>>,
        is_bot: Option<bool>,
    ) -> Changed {
        let mut row = self.row.lock().await;
        let result = self.apply_contact_info(&mut row, identifiers, is_bot).await;
        self.persist_if_changed(&mut row, result)
    }

    /// Applies every present field of `info`, then saves the ghost once if
    /// anything changed.
    pub async fn update_info(&self, info: UserInfo) -> Changed {
        let mut row = self.row.lock().await;
        let mut result = Changed::none();
        if let Some(name) = &info.name {
            result = result.or(self.apply_name(&mut row, name).await);
        }
        if let Some(avatar) = &info.avatar {
            result = result.or(self.apply_avatar(&mut row, avatar).await);
        }
        if info.identifiers.is_some() || info.is_bot.is_some() {
            result = result.or(
                self.apply_contact_info(&mut row, info.identifiers, info.is_bot)
                    .await,
            );
        }
        if let Some(extra) = &info.extra_updates {
            if extra(&mut row) {
                result = result.or(Changed::updated());
            }
        }
        self.persist_if_changed(&mut row, result)
    }

    /// Refreshes the profile through `source` unless the name is already
    /// confirmed. Networks with aggressive updates refresh anyway on
    /// message-like events.
    pub async fn update_info_if_necessary(&self, source: &UserLogin, event: RemoteEventType) {
        {
            let row = self.row.lock().await;
            let aggressive = self.ctx.network.capabilities().aggressive_update_info
                && event.allows_aggressive_update();
            if !row.name.is_empty() && row.name_set && !aggressive {
                return;
            }
        }

        let Some(client) = source.client().await else {
            debug!(ghost_id = %self.id, login_id = %source.id(), "No client to fetch ghost info with");
            return;
        };
        match client.get_user_info(self).await {
            Ok(Some(info)) => {
                let result = self.update_info(info).await;
                debug!(
                    ghost_id = %self.id,
                    changed = result.changed,
                    warning = ?result.warning,
                    "Refreshed ghost info"
                );
            }
            Ok(None) => {}
            Err(e) => error!(ghost_id = %self.id, error = ?e, "Failed to get info to update ghost"),
        }
    }

    async fn apply_name(&self, row: &mut GhostRow, name: &str) -> Changed {
        if row.name == name && row.name_set {
            return Changed::none();
        }
        row.name = name.to_string();
        row.name_set = false;
        match self.intent.set_display_name(name).await {
            Ok(()) => {
                row.name_set = true;
                Changed::updated()
            }
            Err(e) => {
                warn!(ghost_id = %self.id, error = ?e, "Failed to set display name");
                Changed::soft_failure("set display name", &e)
            }
        }
    }

    async fn apply_avatar(&self, row: &mut GhostRow, avatar: &Avatar) -> Changed {
        if row.avatar_id == avatar.id && row.avatar_set {
            return Changed::none();
        }
        row.avatar_id = avatar.id.clone();

        if avatar.remove {
            row.avatar_mxc = ContentUri::default();
            row.avatar_hash = [0u8; 32];
        } else {
            let reuploaded = match avatar.reupload(self.intent.as_ref(), &row.avatar_hash).await {
                Ok(r) => r,
                Err(e) => {
                    row.avatar_set = false;
                    warn!(ghost_id = %self.id, error = ?e, "Failed to reupload avatar");
                    return Changed::soft_failure("reupload avatar", &e);
                }
            };
            if reuploaded.hash == row.avatar_hash && row.avatar_set {
                // Same picture under a new id; the local side already shows it.
                return Changed::updated();
            }
            if let Some(mxc) = reuploaded.mxc {
                row.avatar_mxc = mxc;
            }
            row.avatar_hash = reuploaded.hash;
        }

        row.avatar_set = false;
        match self.intent.set_avatar_url(&row.avatar_mxc).await {
            Ok(()) => {
                row.avatar_set = true;
                Changed::updated()
            }
            Err(e) => {
                warn!(ghost_id = %self.id, error = ?e, "Failed to set avatar URL");
                Changed::soft_failure("set avatar URL", &e)
            }
        }
    }

    async fn apply_contact_info(
        &self,
        row: &mut GhostRow,
        identifiers: Option<Vec<String>>,
        is_bot: Option<bool>,
    ) -> Changed {
        let identifiers = identifiers.map(|mut ids| {
            ids.sort();
            ids.dedup();
            ids
        });
        let meta = &mut row.metadata;
        if meta.contact_info_set
            && identifiers.as_ref().is_none_or(|ids| *ids == meta.identifiers)
            && is_bot.is_none_or(|bot| bot == meta.is_bot)
        {
            return Changed::none();
        }
        if let Some(ids) = identifiers {
            meta.identifiers = ids;
        }
        if let Some(bot) = is_bot {
            meta.is_bot = bot;
        }
        meta.contact_info_set = false;

        let name = self.ctx.network.name();
        let extra = ProfileExtra {
            remote_id: self.id.to_string(),
            identifiers: meta.identifiers.clone(),
            service: name.bridge_type,
            network: name.network_id,
            is_bridge_bot: false,
            is_network_bot: meta.is_bot,
        };
        match self.intent.set_extra_profile_meta(&extra).await {
            Ok(()) => {
                row.metadata.contact_info_set = true;
                Changed::updated()
            }
            Err(e) => {
                warn!(ghost_id = %self.id, error = ?e, "Failed to set extra profile metadata");
                Changed::soft_failure("set extra profile metadata", &e)
            }
        }
    }

    fn persist_if_changed(&self, row: &mut GhostRow, result: Changed) -> Changed {
        if !result.changed {
            return result;
        }
        match self.ctx.db.update_ghost(row) {
            Ok(()) => result,
            Err(e) => {
                error!(ghost_id = %self.id, error = ?e, "Failed to update ghost in database after updating info");
                result.or(Changed::soft_failure("save ghost", &e))
            }
        }
    }
}
