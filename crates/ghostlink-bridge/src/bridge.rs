use std::sync::Arc;

use ghostlink_db::Database;
use ghostlink_db::models::{GhostRow, UserLoginRow, UserPortalRow, UserRow};
use ghostlink_types::ids::{BridgeId, LocalUserId, PortalKey, UserId, UserLoginId};
use ghostlink_types::state::{BridgeState, StateEvent};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheMaps, EntityCache};
use crate::config::BridgeConfig;
use crate::connector::{BridgeStateSink, LocalConnector, NetworkApi, NetworkConnector};
use crate::error::{BridgeError, Result};
use crate::ghost::Ghost;
use crate::tasks::BackgroundTasks;
use crate::user::User;
use crate::user_login::UserLogin;

const EVICT_REASON: &str = "Logged out of the bridge";

/// Everything an entity needs to reach its collaborators. Entities hold an
/// `Arc` of this, never of the bridge itself, so the cache does not form a
/// reference cycle with its entries.
pub(crate) struct BridgeContext {
    pub(crate) config: BridgeConfig,
    pub(crate) db: Arc<Database>,
    pub(crate) local: Arc<dyn LocalConnector>,
    pub(crate) network: Arc<dyn NetworkConnector>,
    pub(crate) state_sink: Arc<dyn BridgeStateSink>,
    pub(crate) tasks: BackgroundTasks,
}

struct BridgeInner {
    ctx: Arc<BridgeContext>,
    cache: EntityCache,
}

/// Entry point for every ghost, user and login lookup. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        db: Arc<Database>,
        local: Arc<dyn LocalConnector>,
        network: Arc<dyn NetworkConnector>,
        state_sink: Arc<dyn BridgeStateSink>,
    ) -> Self {
        let ctx = BridgeContext {
            config,
            db,
            local,
            network,
            state_sink,
            tasks: BackgroundTasks::new(),
        };
        Self {
            inner: Arc::new(BridgeInner {
                ctx: Arc::new(ctx),
                cache: EntityCache::default(),
            }),
        }
    }

    fn ctx(&self) -> &Arc<BridgeContext> {
        &self.inner.ctx
    }

    pub fn id(&self) -> &BridgeId {
        self.ctx().db.bridge_id()
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.ctx().db
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx().config
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.ctx().tasks
    }

    // -- Ghosts --

    /// Returns the ghost for `id`, creating its row on first sight.
    pub async fn get_ghost_by_id(&self, id: &UserId) -> Result<Arc<Ghost>> {
        let mut cache = self.inner.cache.lock().await;
        if let Some(ghost) = cache.ghost(id) {
            return Ok(ghost);
        }
        let row = match self.query_ghost(id)? {
            Some(row) => row,
            None => {
                let mut row = GhostRow::new(self.id().clone(), id.clone());
                self.ctx()
                    .db
                    .insert_ghost(&mut row)
                    .map_err(|e| BridgeError::insert("ghost", id, e))?;
                debug!(ghost_id = %id, "Created new ghost");
                row
            }
        };
        let ghost = Arc::new(Ghost::new(self.ctx().clone(), row));
        cache.insert_ghost(ghost.clone());
        Ok(ghost)
    }

    pub async fn get_existing_ghost_by_id(&self, id: &UserId) -> Result<Option<Arc<Ghost>>> {
        let mut cache = self.inner.cache.lock().await;
        if let Some(ghost) = cache.ghost(id) {
            return Ok(Some(ghost));
        }
        let Some(row) = self.query_ghost(id)? else {
            return Ok(None);
        };
        let ghost = Arc::new(Ghost::new(self.ctx().clone(), row));
        cache.insert_ghost(ghost.clone());
        Ok(Some(ghost))
    }

    /// Resolves a local account id to its ghost. `None` if the account is not
    /// a ghost of this bridge.
    pub async fn get_ghost_by_local_id(&self, mxid: &LocalUserId) -> Result<Option<Arc<Ghost>>> {
        match self.ctx().local.parse_ghost_user_id(mxid) {
            Some(id) => self.get_ghost_by_id(&id).await.map(Some),
            None => Ok(None),
        }
    }

    fn query_ghost(&self, id: &UserId) -> Result<Option<GhostRow>> {
        self.ctx()
            .db
            .get_ghost_by_id(id)
            .map_err(|e| BridgeError::query("ghost", id, e))
    }

    // -- Users --

    pub async fn get_user_by_mxid(&self, mxid: &LocalUserId) -> Result<Arc<User>> {
        let mut cache = self.inner.cache.lock().await;
        if let Some(user) = cache.user(mxid) {
            return Ok(user);
        }
        let row = match self.query_user(mxid)? {
            Some(row) => row,
            None => {
                let mut row = UserRow {
                    bridge_id: self.id().clone(),
                    mxid: mxid.clone(),
                    management_room: None,
                };
                self.ctx()
                    .db
                    .insert_user(&mut row)
                    .map_err(|e| BridgeError::insert("user", mxid, e))?;
                row
            }
        };
        let user = Arc::new(User::new(self.ctx().clone(), row));
        cache.insert_user(user.clone());
        Ok(user)
    }

    pub async fn get_existing_user_by_mxid(&self, mxid: &LocalUserId) -> Result<Option<Arc<User>>> {
        let mut cache = self.inner.cache.lock().await;
        if let Some(user) = cache.user(mxid) {
            return Ok(Some(user));
        }
        let Some(row) = self.query_user(mxid)? else {
            return Ok(None);
        };
        let user = Arc::new(User::new(self.ctx().clone(), row));
        cache.insert_user(user.clone());
        Ok(Some(user))
    }

    fn query_user(&self, mxid: &LocalUserId) -> Result<Option<UserRow>> {
        self.ctx()
            .db
            .get_user_by_mxid(mxid)
            .map_err(|e| BridgeError::query("user", mxid, e))
    }

    // -- User logins --

    /// Registers a freshly authenticated login. The row is persisted before
    /// the login becomes visible in the cache.
    pub async fn new_login(
        &self,
        user: &User,
        mut row: UserLoginRow,
        client: Arc<dyn NetworkApi>,
    ) -> Result<Arc<UserLogin>> {
        row.user_mxid = user.mxid().clone();
        let mut cache = self.inner.cache.lock().await;
        self.ctx()
            .db
            .insert_user_login(&mut row)
            .map_err(|e| BridgeError::insert("user login", &row.id, e))?;
        let login = Arc::new(UserLogin::new(self.ctx().clone(), row, Some(client)));
        cache.insert_login(login.clone());
        info!(login_id = %login.id(), user_mxid = %login.user_mxid(), "Added new user login");
        Ok(login)
    }

    /// Cache lookup, falling back to storage. A login whose network client
    /// fails to load is reported as absent and not cached.
    pub async fn get_existing_user_login_by_id(
        &self,
        id: &UserLoginId,
    ) -> Result<Option<Arc<UserLogin>>> {
        let mut cache = self.inner.cache.lock().await;
        if let Some(login) = cache.login(id) {
            return Ok(Some(login));
        }
        let row = self
            .ctx()
            .db
            .get_user_login_by_id(id)
            .map_err(|e| BridgeError::query("user login", id, e))?;
        match row {
            Some(row) => Ok(self.load_user_login(&mut cache, row).await),
            None => Ok(None),
        }
    }

    /// Cache-only lookup.
    pub async fn get_cached_user_login_by_id(&self, id: &UserLoginId) -> Option<Arc<UserLogin>> {
        self.inner.cache.lock().await.login(id)
    }

    pub async fn get_user_logins_for_user(&self, user: &User) -> Result<Vec<Arc<UserLogin>>> {
        let rows = self
            .ctx()
            .db
            .get_user_logins_for_user(user.mxid())
            .map_err(|e| BridgeError::query("user logins of", user.mxid(), e))?;
        let mut cache = self.inner.cache.lock().await;
        for row in rows {
            self.load_user_login(&mut cache, row).await;
        }
        Ok(cache.logins_for_user(user.mxid()))
    }

    /// Logins with a membership in `portal`, loading any that are not cached.
    pub async fn get_user_logins_in_portal(&self, portal: &PortalKey) -> Result<Vec<Arc<UserLogin>>> {
        let rows = self
            .ctx()
            .db
            .get_user_logins_in_portal(portal)
            .map_err(|e| BridgeError::query("user logins in portal", portal, e))?;
        let mut cache = self.inner.cache.lock().await;
        let mut logins = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(login) = self.load_user_login(&mut cache, row).await {
                logins.push(login);
            }
        }
        Ok(logins)
    }

    /// Loads every stored login at startup. Logins that fail to load are
    /// skipped.
    pub async fn load_all_user_logins(&self) -> Result<Vec<Arc<UserLogin>>> {
        let rows = self
            .ctx()
            .db
            .get_all_user_logins()
            .map_err(|e| BridgeError::query("user login", "*", e))?;
        let total = rows.len();
        let mut cache = self.inner.cache.lock().await;
        let mut logins = Vec::with_capacity(total);
        for row in rows {
            if let Some(login) = self.load_user_login(&mut cache, row).await {
                logins.push(login);
            }
        }
        info!(loaded = logins.len(), total, "Loaded user logins");
        Ok(logins)
    }

    async fn load_user_login(
        &self,
        cache: &mut CacheMaps,
        row: UserLoginRow,
    ) -> Option<Arc<UserLogin>> {
        if let Some(login) = cache.login(&row.id) {
            return Some(login);
        }
        let login = Arc::new(UserLogin::new(self.ctx().clone(), row, None));
        match self.ctx().network.load_user_login(&login).await {
            Ok(client) => {
                login.set_client(client).await;
                cache.insert_login(login.clone());
                Some(login)
            }
            Err(e) => {
                error!(login_id = %login.id(), error = ?e, "Failed to load user login");
                login.bridge_state().destroy();
                None
            }
        }
    }

    /// Tears `login` down completely. Every storage and cleanup failure is
    /// logged and skipped; the login is out of the cache when this returns.
    /// A handle that is no longer the cached instance (already deleted, or
    /// replaced by a newer login with the same id) leaves storage and
    /// memberships alone, so calling this again is harmless.
    pub async fn delete_user_login(
        &self,
        login: &Arc<UserLogin>,
        state: Option<BridgeState>,
        logout_remote: bool,
    ) {
        let is_current = self.inner.cache.lock().await.is_cached(login);

        if logout_remote {
            login.logout_remote().await;
        } else {
            login.disconnect().await;
        }

        let mut memberships = Vec::new();
        if is_current {
            let db = &self.ctx().db;
            memberships = db.get_user_portals_for_login(login.id()).unwrap_or_else(|e| {
                error!(login_id = %login.id(), error = ?e, "Failed to get user portals before deleting login");
                Vec::new()
            });
            if let Err(e) = db.delete_user_login(login.id()) {
                error!(login_id = %login.id(), error = ?e, "Failed to delete user login");
            }
            let removed = self.inner.cache.lock().await.remove_login(login);
            debug!(login_id = %login.id(), removed, "Removed user login from cache");
        } else {
            debug!(login_id = %login.id(), "User login is not the cached instance, skipping storage cleanup");
        }

        if let Some(space) = login.take_space_room().await {
            let bot = self.ctx().local.bot_intent();
            let login_id = login.id().clone();
            self.tasks().spawn("delete space room", async move {
                bot.delete_room(&space).await?;
                debug!(login_id = %login_id, room_id = %space, "Deleted space room");
                Ok(())
            });
        }
        if !memberships.is_empty() {
            let ctx = self.ctx().clone();
            let login_id = login.id().clone();
            let mxid = login.user_mxid().clone();
            self.tasks().spawn(
                "evict user from portals",
                evict_from_portals(ctx, login_id, mxid, memberships),
            );
        }

        if let Some(state) = state {
            login.send_bridge_state(state).await;
        }
        login.bridge_state().destroy();
    }

    /// Logs the login out remotely and deletes it, reporting `LOGGED_OUT`.
    pub async fn logout_user_login(&self, login: &Arc<UserLogin>) {
        let state = BridgeState::new(StateEvent::LoggedOut);
        self.delete_user_login(login, Some(state), true).await;
    }

    /// Disconnects every cached login, then waits for background work.
    pub async fn shutdown(&self) {
        let logins = self.inner.cache.lock().await.all_logins();
        info!(count = logins.len(), "Disconnecting user logins");
        futures_util::future::join_all(logins.iter().map(|login| login.disconnect())).await;
        self.tasks().shutdown().await;
        info!("Bridge stopped");
    }
}

/// Kicks the login's local account from each conversation it no longer has
/// any login in.
async fn evict_from_portals(
    ctx: Arc<BridgeContext>,
    login_id: UserLoginId,
    mxid: LocalUserId,
    memberships: Vec<UserPortalRow>,
) -> anyhow::Result<()> {
    let bot = ctx.local.bot_intent();
    let mut failed = 0usize;
    for membership in memberships {
        let portal = &membership.portal;
        let remaining = match ctx.db.get_user_portals_in_portal_for_user(&mxid, portal) {
            Ok(rows) => rows.into_iter().any(|row| row.login_id != login_id),
            Err(e) => {
                warn!(portal = %portal, error = ?e, "Failed to check remaining logins in portal");
                failed += 1;
                continue;
            }
        };
        if remaining {
            debug!(portal = %portal, user_mxid = %mxid, "User still has another login in portal");
            continue;
        }
        let room = match ctx.local.portal_room(portal).await {
            Ok(Some(room)) => room,
            Ok(None) => continue,
            Err(e) => {
                warn!(portal = %portal, error = ?e, "Failed to resolve portal room");
                failed += 1;
                continue;
            }
        };
        if let Err(e) = bot.kick_user(&room, &mxid, EVICT_REASON).await {
            warn!(portal = %portal, room_id = %room, error = ?e, "Failed to kick user from portal");
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("failed to evict {mxid} from {failed} portals");
    }
    Ok(())
}
