use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use ghostlink_db::models::{UserLoginRow, UserPortalRow};
use ghostlink_types::ids::{LocalUserId, PortalKey, RoomId, UserLoginId};
use ghostlink_types::state::{BridgeState, LoginState};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::bridge::BridgeContext;
use crate::connector::NetworkApi;
use crate::error::{BridgeError, Result};
use crate::state_queue::BridgeStateQueue;
use crate::updaters::ExtraUpdater;

/// One authenticated session to the remote network. At most one instance
/// per login id is alive in the process; the bridge cache enforces that.
pub struct UserLogin {
    id: UserLoginId,
    user_mxid: LocalUserId,
    row: Mutex<UserLoginRow>,
    client: RwLock<Option<Arc<dyn NetworkApi>>>,
    state: Mutex<LoginState>,
    bridge_state: BridgeStateQueue,
    in_portal_cache: Mutex<HashSet<PortalKey>>,
    space_create_lock: Mutex<()>,
    ctx: Arc<BridgeContext>,
}

impl UserLogin {
    pub(crate) fn new(
        ctx: Arc<BridgeContext>,
        row: UserLoginRow,
        client: Option<Arc<dyn NetworkApi>>,
    ) -> Self {
        Self {
            id: row.id.clone(),
            user_mxid: row.user_mxid.clone(),
            row: Mutex::new(row.clone()),
            client: RwLock::new(client),
            state: Mutex::new(LoginState::Active),
            bridge_state: BridgeStateQueue::new(row.id, ctx.state_sink.clone()),
            in_portal_cache: Mutex::new(HashSet::new()),
            space_create_lock: Mutex::new(()),
            ctx,
        }
    }

    pub fn id(&self) -> &UserLoginId {
        &self.id
    }

    pub fn user_mxid(&self) -> &LocalUserId {
        &self.user_mxid
    }

    pub async fn row(&self) -> UserLoginRow {
        self.row.lock().await.clone()
    }

    pub async fn remote_name(&self) -> String {
        self.row.lock().await.metadata.remote_name.clone()
    }

    pub async fn set_remote_name(&self, name: impl Into<String>) -> Result<()> {
        let mut row = self.row.lock().await;
        row.metadata.remote_name = name.into();
        self.save_locked(&mut row)
    }

    pub async fn space_room(&self) -> Option<RoomId> {
        self.row.lock().await.space_room.clone()
    }

    pub async fn client(&self) -> Option<Arc<dyn NetworkApi>> {
        self.client.read().await.clone()
    }

    pub(crate) async fn set_client(&self, client: Arc<dyn NetworkApi>) {
        *self.client.write().await = Some(client);
    }

    pub async fn state(&self) -> LoginState {
        *self.state.lock().await
    }

    pub async fn save(&self) -> Result<()> {
        let mut row = self.row.lock().await;
        self.save_locked(&mut row)
    }

    fn save_locked(&self, row: &mut UserLoginRow) -> Result<()> {
        self.ctx
            .db
            .update_user_login(row)
            .map_err(|e| BridgeError::save("user login", &self.id, e))
    }

    /// Queues a bridge state report, filled with this login's identity.
    pub async fn send_bridge_state(&self, mut state: BridgeState) {
        if state.remote_name.is_empty() {
            state.remote_name = self.remote_name().await;
        }
        self.bridge_state.send(state);
    }

    pub(crate) fn bridge_state(&self) -> &BridgeStateQueue {
        &self.bridge_state
    }

    /// Whether this login participates in `portal`. Positive answers are
    /// cached; negative ones are checked against storage every time.
    pub async fn is_in_portal(&self, portal: &PortalKey) -> Result<bool> {
        if self.in_portal_cache.lock().await.contains(portal) {
            return Ok(true);
        }
        let exists = self
            .ctx
            .db
            .get_user_portal(&self.id, portal)
            .map_err(|e| BridgeError::query("user portal", portal, e))?
            .is_some();
        if exists {
            self.in_portal_cache.lock().await.insert(portal.clone());
        }
        Ok(exists)
    }

    /// Records that this login participates in `portal`. Returns true if the
    /// membership is new.
    pub async fn add_to_portal(&self, portal: &PortalKey) -> Result<bool> {
        let mut membership = UserPortalRow {
            user_mxid: self.user_mxid.clone(),
            login_id: self.id.clone(),
            portal: portal.clone(),
            ..Default::default()
        };
        let inserted = self
            .ctx
            .db
            .ensure_user_portal(&mut membership)
            .map_err(|e| BridgeError::insert("user portal", portal, e))?;
        self.in_portal_cache.lock().await.insert(portal.clone());
        Ok(inserted)
    }

    pub async fn mark_as_preferred_in(&self, portal: &PortalKey) -> Result<()> {
        let row = self.row().await;
        self.ctx
            .db
            .mark_user_portal_preferred(&row, portal)
            .map_err(|e| BridgeError::save("user portal", portal, e))
    }

    /// Runs `update` against this login's membership in `portal` and saves
    /// it if anything changed.
    pub async fn update_portal_metadata(
        &self,
        portal: &PortalKey,
        update: &ExtraUpdater<UserPortalRow>,
    ) -> Result<bool> {
        let mut membership = self
            .ctx
            .db
            .get_user_portal(&self.id, portal)
            .map_err(|e| BridgeError::query("user portal", portal, e))?
            .ok_or_else(|| BridgeError::NotInPortal(self.id.to_string(), portal.to_string()))?;
        if !update(&mut membership) {
            return Ok(false);
        }
        self.ctx
            .db
            .update_user_portal(&mut membership)
            .map_err(|e| BridgeError::save("user portal", portal, e))?;
        Ok(true)
    }

    /// Returns the login's space room, creating it with `create` on first
    /// use. Concurrent callers wait for the first creation instead of
    /// creating duplicates.
    pub async fn ensure_space_room<F, Fut>(&self, create: F) -> anyhow::Result<RoomId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<RoomId>>,
    {
        let _creating = self.space_create_lock.lock().await;
        if let Some(room) = self.space_room().await {
            return Ok(room);
        }
        let room = create().await?;
        let mut row = self.row.lock().await;
        row.space_room = Some(room.clone());
        self.save_locked(&mut row)?;
        Ok(room)
    }

    pub(crate) async fn take_space_room(&self) -> Option<RoomId> {
        self.row.lock().await.space_room.take()
    }

    /// Disconnects the remote client, waiting at most the configured timeout
    /// for it to acknowledge. Always ends in a terminal state.
    pub async fn disconnect(&self) {
        if let Some(client) = self.take_client().await {
            self.wait_bounded("disconnection", async move { client.disconnect().await })
                .await;
        }
        self.finish(LoginState::Disconnected).await;
    }

    /// Logs out on the remote side if a client is still attached, otherwise
    /// falls back to a plain disconnect.
    pub(crate) async fn logout_remote(&self) {
        match self.take_client().await {
            Some(client) => {
                self.wait_bounded("logout", async move { client.logout_remote().await })
                    .await;
                self.finish(LoginState::LoggedOut).await;
            }
            None => self.disconnect().await,
        }
    }

    async fn take_client(&self) -> Option<Arc<dyn NetworkApi>> {
        let client = self.client.write().await.take();
        if client.is_some() {
            *self.state.lock().await = LoginState::Disconnecting;
        }
        client
    }

    async fn finish(&self, terminal: LoginState) {
        let mut state = self.state.lock().await;
        if !state.is_terminal() {
            *state = terminal;
        }
    }

    async fn wait_bounded<F>(&self, what: &'static str, call: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(call);
        match tokio::time::timeout(self.ctx.config.disconnect_timeout, handle).await {
            Ok(Ok(())) => debug!(login_id = %self.id, "Client {} finished", what),
            Ok(Err(e)) => warn!(login_id = %self.id, error = ?e, "Client {} failed", what),
            Err(_) => warn!(login_id = %self.id, "Client {} timed out", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::testutil::{TestBridge, test_bridge};
    use crate::updaters::number_metadata_updater;
    use ghostlink_types::state::StateEvent;
    use serde_json::json;

    async fn login(t: &TestBridge, id: &str) -> Arc<UserLogin> {
        let user = t.bridge.get_user_by_mxid(&LocalUserId::from("u1")).await.unwrap();
        let row = UserLoginRow {
            id: UserLoginId::from(id),
            ..Default::default()
        };
        t.bridge.new_login(&user, row, t.network.client()).await.unwrap()
    }

    #[tokio::test]
    async fn portal_membership_is_recorded_once() {
        let t = test_bridge();
        let login = login(&t, "l1").await;
        let portal = PortalKey::with_receiver("chat", "l1");

        assert!(!login.is_in_portal(&portal).await.unwrap());
        assert!(login.add_to_portal(&portal).await.unwrap());
        assert!(!login.add_to_portal(&portal).await.unwrap());
        assert!(login.is_in_portal(&portal).await.unwrap());
        assert!(!login.is_in_portal(&PortalKey::new("chat")).await.unwrap());
    }

    #[tokio::test]
    async fn preferred_login_is_exclusive() {
        let t = test_bridge();
        let a = login(&t, "l1").await;
        let b = login(&t, "l2").await;
        let portal = PortalKey::new("chat");
        a.add_to_portal(&portal).await.unwrap();
        b.add_to_portal(&portal).await.unwrap();

        a.mark_as_preferred_in(&portal).await.unwrap();
        b.mark_as_preferred_in(&portal).await.unwrap();

        let db = t.bridge.db();
        assert!(!db.get_user_portal(a.id(), &portal).unwrap().unwrap().preferred);
        assert!(db.get_user_portal(b.id(), &portal).unwrap().unwrap().preferred);
    }

    #[tokio::test]
    async fn portal_metadata_updates_persist_on_change() {
        let t = test_bridge();
        let login = login(&t, "l1").await;
        let portal = PortalKey::new("chat");
        let update = number_metadata_updater::<UserPortalRow, i64>("unread", 3);

        let missing = login.update_portal_metadata(&portal, &update).await;
        assert!(matches!(missing, Err(BridgeError::NotInPortal(..))));

        login.add_to_portal(&portal).await.unwrap();
        assert!(login.update_portal_metadata(&portal, &update).await.unwrap());
        assert!(!login.update_portal_metadata(&portal, &update).await.unwrap());

        let row = t.bridge.db().get_user_portal(login.id(), &portal).unwrap().unwrap();
        assert_eq!(row.metadata.extra["unread"], json!(3));
    }

    #[tokio::test]
    async fn concurrent_space_creation_creates_one_room() {
        let t = test_bridge();
        let login = login(&t, "l1").await;
        let created = AtomicUsize::new(0);
        let counter = &created;
        let create = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(RoomId::from("!space"))
        };

        let (a, b) = tokio::join!(login.ensure_space_room(create), login.ensure_space_room(create));
        assert_eq!(a.unwrap(), RoomId::from("!space"));
        assert_eq!(b.unwrap(), RoomId::from("!space"));
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let row = t.bridge.db().get_user_login_by_id(login.id()).unwrap().unwrap();
        assert_eq!(row.space_room, Some(RoomId::from("!space")));
    }

    #[tokio::test]
    async fn disconnect_gives_up_after_timeout() {
        let t = test_bridge();
        t.network.hang_clients();
        let login = login(&t, "l1").await;
        let client = t.network.last_client();

        let started = Instant::now();
        login.disconnect().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.disconnects(), 1);
        assert_eq!(login.state().await, LoginState::Disconnected);
        assert!(login.client().await.is_none());

        login.disconnect().await;
        assert_eq!(client.disconnects(), 1);
    }

    #[tokio::test]
    async fn bridge_states_carry_remote_name() {
        let t = test_bridge();
        let login = login(&t, "l1").await;
        login.set_remote_name("+1 555 0100").await.unwrap();

        login.send_bridge_state(BridgeState::new(StateEvent::Connected)).await;
        let (_, state) = t.sink.next().await;
        assert_eq!(state.remote_name, "+1 555 0100");
        assert_eq!(state.remote_id, "l1");

        let row = t.bridge.db().get_user_login_by_id(login.id()).unwrap().unwrap();
        assert_eq!(row.metadata.remote_name, "+1 555 0100");
    }
}
