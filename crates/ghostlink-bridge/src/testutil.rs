//! In-memory fakes for the bridge's collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use ghostlink_db::Database;
use ghostlink_types::ids::{BridgeId, ContentUri, LocalUserId, PortalKey, RoomId, UserId, UserLoginId};
use ghostlink_types::state::BridgeState;
use tokio::sync::mpsc;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::connector::{
    BridgeStateSink, LocalConnector, LocalIntent, NetworkApi, NetworkCapabilities,
    NetworkConnector, NetworkName, ProfileExtra,
};
use crate::ghost::{Ghost, UserInfo};
use crate::user_login::UserLogin;

#[derive(Debug, Clone, Default)]
pub struct IntentCalls {
    /// `(file_name, mime)` per upload.
    pub uploads: Vec<(String, String)>,
    pub display_names: Vec<String>,
    pub avatar_urls: Vec<ContentUri>,
    pub profile_metas: Vec<ProfileExtra>,
    pub deleted_rooms: Vec<RoomId>,
    pub kicks: Vec<(RoomId, LocalUserId)>,
}

/// Records every call. With `fail_writes` set, profile writes are recorded
/// and then rejected.
#[derive(Default)]
pub struct FakeIntent {
    calls: Mutex<IntentCalls>,
    pub fail_writes: AtomicBool,
}

impl FakeIntent {
    pub fn calls(&self) -> IntentCalls {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn write_result(&self, what: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("{what} rejected");
        }
        Ok(())
    }
}

#[async_trait]
impl LocalIntent for FakeIntent {
    async fn set_display_name(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().display_names.push(name.to_string());
        self.write_result("display name")
    }

    async fn set_avatar_url(&self, uri: &ContentUri) -> Result<()> {
        self.calls.lock().unwrap().avatar_urls.push(uri.clone());
        self.write_result("avatar url")
    }

    async fn set_extra_profile_meta(&self, meta: &ProfileExtra) -> Result<()> {
        self.calls.lock().unwrap().profile_metas.push(meta.clone());
        self.write_result("profile meta")
    }

    async fn upload_media(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<(ContentUri, u64)> {
        let mut calls = self.calls.lock().unwrap();
        calls.uploads.push((file_name.to_string(), mime.to_string()));
        let uri = ContentUri::new(format!("mxc://local/{}", calls.uploads.len()));
        Ok((uri, data.len() as u64))
    }

    async fn delete_room(&self, room: &RoomId) -> Result<()> {
        self.calls.lock().unwrap().deleted_rooms.push(room.clone());
        Ok(())
    }

    async fn kick_user(&self, room: &RoomId, user: &LocalUserId, _reason: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .kicks
            .push((room.clone(), user.clone()));
        Ok(())
    }
}

/// Every ghost shares the `ghosts` intent. Ghost accounts are `ghost_<id>`.
#[derive(Default)]
pub struct FakeLocal {
    pub ghosts: Arc<FakeIntent>,
    pub bot: Arc<FakeIntent>,
    rooms: Mutex<HashMap<PortalKey, RoomId>>,
}

impl FakeLocal {
    pub fn set_portal_room(&self, portal: &PortalKey, room: RoomId) {
        self.rooms.lock().unwrap().insert(portal.clone(), room);
    }
}

#[async_trait]
impl LocalConnector for FakeLocal {
    fn ghost_intent(&self, _id: &UserId) -> Arc<dyn LocalIntent> {
        self.ghosts.clone()
    }

    fn bot_intent(&self) -> Arc<dyn LocalIntent> {
        self.bot.clone()
    }

    fn parse_ghost_user_id(&self, mxid: &LocalUserId) -> Option<UserId> {
        mxid.as_str().strip_prefix("ghost_").map(UserId::from)
    }

    async fn portal_room(&self, portal: &PortalKey) -> Result<Option<RoomId>> {
        Ok(self.rooms.lock().unwrap().get(portal).cloned())
    }
}

#[derive(Default)]
pub struct FakeClient {
    hang: bool,
    user_name: Option<String>,
    disconnects: AtomicUsize,
    logouts: AtomicUsize,
    info_calls: AtomicUsize,
}

impl FakeClient {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    async fn maybe_hang(&self) {
        if self.hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl NetworkApi for FakeClient {
    async fn get_user_info(&self, _ghost: &Ghost) -> Result<Option<UserInfo>> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.user_name.clone().map(|name| UserInfo {
            name: Some(name),
            ..Default::default()
        }))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;
    }

    async fn logout_remote(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    loads: AtomicUsize,
    failing: Mutex<HashSet<UserLoginId>>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
    hang: AtomicBool,
    aggressive: AtomicBool,
    user_name: Mutex<Option<String>>,
}

impl FakeNetwork {
    /// A new client, remembered for [`Self::last_client`].
    pub fn client(&self) -> Arc<dyn NetworkApi> {
        self.new_client()
    }

    fn new_client(&self) -> Arc<FakeClient> {
        let client = Arc::new(FakeClient {
            hang: self.hang.load(Ordering::SeqCst),
            user_name: self.user_name.lock().unwrap().clone(),
            ..Default::default()
        });
        self.clients.lock().unwrap().push(client.clone());
        client
    }

    pub fn last_client(&self) -> Arc<FakeClient> {
        self.clients.lock().unwrap().last().cloned().unwrap()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn fail_loads_for(&self, id: &UserLoginId) {
        self.failing.lock().unwrap().insert(id.clone());
    }

    pub fn allow_loads_for(&self, id: &UserLoginId) {
        self.failing.lock().unwrap().remove(id);
    }

    /// Clients created from now on never finish disconnecting or logging out.
    pub fn hang_clients(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn set_aggressive_updates(&self, aggressive: bool) {
        self.aggressive.store(aggressive, Ordering::SeqCst);
    }

    /// Name returned by `get_user_info` on clients created from now on.
    pub fn set_user_name(&self, name: &str) {
        *self.user_name.lock().unwrap() = Some(name.to_string());
    }
}

#[async_trait]
impl NetworkConnector for FakeNetwork {
    fn name(&self) -> NetworkName {
        NetworkName {
            display_name: "Fake".to_string(),
            network_id: "fakenet".to_string(),
            bridge_type: "fake".to_string(),
        }
    }

    fn capabilities(&self) -> NetworkCapabilities {
        NetworkCapabilities {
            aggressive_update_info: self.aggressive.load(Ordering::SeqCst),
        }
    }

    async fn load_user_login(&self, login: &UserLogin) -> Result<Arc<dyn NetworkApi>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        // Long enough for concurrent lookups to pile up behind the first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.failing.lock().unwrap().contains(login.id()) {
            bail!("login {} rejected by network", login.id());
        }
        Ok(self.new_client())
    }
}

pub struct RecordingSink {
    tx: mpsc::UnboundedSender<(UserLoginId, BridgeState)>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(UserLoginId, BridgeState)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub async fn next(&self) -> (UserLoginId, BridgeState) {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a bridge state")
            .expect("sink closed")
    }

    /// True if no further state arrives within a short grace period.
    pub async fn nothing_more(&self) -> bool {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    }
}

#[async_trait]
impl BridgeStateSink for RecordingSink {
    async fn push(&self, login_id: &UserLoginId, state: &BridgeState) -> Result<()> {
        self.tx
            .send((login_id.clone(), state.clone()))
            .map_err(|_| anyhow::anyhow!("recording sink dropped"))
    }
}

pub struct TestBridge {
    pub bridge: Bridge,
    pub local: Arc<FakeLocal>,
    pub network: Arc<FakeNetwork>,
    pub sink: Arc<RecordingSink>,
}

pub fn test_bridge() -> TestBridge {
    let db = Database::open_in_memory(BridgeId::from("test")).unwrap();
    test_bridge_with_db(Arc::new(db))
}

pub fn test_bridge_with_db(db: Arc<Database>) -> TestBridge {
    let config = BridgeConfig {
        bridge_id: db.bridge_id().clone(),
        disconnect_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let local = Arc::new(FakeLocal::default());
    let network = Arc::new(FakeNetwork::default());
    let sink = RecordingSink::new();
    let bridge = Bridge::new(config, db, local.clone(), network.clone(), sink.clone());
    TestBridge {
        bridge,
        local,
        network,
        sink,
    }
}
