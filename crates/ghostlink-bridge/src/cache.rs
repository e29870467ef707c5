use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ghostlink_types::ids::{LocalUserId, UserId, UserLoginId};
use tokio::sync::{Mutex, MutexGuard};

use crate::ghost::Ghost;
use crate::user::User;
use crate::user_login::UserLogin;

#[derive(Default)]
pub(crate) struct CacheMaps {
    ghosts: HashMap<UserId, Arc<Ghost>>,
    users: HashMap<LocalUserId, Arc<User>>,
    logins: HashMap<UserLoginId, Arc<UserLogin>>,
    logins_by_user: HashMap<LocalUserId, HashSet<UserLoginId>>,
}

/// Identity map for live entities. One lock guards every map; callers hold
/// it across the whole lookup-load-insert sequence so a miss is resolved
/// exactly once.
#[derive(Default)]
pub(crate) struct EntityCache {
    maps: Mutex<CacheMaps>,
}

impl EntityCache {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, CacheMaps> {
        self.maps.lock().await
    }
}

impl CacheMaps {
    pub(crate) fn ghost(&self, id: &UserId) -> Option<Arc<Ghost>> {
        self.ghosts.get(id).cloned()
    }

    pub(crate) fn insert_ghost(&mut self, ghost: Arc<Ghost>) {
        self.ghosts.insert(ghost.id().clone(), ghost);
    }

    pub(crate) fn user(&self, mxid: &LocalUserId) -> Option<Arc<User>> {
        self.users.get(mxid).cloned()
    }

    pub(crate) fn insert_user(&mut self, user: Arc<User>) {
        self.users.insert(user.mxid().clone(), user);
    }

    pub(crate) fn login(&self, id: &UserLoginId) -> Option<Arc<UserLogin>> {
        self.logins.get(id).cloned()
    }

    pub(crate) fn insert_login(&mut self, login: Arc<UserLogin>) {
        self.logins_by_user
            .entry(login.user_mxid().clone())
            .or_default()
            .insert(login.id().clone());
        self.logins.insert(login.id().clone(), login);
    }

    /// Whether `login` is the live instance for its id.
    pub(crate) fn is_cached(&self, login: &Arc<UserLogin>) -> bool {
        self.logins
            .get(login.id())
            .is_some_and(|cached| Arc::ptr_eq(cached, login))
    }

    /// Drops `login` from both indexes if it is still the cached instance
    /// for its id. Returns whether anything was removed.
    pub(crate) fn remove_login(&mut self, login: &Arc<UserLogin>) -> bool {
        if !self.is_cached(login) {
            return false;
        }
        self.logins.remove(login.id());
        if let Some(ids) = self.logins_by_user.get_mut(login.user_mxid()) {
            ids.remove(login.id());
            if ids.is_empty() {
                self.logins_by_user.remove(login.user_mxid());
            }
        }
        true
    }

    /// Cached logins of one local account, in login id order.
    pub(crate) fn logins_for_user(&self, mxid: &LocalUserId) -> Vec<Arc<UserLogin>> {
        let Some(ids) = self.logins_by_user.get(mxid) else {
            return Vec::new();
        };
        let mut logins: Vec<_> = ids.iter().filter_map(|id| self.login(id)).collect();
        logins.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        logins
    }

    pub(crate) fn all_logins(&self) -> Vec<Arc<UserLogin>> {
        self.logins.values().cloned().collect()
    }
}
