use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use ghostlink_types::ids::UserLoginId;
use ghostlink_types::state::BridgeState;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connector::BridgeStateSink;

/// Per-login queue of bridge state reports. States are delivered to the
/// sink in order by one worker task; `destroy` lets the worker drain what
/// is already queued and exit.
pub struct BridgeStateQueue {
    login_id: UserLoginId,
    tx: Mutex<Option<mpsc::UnboundedSender<BridgeState>>>,
}

impl BridgeStateQueue {
    pub fn new(login_id: UserLoginId, sink: Arc<dyn BridgeStateSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(login_id.clone(), rx, sink));
        Self {
            login_id,
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn send(&self, state: BridgeState) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) if tx.send(state).is_ok() => {}
            _ => debug!(login_id = %self.login_id, "Dropping bridge state sent after destroy"),
        }
    }

    pub fn destroy(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_destroyed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

async fn run_queue(
    login_id: UserLoginId,
    mut rx: mpsc::UnboundedReceiver<BridgeState>,
    sink: Arc<dyn BridgeStateSink>,
) {
    while let Some(mut state) = rx.recv().await {
        if state.remote_id.is_empty() {
            state.remote_id = login_id.to_string();
        }
        state.timestamp.get_or_insert_with(Utc::now);
        if let Err(e) = sink.push(&login_id, &state).await {
            warn!(login_id = %login_id, error = ?e, "Failed to push bridge state");
        }
    }
    debug!(login_id = %login_id, "Bridge state queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use ghostlink_types::state::StateEvent;

    #[tokio::test]
    async fn delivers_in_order_and_fills_defaults() {
        let sink = RecordingSink::new();
        let queue = BridgeStateQueue::new(UserLoginId::from("l1"), sink.clone());

        queue.send(BridgeState::new(StateEvent::Connecting));
        queue.send(BridgeState::new(StateEvent::Connected));

        let (id, first) = sink.next().await;
        assert_eq!(id, UserLoginId::from("l1"));
        assert_eq!(first.state_event, StateEvent::Connecting);
        assert_eq!(first.remote_id, "l1");
        assert!(first.timestamp.is_some());
        assert_eq!(sink.next().await.1.state_event, StateEvent::Connected);
    }

    #[tokio::test]
    async fn destroy_drains_then_drops_later_states() {
        let sink = RecordingSink::new();
        let queue = BridgeStateQueue::new(UserLoginId::from("l1"), sink.clone());

        queue.send(BridgeState::new(StateEvent::LoggedOut));
        queue.destroy();
        queue.send(BridgeState::new(StateEvent::Connected));
        assert!(queue.is_destroyed());

        assert_eq!(sink.next().await.1.state_event, StateEvent::LoggedOut);
        assert!(sink.nothing_more().await);
    }
}
