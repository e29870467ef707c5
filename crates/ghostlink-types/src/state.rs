use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection health of one login, as reported to the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEvent {
    Starting,
    Connecting,
    Connected,
    TransientDisconnect,
    BadCredentials,
    UnknownError,
    LoggedOut,
}

/// A bridge state report for one login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    pub state_event: StateEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BridgeState {
    pub fn new(state_event: StateEvent) -> Self {
        Self {
            state_event,
            error: None,
            message: None,
            remote_id: String::new(),
            remote_name: String::new(),
            timestamp: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.message = Some(message.into());
        self
    }

    /// Terminal states end the login; nothing is reported after them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state_event,
            StateEvent::BadCredentials | StateEvent::LoggedOut
        )
    }
}

/// Lifecycle of an in-memory login.
///
/// `Active -> Disconnecting -> {LoggedOut | Disconnected}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Active,
    Disconnecting,
    LoggedOut,
    Disconnected,
}

impl LoginState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut | Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_event_wire_names() {
        let state = BridgeState::new(StateEvent::TransientDisconnect);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({ "state_event": "TRANSIENT_DISCONNECT" }));
    }

    #[test]
    fn terminal_states() {
        assert!(BridgeState::new(StateEvent::LoggedOut).is_terminal());
        assert!(BridgeState::new(StateEvent::BadCredentials).is_terminal());
        assert!(!BridgeState::new(StateEvent::Connected).is_terminal());
        assert!(LoginState::Disconnected.is_terminal());
        assert!(!LoginState::Disconnecting.is_terminal());
    }
}
