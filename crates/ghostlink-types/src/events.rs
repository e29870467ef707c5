use serde::{Deserialize, Serialize};

/// Kind of remote-network event that triggered some piece of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteEventType {
    #[default]
    Unknown,
    Message,
    Edit,
    Reaction,
    ReactionRemove,
    ReactionSync,
    MessageRemove,
    ReadReceipt,
    MarkUnread,
    DeliveryReceipt,
    Typing,
    ChatInfoChange,
    ChatResync,
    ChatDelete,
    Backfill,
}

impl RemoteEventType {
    /// Events for which a network may ask for eager profile refreshes of
    /// the sender.
    pub fn allows_aggressive_update(self) -> bool {
        matches!(
            self,
            Self::Unknown | Self::Message | Self::Edit | Self::Reaction
        )
    }
}
