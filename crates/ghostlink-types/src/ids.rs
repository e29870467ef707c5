use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a string-backed identifier. Identifiers from different namespaces
/// are distinct types so a message id can never be passed where a sender id
/// is expected.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifies one bridge instance. All rows are scoped by it.
    BridgeId
);
string_id!(
    /// A user on the remote network.
    UserId
);
string_id!(
    /// One authenticated session to the remote network.
    UserLoginId
);
string_id!(MessageId);
string_id!(
    /// Sub-part of a remote message (e.g. one attachment of an album).
    PartId
);
string_id!(EmojiId);
string_id!(PortalId);
string_id!(AvatarId);
string_id!(
    /// An account on the local side.
    LocalUserId
);
string_id!(RoomId);
string_id!(EventId);
string_id!(
    /// Reference to media uploaded to the local side.
    ContentUri
);

/// Key of a bridged conversation. `receiver` is set only for conversations
/// that are scoped to a single login (e.g. DMs on networks without shared
/// chat ids); otherwise it is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortalKey {
    pub id: PortalId,
    #[serde(default, skip_serializing_if = "UserLoginId::is_empty")]
    pub receiver: UserLoginId,
}

impl PortalKey {
    pub fn new(id: impl Into<PortalId>) -> Self {
        Self {
            id: id.into(),
            receiver: UserLoginId::default(),
        }
    }

    pub fn with_receiver(id: impl Into<PortalId>, receiver: impl Into<UserLoginId>) -> Self {
        Self {
            id: id.into(),
            receiver: receiver.into(),
        }
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.receiver.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}/{}", self.id, self.receiver)
        }
    }
}
