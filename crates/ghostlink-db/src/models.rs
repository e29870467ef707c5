/// Database row types, mapping directly to SQLite rows.
use chrono::{DateTime, Utc};
use ghostlink_types::ids::{
    AvatarId, BridgeId, ContentUri, EmojiId, EventId, LocalUserId, MessageId, PartId, PortalKey,
    RoomId, UserId, UserLoginId,
};
use serde::{Deserialize, Serialize};

use crate::merge::{KnownFields, Metadata};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub emoji: String,
}

impl KnownFields for ReactionMetadata {
    const FIELDS: &'static [&'static str] = &["emoji"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostMetadata {
    /// Contact identifiers (e.g. `tel:+123`), kept sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub contact_info_set: bool,
}

impl KnownFields for GhostMetadata {
    const FIELDS: &'static [&'static str] = &["identifiers", "is_bot", "contact_info_set"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoginMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_name: String,
}

impl KnownFields for UserLoginMetadata {
    const FIELDS: &'static [&'static str] = &["remote_name"];
}

/// Memberships carry only network-specific extension fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPortalMetadata {}

impl KnownFields for UserPortalMetadata {
    const FIELDS: &'static [&'static str] = &[];
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRow {
    pub bridge_id: BridgeId,
    pub mxid: LocalUserId,
    pub management_room: Option<RoomId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserLoginRow {
    pub bridge_id: BridgeId,
    pub user_mxid: LocalUserId,
    pub id: UserLoginId,
    pub space_room: Option<RoomId>,
    pub metadata: Metadata<UserLoginMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostRow {
    pub bridge_id: BridgeId,
    pub id: UserId,
    pub name: String,
    pub avatar_id: AvatarId,
    pub avatar_hash: [u8; 32],
    pub avatar_mxc: ContentUri,
    pub name_set: bool,
    pub avatar_set: bool,
    pub metadata: Metadata<GhostMetadata>,
}

impl GhostRow {
    pub fn new(bridge_id: BridgeId, id: UserId) -> Self {
        Self {
            bridge_id,
            id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPortalRow {
    pub bridge_id: BridgeId,
    pub user_mxid: LocalUserId,
    pub login_id: UserLoginId,
    pub portal: PortalKey,
    pub in_space: bool,
    pub preferred: bool,
    pub last_read: Option<DateTime<Utc>>,
    pub metadata: Metadata<UserPortalMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRow {
    pub bridge_id: BridgeId,
    pub room: PortalKey,
    pub message_id: MessageId,
    pub message_part_id: PartId,
    pub sender_id: UserId,
    pub emoji_id: EmojiId,
    pub mxid: EventId,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata<ReactionMetadata>,
}

pub(crate) fn to_nanos(ts: DateTime<Utc>) -> i64 {
    // Out of range only past the year 2262.
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

pub(crate) fn optional_id<T: From<String>>(value: Option<String>) -> Option<T> {
    value.filter(|s| !s.is_empty()).map(T::from)
}

pub(crate) fn metadata_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Metadata<T>>
where
    T: serde::de::DeserializeOwned + Default + KnownFields,
{
    let raw: String = row.get(idx)?;
    Metadata::from_json(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
