//! Metadata columns hold a fixed set of known fields and an open-ended
//! extension map in one flat JSON object.
//!
//! Encoding writes the extension keys first and the known fields over them.
//! Decoding fills the known struct and moves every other top-level key into
//! the extension map, so `decode(encode(x))` reproduces `x`.

use std::ops::{Deref, DerefMut};

use anyhow::{Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// JSON keys owned by a known metadata struct. Keys listed here never show
/// up in the extension map after decoding.
pub trait KnownFields {
    const FIELDS: &'static [&'static str];
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata<T> {
    pub known: T,
    pub extra: Map<String, Value>,
}

impl<T> Metadata<T> {
    pub fn new(known: T) -> Self {
        Self {
            known,
            extra: Map::new(),
        }
    }
}

impl<T> Deref for Metadata<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.known
    }
}

impl<T> DerefMut for Metadata<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.known
    }
}

impl<T: Serialize> Metadata<T> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&marshal_merge(&self.known, &self.extra)?)?)
    }
}

impl<T: DeserializeOwned + Default + KnownFields> Metadata<T> {
    pub fn from_json(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        let (known, extra) = unmarshal_merge(value)?;
        Ok(Self { known, extra })
    }
}

impl<T: Serialize> Serialize for Metadata<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        marshal_merge(&self.known, &self.extra)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned + Default + KnownFields> Deserialize<'de> for Metadata<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let (known, extra) = unmarshal_merge(value).map_err(serde::de::Error::custom)?;
        Ok(Self { known, extra })
    }
}

pub fn marshal_merge<T: Serialize>(known: &T, extra: &Map<String, Value>) -> Result<Value> {
    let mut merged = extra.clone();
    match serde_json::to_value(known)? {
        Value::Object(fields) => merged.extend(fields),
        Value::Null => {}
        other => bail!("known metadata must serialize to an object, got {}", other),
    }
    Ok(Value::Object(merged))
}

pub fn unmarshal_merge<T: DeserializeOwned + Default + KnownFields>(
    value: Value,
) -> Result<(T, Map<String, Value>)> {
    let mut extra = match value {
        Value::Null => return Ok((T::default(), Map::new())),
        Value::Object(map) => map,
        other => bail!("metadata must be a JSON object, got {}", other),
    };

    let mut known_fields = Map::new();
    for field in T::FIELDS {
        if let Some(v) = extra.remove(*field) {
            known_fields.insert((*field).to_string(), v);
        }
    }
    let known = serde_json::from_value(Value::Object(known_fields))?;
    Ok((known, extra))
}

/// Numeric types that can be read back from a JSON extension map regardless
/// of whether the stored number is an integer or a float.
pub trait JsonNumber: Copy + PartialEq + Into<Value> {
    fn from_number(n: &Number) -> Option<Self>;
}

macro_rules! int_json_number {
    ($($t:ty),*) => {$(
        impl JsonNumber for $t {
            fn from_number(n: &Number) -> Option<Self> {
                n.as_i64()
                    .and_then(|v| <$t>::try_from(v).ok())
                    .or_else(|| n.as_u64().and_then(|v| <$t>::try_from(v).ok()))
                    .or_else(|| n.as_f64().map(|v| v as $t))
            }
        }
    )*};
}

int_json_number!(i8, i16, i32, i64, u8, u16, u32, u64);

impl JsonNumber for f32 {
    fn from_number(n: &Number) -> Option<Self> {
        n.as_f64().map(|v| v as f32)
    }
}

impl JsonNumber for f64 {
    fn from_number(n: &Number) -> Option<Self> {
        n.as_f64()
    }
}

pub fn number_from_map<N: JsonNumber>(map: &Map<String, Value>, key: &str) -> Option<N> {
    match map.get(key)? {
        Value::Number(n) => N::from_number(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GhostMetadata, ReactionMetadata};
    use serde_json::json;

    #[test]
    fn reaction_metadata_roundtrip_keeps_extra() {
        let mut meta = Metadata::new(ReactionMetadata {
            emoji: "👍".to_string(),
        });
        meta.extra.insert("x".to_string(), json!(1));

        let encoded = meta.to_json().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({ "emoji": "👍", "x": 1 }));

        let decoded = Metadata::<ReactionMetadata>::from_json(&encoded).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn absent_extra_decodes_to_empty_map() {
        let decoded = Metadata::<ReactionMetadata>::from_json(r#"{"emoji":"🎉"}"#).unwrap();
        assert_eq!(decoded.emoji, "🎉");
        assert!(decoded.extra.is_empty());

        let null = Metadata::<ReactionMetadata>::from_json("null").unwrap();
        assert_eq!(null.emoji, "");
        assert!(null.extra.is_empty());

        let empty = Metadata::<ReactionMetadata>::from_json("{}").unwrap();
        assert_eq!(empty.to_json().unwrap(), "{}");
    }

    #[test]
    fn known_fields_win_over_extra_on_encode() {
        let mut meta = Metadata::new(ReactionMetadata {
            emoji: "❤️".to_string(),
        });
        meta.extra.insert("emoji".to_string(), json!("stale"));

        let value = marshal_merge(&meta.known, &meta.extra).unwrap();
        assert_eq!(value, json!({ "emoji": "❤️" }));
    }

    #[test]
    fn ghost_metadata_splits_known_and_extra() {
        let decoded = Metadata::<GhostMetadata>::from_json(
            r#"{"identifiers":["tel:+1"],"is_bot":true,"custom":{"a":[1,2]}}"#,
        )
        .unwrap();
        assert_eq!(decoded.identifiers, vec!["tel:+1".to_string()]);
        assert!(decoded.is_bot);
        assert!(!decoded.contact_info_set);
        assert_eq!(decoded.extra.len(), 1);
        assert_eq!(decoded.extra["custom"], json!({ "a": [1, 2] }));
    }

    #[test]
    fn non_object_metadata_is_rejected() {
        assert!(Metadata::<ReactionMetadata>::from_json("[1,2]").is_err());
    }

    #[test]
    fn numbers_coerce_between_int_and_float() {
        let mut map = Map::new();
        map.insert("count".to_string(), json!(3.0));
        map.insert("big".to_string(), json!(7));
        map.insert("text".to_string(), json!("7"));

        assert_eq!(number_from_map::<i32>(&map, "count"), Some(3));
        assert_eq!(number_from_map::<f64>(&map, "big"), Some(7.0));
        assert_eq!(number_from_map::<u8>(&map, "text"), None);
        assert_eq!(number_from_map::<u8>(&map, "missing"), None);
    }
}
