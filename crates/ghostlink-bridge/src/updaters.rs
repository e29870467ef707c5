//! Compare-and-set updaters for network-specific fields in an entity's
//! extension metadata. Each updater reports whether it changed anything, so
//! re-running one with unchanged input never causes a write.

use ghostlink_db::merge::{JsonNumber, number_from_map};
use ghostlink_db::models::{GhostRow, UserPortalRow};
use serde_json::{Map, Value};

/// Entities that carry a free-form extension map next to their known
/// metadata fields.
pub trait HasExtraMetadata {
    fn extra_metadata(&self) -> &Map<String, Value>;
    fn extra_metadata_mut(&mut self) -> &mut Map<String, Value>;
}

impl HasExtraMetadata for GhostRow {
    fn extra_metadata(&self) -> &Map<String, Value> {
        &self.metadata.extra
    }

    fn extra_metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata.extra
    }
}

impl HasExtraMetadata for UserPortalRow {
    fn extra_metadata(&self) -> &Map<String, Value> {
        &self.metadata.extra
    }

    fn extra_metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata.extra
    }
}

/// Returns true if it changed the entity.
pub type ExtraUpdater<T> = Box<dyn Fn(&mut T) -> bool + Send + Sync>;

/// Sets `key` to `value` unless it already holds exactly that JSON value.
pub fn simple_metadata_updater<T>(key: impl Into<String>, value: impl Into<Value>) -> ExtraUpdater<T>
where
    T: HasExtraMetadata + 'static,
{
    let key = key.into();
    let value = value.into();
    Box::new(move |obj: &mut T| {
        if obj.extra_metadata().get(&key) == Some(&value) {
            return false;
        }
        obj.extra_metadata_mut().insert(key.clone(), value.clone());
        true
    })
}

/// Like [`simple_metadata_updater`], but a stored number of a different
/// JSON representation (`3` vs `3.0`) still counts as equal.
pub fn number_metadata_updater<T, N>(key: impl Into<String>, value: N) -> ExtraUpdater<T>
where
    T: HasExtraMetadata + 'static,
    N: JsonNumber + Send + Sync + 'static,
{
    let key = key.into();
    Box::new(move |obj: &mut T| {
        if number_from_map::<N>(obj.extra_metadata(), &key) == Some(value) {
            return false;
        }
        obj.extra_metadata_mut().insert(key.clone(), value.into());
        true
    })
}

/// Runs every updater (none are skipped) and reports whether any changed
/// the entity.
pub fn merge_extra_updaters<T: 'static>(updaters: Vec<ExtraUpdater<T>>) -> ExtraUpdater<T> {
    Box::new(move |obj: &mut T| {
        updaters
            .iter()
            .fold(false, |changed, update| update(&mut *obj) || changed)
    })
}
