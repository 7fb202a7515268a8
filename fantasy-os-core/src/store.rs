//! Keyed JSON persistence used by every stateful engine.
//!
//! Reads are forgiving: a missing slot, a backend error or a blob that no
//! longer parses all yield fresh defaults. Writes are best effort: failures
//! are logged and the in-memory state stays authoritative.
use log::{error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::error::StorageError;

pub const QUEST_STATE_KEY: &str = "fantasy-os-quest-state";
pub const ACHIEVEMENT_STATE_KEY: &str = "fantasy-os-achievements";
pub const ROOM_PROGRESSION_KEY: &str = "fantasy-os-room-progression";

/// Sections of the shared room progression document.
pub const ROOMS_SECTION: &str = "rooms";
pub const PASSAGES_SECTION: &str = "secretPassages";
pub const UPGRADES_SECTION: &str = "roomUpgrades";

/// Trait for abstracting keyed save/load slots.
/// Platform-specific implementations should provide this
pub trait ProgressStore {
    /// Read the raw JSON stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the JSON stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn save(&self, key: &str, json: &str) -> Result<(), StorageError>;

    /// Delete the slot under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the slot.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.slots.borrow().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, json: impl Into<String>) {
        self.slots.borrow_mut().insert(key.to_string(), json.into());
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.raw(key))
    }

    fn save(&self, key: &str, json: &str) -> Result<(), StorageError> {
        self.insert_raw(key, json);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.slots.borrow_mut().remove(key);
        Ok(())
    }
}

/// Read and parse the document under `key`.
///
/// Returns `None` when the slot is empty, unreadable or corrupt.
pub fn read_document<T: DeserializeOwned>(store: &dyn ProgressStore, key: &str) -> Option<T> {
    let raw = match store.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!("could not read {key}: {err}");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(doc) => Some(doc),
        Err(err) => {
            warn!("discarding corrupt {key} document: {err}");
            None
        }
    }
}

/// Serialize `doc` into the slot under `key`. Returns whether the write landed.
pub fn write_document<T: Serialize>(store: &dyn ProgressStore, key: &str, doc: &T) -> bool {
    let outcome = serde_json::to_string(doc)
        .map_err(StorageError::from)
        .and_then(|json| store.save(key, &json));
    match outcome {
        Ok(()) => true,
        Err(err) => {
            error!("failed to persist {key}: {err}");
            false
        }
    }
}

/// Remove the slot under `key`, logging backend failures.
pub fn clear_document(store: &dyn ProgressStore, key: &str) -> bool {
    match store.remove(key) {
        Ok(()) => true,
        Err(err) => {
            error!("failed to clear {key}: {err}");
            false
        }
    }
}

fn read_object(store: &dyn ProgressStore, key: &str) -> Map<String, Value> {
    match read_document::<Value>(store, key) {
        Some(Value::Object(map)) => map,
        Some(_) => {
            warn!("{key} is not a JSON object; starting fresh");
            Map::new()
        }
        None => Map::new(),
    }
}

/// Read one section of a shared document as raw JSON entries keyed by id.
///
/// Engines parse each entry on its own so one malformed record does not
/// discard its neighbours.
pub fn read_section(store: &dyn ProgressStore, key: &str, section: &str) -> Map<String, Value> {
    match read_object(store, key).remove(section) {
        Some(Value::Object(entries)) => entries,
        Some(_) => {
            warn!("{key}.{section} is not a JSON object; ignoring it");
            Map::new()
        }
        None => Map::new(),
    }
}

/// Replace one section of a shared document, keeping the other sections.
pub fn write_section<T: Serialize>(
    store: &dyn ProgressStore,
    key: &str,
    section: &str,
    value: &T,
) -> bool {
    let value = match serde_json::to_value(value) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to serialize {key}.{section}: {err}");
            return false;
        }
    };
    let mut doc = read_object(store, key);
    doc.insert(section.to_string(), value);
    write_document(store, key, &Value::Object(doc))
}

/// Parse each entry of a section, keeping the ones that still decode.
pub fn parse_entries<T: DeserializeOwned>(
    section: &str,
    entries: Map<String, Value>,
) -> BTreeMap<String, T> {
    entries
        .into_iter()
        .filter_map(|(id, raw)| match serde_json::from_value(raw) {
            Ok(entry) => Some((id, entry)),
            Err(err) => {
                warn!("dropping malformed {section} entry `{id}`: {err}");
                None
            }
        })
        .collect()
}
