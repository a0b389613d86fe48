//! Worker capability registry.
//!
//! Capabilities are key/value pairs the worker advertises in its init
//! response. Entries are only added or overwritten during a handshake,
//! never removed, so readers on the invocation hot path take a short read
//! lock and nothing else.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Worker accepts raw body bytes alongside the parsed HTTP body.
pub const RAW_HTTP_BODY_BYTES: &str = "RawHttpBodyBytes";

/// Worker accepts the collection variants of typed data.
pub const TYPED_DATA_COLLECTION: &str = "TypedDataCollectionSupported";

/// Mutable key→value map established at handshake time.
///
/// # Example
///
/// ```
/// use glossa_wire::{Capabilities, TYPED_DATA_COLLECTION};
///
/// let caps = Capabilities::new();
/// caps.update([(TYPED_DATA_COLLECTION.to_string(), "1".to_string())]);
/// assert!(caps.enabled(TYPED_DATA_COLLECTION));
/// assert!(!caps.enabled("SomethingElse"));
/// ```
#[derive(Debug, Default)]
pub struct Capabilities {
    entries: RwLock<HashMap<String, String>>,
}

impl Capabilities {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites entries; empty values are discarded.
    pub fn update(&self, entries: impl IntoIterator<Item = (String, String)>) {
        let mut map = self.entries.write();
        for (key, value) in entries {
            if value.is_empty() {
                continue;
            }
            map.insert(key, value);
        }
    }

    /// Returns the value for `name`, if advertised.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries.read().get(name).cloned()
    }

    /// Returns whether `name` is advertised with a non-empty value.
    #[must_use]
    pub fn enabled(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Returns a snapshot of all entries.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().clone()
    }
}
