//! Network subscription filters scoped to game roots.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::event::KIND_NOTE;
use crate::game::GameStart;

/// Filter selecting every event that references a game's root id.
///
/// The shape is consumed verbatim by the transport layer; this module only
/// shapes data.
pub fn game_filter(root: &GameStart) -> Value {
    json!({ "#e": [root.game_id()], "kinds": [KIND_NOTE] })
}

/// Registry of active per-game filters, keyed by game-root id.
///
/// Owned by the transport layer: games are added when opened and removed
/// when abandoned. Keying by root id makes duplicate registration a no-op,
/// replacing structural-equality deduplication of raw filter values.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: BTreeMap<String, Value>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a game's filter; returns false if it was already present.
    pub fn add(&mut self, root: &GameStart) -> bool {
        self.filters
            .insert(root.game_id().to_string(), game_filter(root))
            .is_none()
    }

    /// Drop a game's filter; returns false if it was not registered.
    pub fn remove(&mut self, game_id: &str) -> bool {
        self.filters.remove(game_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The subscription message body for all registered games:
    /// `{ "id": ..., "filters": [...] }`.
    pub fn subscription(&self, id: &str) -> Value {
        json!({ "id": id, "filters": self.filters.values().collect::<Vec<_>>() })
    }
}
