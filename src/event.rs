//! Nostr event model for game chains.

use serde::{Deserialize, Serialize};

/// Kind number for chain events. The generic note kind is reused; whether an
/// event is a game start or a move is inferred from the shape of its
/// `content` payload, never from `kind`.
pub const KIND_NOTE: u32 = 1;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. The only tag type with chain semantics
/// here is `e`, which links to another event ID; a move event carries one
/// `e` tag for the game root and one for its parent head. Each tag is stored
/// verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build an `e` tag referencing another event's id.
    pub fn reference(id: impl Into<String>) -> Self {
        Tag(vec!["e".into(), id.into()])
    }

    /// The referenced event id, if this is an `e` tag with a value.
    pub fn referenced_id(&self) -> Option<&str> {
        match self.0.as_slice() {
            [t, id, ..] if t == "e" => Some(id),
            _ => None,
        }
    }
}

/// Signed, content-addressed event as exchanged on the wire.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "npub...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "f00d"], ["e", "beef"]],
///   "content": "{\"version\":\"0\",...}",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash over the canonical fields).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Kind number, e.g. `1`.
    pub kind: u32,
    /// Publisher-claimed Unix timestamp. Untrusted.
    pub created_at: u64,
    /// Ordered tags; `e` tags are causal references.
    pub tags: Vec<Tag>,
    /// Event content body, here a JSON game payload.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Iterate over all event ids this event references via `e` tags.
    pub fn referenced_ids(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| t.referenced_id())
    }

    /// Whether this event carries an `e` tag citing `id`.
    pub fn references(&self, id: &str) -> bool {
        self.referenced_ids().any(|r| r == id)
    }
}
