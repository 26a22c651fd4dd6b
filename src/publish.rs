//! Constructing and publishing signed chain events.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{debug, info};

use crate::codec::{self, EventParts};
use crate::error::ChainError;
use crate::event::{Event, Tag, KIND_NOTE};
use crate::game::{apply_san, fen_of, ChainNode, GameStart, MovePayload, INITIAL_FEN, PAYLOAD_VERSION};
use crate::identity::Identity;
use crate::store::Store;

/// Artificial delay before a move event is transmitted. Dropping the publish
/// future inside this window emits nothing.
pub const PUBLISH_DELAY: Duration = Duration::from_millis(100);

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_event(
    identity: &Identity,
    created_at: u64,
    tags: Vec<Tag>,
    payload: &MovePayload,
) -> Result<Event> {
    let ev = codec::construct(EventParts {
        pubkey: identity.pubkey().into(),
        created_at,
        kind: KIND_NOTE,
        tags,
        content: serde_json::to_string(payload)?,
    })?;
    codec::sign(&ev, identity.secret())
}

fn resolve_identity(identity: Option<&Identity>) -> Result<&Identity, ChainError> {
    identity.ok_or(ChainError::MissingIdentity)
}

/// Publish a game-start event establishing a new chain root.
///
/// With no identity configured the publication is silently skipped (a logged
/// notice, `Ok(None)`): a missing key only affects the local writer.
pub fn publish_game_start(store: &Store, identity: Option<&Identity>) -> Result<Option<GameStart>> {
    let identity = match resolve_identity(identity) {
        Ok(identity) => identity,
        Err(err) => {
            info!(%err, "game start not published");
            return Ok(None);
        }
    };
    let payload = MovePayload {
        version: PAYLOAD_VERSION.into(),
        fen: INITIAL_FEN.into(),
        mv: None,
        history: vec![],
    };
    let ev = build_event(identity, unix_now(), vec![], &payload)?;
    store.ingest(&ev)?;
    debug!(id = %ev.id, "published game start");
    let root = GameStart::from_event(ev)?;
    Ok(Some(root))
}

/// Publish a move extending `head`, tagging the game root and the head.
///
/// The move is validated locally before anything is signed, so an illegal
/// move errors out to the caller instead of reaching the wire. Exactly one
/// event is appended, and only after the fixed pre-send delay; cancelling
/// the future before then emits nothing.
pub async fn publish_move(
    store: &Store,
    identity: Option<&Identity>,
    root: &GameStart,
    head: &ChainNode,
    san: &str,
) -> Result<Option<Event>> {
    let identity = match resolve_identity(identity) {
        Ok(identity) => identity,
        Err(err) => {
            info!(%err, "move not published");
            return Ok(None);
        }
    };
    let position = apply_san(head.position(), san)?;
    let mut history = head.history().to_vec();
    history.push(san.to_string());
    let payload = MovePayload {
        version: PAYLOAD_VERSION.into(),
        fen: fen_of(&position),
        mv: Some(san.to_string()),
        history,
    };
    let mut tags = vec![Tag::reference(root.game_id())];
    if head.id() != root.game_id() {
        tags.push(Tag::reference(head.id()));
    }

    tokio::time::sleep(PUBLISH_DELAY).await;

    let ev = build_event(identity, unix_now(), tags, &payload)?;
    store.ingest(&ev)?;
    debug!(id = %ev.id, game = %root.game_id(), san, "published move");
    Ok(Some(ev))
}
