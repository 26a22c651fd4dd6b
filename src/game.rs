//! Typed wrappers over raw events forming a game's move chain.
//!
//! A chain is a [`GameStart`] root plus a path of [`GameMove`] links, each
//! citing its parent via an `e` tag. Wrappers are constructed fresh whenever
//! the resolver considers a candidate; only the underlying events persist.

use serde::{Deserialize, Serialize};
use shakmaty::{fen::Fen, san::San, CastlingMode, Chess, EnPassantMode, Position};

use crate::codec;
use crate::error::ChainError;
use crate::event::Event;

/// Content payload version emitted by this implementation.
pub const PAYLOAD_VERSION: &str = "0";

/// FEN of the standard chess starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// JSON payload carried in the `content` field of chain events.
///
/// A start payload has `move: null` and an empty `history`; its `fen`
/// establishes the initial position. A move payload carries the single move
/// in standard notation plus the full ordered history from game start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovePayload {
    pub version: String,
    pub fen: String,
    #[serde(rename = "move")]
    pub mv: Option<String>,
    pub history: Vec<String>,
}

impl MovePayload {
    /// Parse an event content string into a payload, if it has the shape.
    pub fn parse(content: &str) -> Option<MovePayload> {
        serde_json::from_str(content).ok()
    }

    /// Whether this payload establishes a game rather than extending one.
    pub fn is_start(&self) -> bool {
        self.mv.is_none() && self.history.is_empty()
    }
}

/// Parse a FEN string into a position.
fn position_from_fen(fen: &str) -> Result<Chess, ChainError> {
    let parsed: Fen = fen
        .parse()
        .map_err(|e| ChainError::InvalidEvent(format!("unparseable fen: {e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| ChainError::InvalidEvent(format!("illegal position: {e}")))
}

/// Render a position as FEN.
pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// Apply a single SAN move to a position, failing on unparseable or illegal
/// input.
pub fn apply_san(pos: &Chess, san_str: &str) -> Result<Chess, ChainError> {
    let san: San = san_str
        .parse()
        .map_err(|e| ChainError::IllegalSuccessor(format!("unparseable move {san_str:?}: {e}")))?;
    let m = san
        .to_move(pos)
        .map_err(|e| ChainError::IllegalSuccessor(format!("no such move {san_str:?}: {e}")))?;
    pos.clone()
        .play(&m)
        .map_err(|e| ChainError::IllegalSuccessor(format!("illegal move {san_str:?}: {e}")))
}

/// Compare a declared FEN against a replayed one on the position fields only
/// (placement, side to move, castling). Clock and en-passant rendering vary
/// between engines.
fn fen_positions_match(declared: &str, computed: &str) -> bool {
    let fields = |s: &str| {
        s.split_whitespace()
            .take(3)
            .map(str::to_owned)
            .collect::<Vec<_>>()
    };
    let d = fields(declared);
    d.len() == 3 && d == fields(computed)
}

/// Root of a game chain. The root event's id is the game id.
#[derive(Debug, Clone)]
pub struct GameStart {
    event: Event,
    position: Chess,
}

impl GameStart {
    /// Wrap a verified event whose content is a start payload.
    pub fn from_event(event: Event) -> Result<Self, ChainError> {
        codec::verify(&event).map_err(|e| ChainError::InvalidEvent(e.to_string()))?;
        let payload = MovePayload::parse(&event.content)
            .ok_or_else(|| ChainError::InvalidEvent("content is not a game payload".into()))?;
        if !payload.is_start() {
            return Err(ChainError::InvalidEvent(
                "content is not a game-start payload".into(),
            ));
        }
        let position = position_from_fen(&payload.fen)?;
        Ok(Self { event, position })
    }

    /// The game id, which is the root event's id.
    pub fn game_id(&self) -> &str {
        &self.event.id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }
}

/// A single move extending the chain from a parent node.
#[derive(Debug, Clone)]
pub struct GameMove {
    event: Event,
    history: Vec<String>,
    position: Chess,
}

impl GameMove {
    /// Wrap a candidate successor event.
    ///
    /// Succeeds only if the event verifies, cites `parent` in its `e` tags,
    /// declares a history that extends the parent's by exactly its own move,
    /// and that move is legal from the parent's position with a FEN matching
    /// the replayed result. Failure is a normal outcome for concurrent or
    /// adversarial events; the caller discards the candidate.
    pub fn from_event(event: Event, parent: &ChainNode) -> Result<Self, ChainError> {
        codec::verify(&event).map_err(|e| ChainError::InvalidEvent(e.to_string()))?;
        if !event.references(parent.id()) {
            return Err(ChainError::IllegalSuccessor(
                "event does not reference its parent".into(),
            ));
        }
        let payload = MovePayload::parse(&event.content)
            .ok_or_else(|| ChainError::IllegalSuccessor("content is not a game payload".into()))?;
        let san = payload
            .mv
            .clone()
            .ok_or_else(|| ChainError::IllegalSuccessor("move payload without a move".into()))?;
        let mut history = parent.history().to_vec();
        history.push(san.clone());
        if payload.history != history {
            return Err(ChainError::IllegalSuccessor(
                "declared history does not extend the parent's".into(),
            ));
        }
        let position = apply_san(parent.position(), &san)?;
        if !fen_positions_match(&payload.fen, &fen_of(&position)) {
            return Err(ChainError::IllegalSuccessor(
                "declared fen does not match the replayed position".into(),
            ));
        }
        Ok(Self {
            event,
            history,
            position,
        })
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }
}

/// A node in a game chain: the root or a move.
///
/// Exactly two variants, sharing the read-only capability set
/// `event() / history() / fen() / pgn()`.
#[derive(Debug, Clone)]
pub enum ChainNode {
    Start(GameStart),
    Move(GameMove),
}

impl ChainNode {
    pub fn event(&self) -> &Event {
        match self {
            ChainNode::Start(s) => s.event(),
            ChainNode::Move(m) => m.event(),
        }
    }

    /// The wrapped event's id.
    pub fn id(&self) -> &str {
        &self.event().id
    }

    /// Ordered SAN moves from game start up to and including this node.
    pub fn history(&self) -> &[String] {
        match self {
            ChainNode::Start(_) => &[],
            ChainNode::Move(m) => &m.history,
        }
    }

    /// Board position after this node's history.
    pub fn position(&self) -> &Chess {
        match self {
            ChainNode::Start(s) => s.position(),
            ChainNode::Move(m) => m.position(),
        }
    }

    /// FEN of the position after this node's history.
    pub fn fen(&self) -> String {
        fen_of(self.position())
    }

    /// Movetext rendering of the history, e.g. `1. e4 e5 2. Nf3`.
    pub fn pgn(&self) -> String {
        let mut out = String::new();
        for (i, san) in self.history().iter().enumerate() {
            if i % 2 == 0 {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&format!("{}. ", i / 2 + 1));
            } else {
                out.push(' ');
            }
            out.push_str(san);
        }
        out
    }
}
