//! Canonical event construction, signing, and verification.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::event::{Event, Tag};

/// Unsigned fields of an event, prior to id computation.
pub struct EventParts {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Compute the event hash over the canonical array form
/// `[0, pubkey, created_at, kind, tags, content]`.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Build an event from its parts, deriving the content-addressed id.
/// The returned event is unsigned (`sig` is empty).
pub fn construct(parts: EventParts) -> Result<Event> {
    let mut ev = Event {
        id: String::new(),
        pubkey: parts.pubkey,
        kind: parts.kind,
        created_at: parts.created_at,
        tags: parts.tags,
        content: parts.content,
        sig: String::new(),
    };
    let hash = event_hash(&ev)?;
    ev.id = hex::encode(hash);
    Ok(ev)
}

/// Sign an event's id with `secret_key`, returning a copy with `sig` set.
///
/// The secret key must correspond to the event's `pubkey` and the id must
/// match the event's fields; both are checked so a mis-signed event can never
/// leave this function. The key does not escape the call.
pub fn sign(ev: &Event, secret_key: &[u8; 32]) -> Result<Event> {
    let secp = Secp256k1::new();
    let kp = Keypair::from_seckey_slice(&secp, secret_key)?;
    let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    if pubkey != ev.pubkey {
        return Err(anyhow!("secret key does not match event pubkey"));
    }
    let hash = event_hash(ev)?;
    if hex::encode(hash) != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let msg = Message::from_digest_slice(&hash)?;
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    let mut signed = ev.clone();
    signed.sig = hex::encode(sig.as_ref());
    Ok(signed)
}

/// Verify an event's id and Schnorr signature.
pub fn verify(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}
