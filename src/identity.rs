//! Local signing identity: a secp256k1 secret key and its x-only pubkey.

use anyhow::{anyhow, Result};
use rand::RngCore;
use secp256k1::{Keypair, Secp256k1};

/// Key material for the local player.
///
/// The secret key stays in memory; persistence is a configuration concern
/// (the `SECRET_KEY` env entry), not handled here.
#[derive(Clone)]
pub struct Identity {
    secret: [u8; 32],
    pubkey: String,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        loop {
            rand::thread_rng().fill_bytes(&mut secret);
            // all-zero and over-curve-order keys are rejected by the curve impl
            if let Ok(identity) = Identity::from_bytes(secret) {
                return identity;
            }
        }
    }

    /// Load an identity from a 64-character hex secret key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("secret key must be 32 bytes"))?;
        Identity::from_bytes(secret)
    }

    fn from_bytes(secret: [u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &secret)?;
        let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
        Ok(Self { secret, pubkey })
    }

    /// Hex-encoded x-only public key.
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    /// Raw secret key bytes, for signing.
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Hex encoding of the secret key, for persisting to config.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }
}
