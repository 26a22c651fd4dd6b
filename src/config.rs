//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

use crate::identity::Identity;

/// Serializes every test that touches process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for the event store.
    pub store_root: PathBuf,
    /// Enable signature verification on ingest.
    pub verify_sig: bool,
    /// Hex secret key for the local player, if configured.
    pub secret_key: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file. Real environment
    /// variables take precedence over file entries.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "1".into()) == "1";
        let secret_key = env::var("SECRET_KEY").ok().filter(|s| !s.is_empty());
        Ok(Self {
            store_root,
            verify_sig,
            secret_key,
        })
    }

    /// The local signing identity, if a secret key is configured.
    ///
    /// `Ok(None)` means no key material is present; the caller decides whether
    /// that aborts the operation (publishing) or not (read-only commands).
    pub fn identity(&self) -> Result<Option<Identity>> {
        match &self.secret_key {
            None => Ok(None),
            Some(hex_key) => Identity::from_hex(hex_key)
                .context("SECRET_KEY is not a valid secp256k1 secret key")
                .map(Some),
        }
    }
}
