//! Wallet loading
//!
//! The operator keypair is loaded once at startup and shared read-only as an
//! `Arc<Keypair>`.

use anyhow::{bail, Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::WalletConfig;

#[derive(Clone)]
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

impl WalletManager {
    /// Keypair file in Solana CLI JSON format or as 64 raw bytes
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = Zeroizing::new(
            std::fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path.display()))?,
        );

        let keypair = if raw.len() == 64 {
            keypair_from_bytes(&raw)?
        } else {
            let json: Zeroizing<Vec<u8>> =
                Zeroizing::new(serde_json::from_slice(&raw).context("Failed to parse keypair JSON")?);
            keypair_from_bytes(&json)?
        };

        Ok(Self::from_keypair(keypair))
    }

    /// Base58-encoded 64-byte secret key
    pub fn from_base58_secret(secret: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            bs58::decode(secret.trim())
                .into_vec()
                .context("Wallet secret is not valid base58")?,
        );
        Ok(Self::from_keypair(keypair_from_bytes(&bytes)?))
    }

    /// An inline secret wins over a keypair file
    pub fn from_config(config: &WalletConfig) -> Result<Self> {
        match (&config.secret, &config.keypair_path) {
            (Some(secret), _) => Self::from_base58_secret(secret),
            (None, Some(path)) => Self::from_file(path),
            (None, None) => bail!("No wallet configured"),
        }
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }
}
