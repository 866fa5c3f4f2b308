//! Account provider: deterministic identities derived from seed phrases
//!
//! Key derivation needs a one-time async warm-up per process; asking for an
//! identity before it has completed is an error rather than a silent wait.

use crate::error::{OrchestratorError, OrchestratorResult};

use ed25519_dalek::{Signer, SigningKey, Verifier};
use serde::Serialize;
use std::fmt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Generic substrate address format
pub const SS58_PREFIX: u8 = 42;

const SS58_CHECKSUM_CONTEXT: &[u8] = b"SS58PRE";

/// Dev accounts every local network pre-funds
pub const WELL_KNOWN_ACCOUNTS: [(&str, &str); 6] = [
    ("Alice", "//Alice"),
    ("Bob", "//Bob"),
    ("Charlie", "//Charlie"),
    ("Dave", "//Dave"),
    ("Eve", "//Eve"),
    ("Ferdie", "//Ferdie"),
];

/// Named signing identity
#[derive(Clone, Serialize)]
pub struct AccountIdentity {
    pub name: String,
    #[serde(skip)]
    pub seed: String,
    pub address: String,
    #[serde(skip)]
    signing_key: SigningKey,
}

impl AccountIdentity {
    /// Raw 32-byte account id
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing_key.sign(payload).to_bytes()
    }
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}

/// Derives identities once the crypto backend is warmed up
#[derive(Default)]
pub struct AccountProvider {
    ready: OnceCell<()>,
}

impl AccountProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the one-time warm-up. Concurrent callers share a single run.
    pub async fn warm_up(&self) -> OrchestratorResult<()> {
        self.ready
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(self_test)
                    .await
                    .map_err(|e| OrchestratorError::Internal(format!("Warm-up task failed: {}", e)))??;
                info!("Key derivation ready");
                Ok::<(), OrchestratorError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Derive the identity for a seed phrase such as `//Alice`
    pub fn identity(&self, seed: &str) -> OrchestratorResult<AccountIdentity> {
        if !self.is_ready() {
            return Err(OrchestratorError::CryptoNotReady);
        }
        if seed.is_empty() {
            return Err(OrchestratorError::InvalidInput("Seed phrase is empty".to_string()));
        }

        let signing_key = derive_signing_key(seed);
        let address = ss58_encode(&signing_key.verifying_key().to_bytes());
        debug!("Derived account {} for seed {}", address, display_name(seed));

        Ok(AccountIdentity {
            name: display_name(seed),
            seed: seed.to_string(),
            address,
            signing_key,
        })
    }

    /// Identities of all well-known dev accounts, in canonical order
    pub fn well_known(&self) -> OrchestratorResult<Vec<AccountIdentity>> {
        WELL_KNOWN_ACCOUNTS
            .iter()
            .map(|(_, seed)| self.identity(seed))
            .collect()
    }
}

fn derive_signing_key(seed: &str) -> SigningKey {
    let secret = blake2b_simd::Params::new().hash_length(32).hash(seed.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(secret.as_bytes());
    SigningKey::from_bytes(&bytes)
}

fn display_name(seed: &str) -> String {
    WELL_KNOWN_ACCOUNTS
        .iter()
        .find(|(_, s)| *s == seed)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| seed.trim_start_matches('/').to_string())
}

fn self_test() -> OrchestratorResult<()> {
    let key = derive_signing_key("//warm-up");
    let message = b"xcm-orchestrator warm-up";
    let signature = key.sign(message);
    key.verifying_key()
        .verify(message, &signature)
        .map_err(|e| OrchestratorError::Internal(format!("Signature self-test failed: {}", e)))
}

fn ss58_checksum(data: &[u8]) -> [u8; 2] {
    let mut state = blake2b_simd::Params::new().hash_length(64).to_state();
    state.update(SS58_CHECKSUM_CONTEXT);
    state.update(data);
    let hash = state.finalize();
    [hash.as_bytes()[0], hash.as_bytes()[1]]
}

/// Encode a 32-byte account id as an SS58 address
pub fn ss58_encode(public: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(SS58_PREFIX);
    data.extend_from_slice(public);
    let checksum = ss58_checksum(&data);
    data.extend_from_slice(&checksum);
    bs58::encode(data).into_string()
}

/// Decode an SS58 address with a single-byte prefix back to its account id
pub fn ss58_decode(address: &str) -> OrchestratorResult<[u8; 32]> {
    let data = bs58::decode(address)
        .into_vec()
        .map_err(|e| OrchestratorError::InvalidInput(format!("Invalid address {}: {}", address, e)))?;

    if data.len() != 35 || data[0] >= 64 {
        return Err(OrchestratorError::InvalidInput(format!(
            "Invalid address {}: unexpected length or prefix",
            address
        )));
    }
    if ss58_checksum(&data[..33]) != [data[33], data[34]] {
        return Err(OrchestratorError::InvalidInput(format!(
            "Invalid address {}: bad checksum",
            address
        )));
    }

    let mut public = [0u8; 32];
    public.copy_from_slice(&data[1..33]);
    Ok(public)
}
