//! ═══════════════════════════════════════════════════════════════════════════
//! 🔐 WALLET VAULT - Encrypted Signing Keys
//!
//! Private keys never touch disk in the clear. Each key is sealed with
//! AES-256-GCM under a key derived from the vault password via
//! PBKDF2-HMAC-SHA256 (600 000 iterations) and stored as
//! `saltHex:ciphertextHex`, where the ciphertext carries the GCM nonce as
//! its first 12 bytes.
//!
//! Decryption happens once per wallet at load; the derived signers are
//! cached and handed out read-only for the life of the daemon.
//! ═══════════════════════════════════════════════════════════════════════════

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::signers::{LocalWallet, Signer};
use log::{debug, info};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::{EngineError, EngineResult};

// ───────────────────────────────────────────────────────────────────────────
// Cipher parameters
// ───────────────────────────────────────────────────────────────────────────

const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// One wallet dictionary entry as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub address: String,
    /// `saltHex:ciphertextHex`
    pub encrypted_private_key: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "type")]
    pub wallet_type: String,
}

// ───────────────────────────────────────────────────────────────────────────
// Sealing / unsealing
// ───────────────────────────────────────────────────────────────────────────

fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Seal a raw private key under the vault password.
pub fn encrypt_secret(password: &str, secret: &[u8]) -> EngineResult<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret)
        .map_err(|_| EngineError::Vault("encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(format!("{}:{}", hex::encode(salt), hex::encode(sealed)))
}

/// Unseal `saltHex:ciphertextHex` back into the raw private key.
pub fn decrypt_secret(password: &str, encoded: &str) -> EngineResult<Vec<u8>> {
    let (salt_hex, sealed_hex) = encoded
        .split_once(':')
        .ok_or_else(|| EngineError::Vault("malformed key blob: missing separator".into()))?;

    let salt = hex::decode(salt_hex)
        .map_err(|e| EngineError::Vault(format!("malformed salt hex: {}", e)))?;
    if salt.len() < SALT_LEN {
        return Err(EngineError::Vault(format!(
            "salt too short: {} bytes, need at least {}",
            salt.len(),
            SALT_LEN
        )));
    }

    let sealed = hex::decode(sealed_hex)
        .map_err(|e| EngineError::Vault(format!("malformed ciphertext hex: {}", e)))?;
    if sealed.len() <= NONCE_LEN {
        return Err(EngineError::Vault("ciphertext too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EngineError::Vault("decryption failed (wrong password?)".into()))
}

// ───────────────────────────────────────────────────────────────────────────
// Vault
// ───────────────────────────────────────────────────────────────────────────

/// Signer lookup used by the bots: wallet address → signing account.
#[async_trait]
pub trait SigningVault: Send + Sync {
    async fn signer_for(&self, wallet_address: &str) -> EngineResult<LocalWallet>;
}

pub struct WalletVault {
    password: String,
    records: RwLock<HashMap<String, WalletRecord>>,
    primary_wallet_id: RwLock<Option<String>>,
    /// Lowercased address → decrypted signer
    signers: RwLock<HashMap<String, LocalWallet>>,
}

impl WalletVault {
    pub fn new(password: String) -> Self {
        Self {
            password,
            records: RwLock::new(HashMap::new()),
            primary_wallet_id: RwLock::new(None),
            signers: RwLock::new(HashMap::new()),
        }
    }

    /// Install the wallet dictionary from the persisted store. Does not
    /// decrypt anything yet; signers unseal lazily on first use and stay
    /// cached.
    pub async fn load(
        &self,
        dictionary: HashMap<String, WalletRecord>,
        primary_wallet_id: Option<String>,
    ) {
        info!("🔐 Vault loaded: {} wallet(s)", dictionary.len());
        *self.records.write().await = dictionary;
        *self.primary_wallet_id.write().await = primary_wallet_id;
    }

    /// Generate a fresh wallet, sealed under the vault password. Returns
    /// the record (for persistence) and its id.
    pub async fn create_wallet(&self, name: &str) -> EngineResult<(String, WalletRecord)> {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);

        let wallet = LocalWallet::from_bytes(&secret)
            .map_err(|e| EngineError::Vault(format!("key generation: {}", e)))?;
        let address = format!("{:#x}", wallet.address());

        let record = WalletRecord {
            address: address.clone(),
            encrypted_private_key: encrypt_secret(&self.password, &secret)?,
            created_at: Utc::now(),
            name: name.to_string(),
            wallet_type: "generated".to_string(),
        };

        let id = uuid::Uuid::new_v4().to_string();
        self.records.write().await.insert(id.clone(), record.clone());
        self.signers.write().await.insert(address.to_lowercase(), wallet);

        info!("🔑 Created wallet '{}' at {}", name, address);
        Ok((id, record))
    }

    pub async fn wallet_dictionary(&self) -> HashMap<String, WalletRecord> {
        self.records.read().await.clone()
    }

    pub async fn primary_wallet_address(&self) -> Option<String> {
        let id = self.primary_wallet_id.read().await.clone()?;
        let records = self.records.read().await;
        records.get(&id).map(|r| r.address.clone())
    }

    async fn unseal(&self, record: &WalletRecord) -> EngineResult<LocalWallet> {
        let secret = decrypt_secret(&self.password, &record.encrypted_private_key)?;
        let wallet = LocalWallet::from_bytes(&secret)
            .map_err(|e| EngineError::Vault(format!("decrypted key invalid: {}", e)))?;

        let derived = format!("{:#x}", wallet.address());
        if !derived.eq_ignore_ascii_case(&record.address) {
            return Err(EngineError::Vault(format!(
                "decrypted key derives {} but record claims {}",
                derived, record.address
            )));
        }
        Ok(wallet)
    }
}

#[async_trait]
impl SigningVault for WalletVault {
    async fn signer_for(&self, wallet_address: &str) -> EngineResult<LocalWallet> {
        let key = wallet_address.to_lowercase();

        if let Some(signer) = self.signers.read().await.get(&key) {
            return Ok(signer.clone());
        }

        let record = {
            let records = self.records.read().await;
            records
                .values()
                .find(|r| r.address.eq_ignore_ascii_case(wallet_address))
                .cloned()
        }
        .ok_or_else(|| {
            EngineError::Vault(format!("no wallet record for address {}", wallet_address))
        })?;

        let wallet = self.unseal(&record).await?;
        debug!("Unsealed signer for {}", wallet_address);
        self.signers.write().await.insert(key, wallet.clone());
        Ok(wallet)
    }
}
