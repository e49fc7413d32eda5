//! ═══════════════════════════════════════════════════════════════════════════
//! 💾 PERSISTENCE - Crash-Safe JSON Store
//!
//! One document holds everything that must survive a restart: bots,
//! positions, the encrypted wallet dictionary, the trade log, and the
//! circuit breaker state.
//!
//! Write discipline:
//! • serialize → temp file in the same directory → fsync → rename over the
//!   target (readers never observe a torn file)
//! • all writes funnel through a single writer lock
//! • 0o600 on POSIX; the file carries encrypted key material
//!
//! Reads are whole-file and happen only at load; runtime state lives in
//! memory and flows back through this API at every mutation boundary.
//! ═══════════════════════════════════════════════════════════════════════════

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::bots::instance::BotInstance;
use crate::errors::{EngineError, EngineResult};
use crate::metrics::pnl::TradeRecord;
use crate::risk::circuit_breaker::CircuitBreakerState;
use crate::security::vault::WalletRecord;

pub const SCHEMA_VERSION: u32 = 1;

/// The entire persisted state of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    pub schema_version: u32,
    pub bots: Vec<BotInstance>,
    pub wallet_dictionary: HashMap<String, WalletRecord>,
    pub primary_wallet_id: Option<String>,
    pub trades: Vec<TradeRecord>,
    pub circuit_breaker: Option<CircuitBreakerState>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            bots: Vec::new(),
            wallet_dictionary: HashMap::new(),
            primary_wallet_id: None,
            trades: Vec::new(),
            circuit_breaker: None,
        }
    }
}

pub struct BotStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
    /// Single-writer queue: holders serialize the snapshot-and-replace
    writer: Mutex<()>,
}

impl BotStore {
    /// Open (or initialize) the store at `path`. A missing file starts a
    /// fresh document; a corrupt file is an error rather than silent data
    /// loss.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let document = if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            let doc: StoreDocument = serde_json::from_str(&raw)
                .with_context(|| format!("state file {} is corrupt", path.display()))?;
            if doc.schema_version > SCHEMA_VERSION {
                anyhow::bail!(
                    "state file schema v{} is newer than supported v{}",
                    doc.schema_version,
                    SCHEMA_VERSION
                );
            }
            info!(
                "💾 Loaded state: {} bot(s), {} trade(s), {} wallet(s)",
                doc.bots.len(),
                doc.trades.len(),
                doc.wallet_dictionary.len()
            );
            doc
        } else {
            info!("💾 No state file at {} - starting fresh", path.display());
            StoreDocument::default()
        };

        Ok(Self {
            path,
            document: RwLock::new(document),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole document.
    pub async fn snapshot(&self) -> StoreDocument {
        self.document.read().await.clone()
    }

    pub async fn bots(&self) -> Vec<BotInstance> {
        self.document.read().await.bots.clone()
    }

    /// Insert or replace a bot, then persist.
    pub async fn save_bot(&self, bot: &BotInstance) -> EngineResult<()> {
        {
            let mut doc = self.document.write().await;
            match doc.bots.iter_mut().find(|b| b.id == bot.id) {
                Some(slot) => *slot = bot.clone(),
                None => doc.bots.push(bot.clone()),
            }
        }
        self.save().await
    }

    /// Remove a bot permanently, then persist. Returns whether it existed.
    pub async fn delete_bot(&self, id: Uuid) -> EngineResult<bool> {
        let existed = {
            let mut doc = self.document.write().await;
            let before = doc.bots.len();
            doc.bots.retain(|b| b.id != id);
            doc.bots.len() != before
        };
        self.save().await?;
        Ok(existed)
    }

    /// Append one trade to the append-only log, then persist.
    pub async fn append_trade(&self, trade: &TradeRecord) -> EngineResult<()> {
        self.document.write().await.trades.push(trade.clone());
        self.save().await
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.document.read().await.trades.clone()
    }

    pub async fn set_circuit_breaker(&self, state: CircuitBreakerState) -> EngineResult<()> {
        self.document.write().await.circuit_breaker = Some(state);
        self.save().await
    }

    pub async fn set_wallets(
        &self,
        dictionary: HashMap<String, WalletRecord>,
        primary_wallet_id: Option<String>,
    ) -> EngineResult<()> {
        {
            let mut doc = self.document.write().await;
            doc.wallet_dictionary = dictionary;
            doc.primary_wallet_id = primary_wallet_id;
        }
        self.save().await
    }

    /// Serialize the current document and atomically replace the state
    /// file.
    pub async fn save(&self) -> EngineResult<()> {
        let _writer = self.writer.lock().await;

        let json = {
            let doc = self.document.read().await;
            serde_json::to_string_pretty(&*doc)
                .map_err(|e| EngineError::Persistence(format!("serialize: {}", e)))?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_replace(&path, json.as_bytes()))
            .await
            .map_err(|e| EngineError::Persistence(format!("writer task: {}", e)))?
            .map_err(|e| EngineError::Persistence(format!("write: {:#}", e)))
    }
}

/// Temp file + fsync + rename in the target's directory, owner-only mode.
fn atomic_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".into()),
        std::process::id()
    ));

    {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut tmp = options
            .open(&tmp_path)
            .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("failed to replace {}", path.display()));
    }

    // Make the rename itself durable
    if let Ok(dir_handle) = std::fs::File::open(dir) {
        if let Err(e) = dir_handle.sync_all() {
            warn!("directory fsync failed after state write: {}", e);
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
