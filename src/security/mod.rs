//! Wallet vault: encrypted signing keys at rest, decrypted once per bot at
//! load.

pub mod vault;

pub use vault::{SigningVault, WalletRecord, WalletVault};
