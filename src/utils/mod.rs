//! Shared utilities: notification fan-out and display formatting.

pub mod alerts;
pub mod format;

pub use alerts::{AlertConfig, AlertEvent, AlertHub};
pub use format::{format_eth, format_eth_signed, truncate_hash, wei_to_eth_string};
