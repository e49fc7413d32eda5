//! Formatting helpers: wei-scale integers as decimal strings, addresses,
//! hashes, and day keys shared by logs, CSV export, and notifications.
//!
//! Accounting never leaves integer space; conversion to a decimal string
//! happens only at display boundaries.

use chrono::{DateTime, Utc};
use ethers::types::{I256, U256};

const WEI_PER_ETH_DECIMALS: usize = 18;

/// Render a wei quantity as a fixed-point ETH decimal string.
///
/// `1_500_000_000_000_000_000` → `"1.5"`, `1` → `"0.000000000000000001"`.
pub fn wei_to_eth_string(wei: U256) -> String {
    let base = U256::exp10(WEI_PER_ETH_DECIMALS);
    let whole = wei / base;
    let frac = wei % base;

    if frac.is_zero() {
        return whole.to_string();
    }

    let frac_str = format!("{:0>width$}", frac.to_string(), width = WEI_PER_ETH_DECIMALS);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{}.{}", whole, trimmed)
}

/// Signed variant for profit figures.
pub fn wei_to_eth_string_signed(wei: I256) -> String {
    if wei.is_negative() {
        // I256::MIN has no unsigned twin; unreachable at portfolio scale but
        // saturate rather than panic.
        let abs = wei.checked_abs().unwrap_or(I256::MAX).into_raw();
        format!("-{}", wei_to_eth_string(abs))
    } else {
        wei_to_eth_string(wei.into_raw())
    }
}

/// Compact ETH display for logs: 6 significant fractional digits.
pub fn format_eth(wei: U256) -> String {
    let s = wei_to_eth_string(wei);
    match s.split_once('.') {
        Some((whole, frac)) if frac.len() > 6 => format!("{}.{}", whole, &frac[..6]),
        _ => s,
    }
}

pub fn format_eth_signed(wei: I256) -> String {
    let s = wei_to_eth_string_signed(wei);
    match s.split_once('.') {
        Some((whole, frac)) if frac.len() > 6 => format!("{}.{}", whole, &frac[..6]),
        _ => s,
    }
}

/// `0x1234…abcd` shortening for tx hashes and addresses in log lines.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}…{}", &hash[..6], &hash[hash.len() - 4..])
}

/// Day bucket key used by the circuit breaker and P&L trend (UTC).
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// Serde helpers - wei on the wire is always a decimal string
// ═══════════════════════════════════════════════════════════════════════════

pub mod serde_wei {
    use ethers::types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

pub mod serde_wei_opt {
    use ethers::types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => U256::from_dec_str(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

pub mod serde_wei_signed {
    use ethers::types::I256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let s = String::deserialize(deserializer)?;
        I256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wei_to_eth_string() {
        assert_eq!(wei_to_eth_string(U256::zero()), "0");
        assert_eq!(wei_to_eth_string(U256::exp10(18)), "1");
        assert_eq!(
            wei_to_eth_string(U256::exp10(18) * 3 / 2),
            "1.5"
        );
        assert_eq!(wei_to_eth_string(U256::one()), "0.000000000000000001");
        assert_eq!(
            wei_to_eth_string(U256::from(1_230_000_000_000_000_000u128)),
            "1.23"
        );
    }

    #[test]
    fn test_signed_rendering() {
        let neg = I256::from(-1_500_000_000_000_000_000i128);
        assert_eq!(wei_to_eth_string_signed(neg), "-1.5");
        assert_eq!(wei_to_eth_string_signed(I256::zero()), "0");
    }

    #[test]
    fn test_truncate_hash() {
        let h = "0xabcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";
        let t = truncate_hash(h);
        assert!(t.starts_with("0xabcd"));
        assert!(t.ends_with("6789"));
        assert_eq!(truncate_hash("0xshort"), "0xshort");
    }

    #[test]
    fn test_serde_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrap {
            #[serde(with = "serde_wei")]
            amount: U256,
            #[serde(with = "serde_wei_signed")]
            profit: I256,
        }

        let w = Wrap {
            amount: U256::from_dec_str("123456789012345678901234567890").unwrap(),
            profit: I256::from(-42i64),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"123456789012345678901234567890\""));
        assert!(json.contains("\"-42\""));

        let back: Wrap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount, w.amount);
        assert_eq!(back.profit, w.profit);
    }
}
