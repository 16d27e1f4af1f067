use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Normalized account or contract address. Lowercased so chain results and
/// user input resolve to the same registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(address: &str) -> Result<Self, Error> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Enriched, display-ready token state for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Position in the factory's token array; `None` for tokens that were
    /// not discovered through the factory. Serialized as `-1` when absent.
    #[serde(with = "index_repr")]
    pub index: Option<u64>,
    pub token_address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub total_supply: String,
    pub balance: String,
    pub allowance: String,
    pub favourite: bool,
}

/// Where a remembered address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceSource {
    Custom,
    Discovered,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

/// A user preference for a token address, persisted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAddressPreference {
    pub token_address: Address,
    #[serde(default)]
    pub source: PreferenceSource,
    #[serde(default)]
    pub favourite: bool,
}

/// Render a raw on-chain integer divided by `10^decimals` as a plain decimal
/// string. Trailing fractional zeros are dropped, so zero renders as `"0"`.
pub fn scale_amount(raw: &BigUint, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = decimals as usize;

    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let (integer_part, decimal_part) = padded.split_at(padded.len() - decimals);
    let decimal_part = decimal_part.trim_end_matches('0');

    if decimal_part.is_empty() {
        integer_part.to_string()
    } else {
        format!("{integer_part}.{decimal_part}")
    }
}

mod index_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(index: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match index {
            Some(i) => serializer.serialize_i64(*i as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(u64::try_from(raw).ok())
    }
}
