//! `0x`-prefixed hex encoding as used by the node wire protocol.
//!
//! Quantities are lowercase without leading zeros (zero is `0x0`), byte
//! strings are two digits per byte.

use {
    crate::error::ProtocolError,
    alloy::primitives::{B256, Bytes, U256},
    serde::{Deserialize, Deserializer},
    serde_json::Value,
};

pub fn encode_quantity(value: U256) -> String {
    if value.is_zero() {
        return "0x0".to_string();
    }
    format!("0x{value:x}")
}

pub fn encode_u64(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    const_hex::encode_prefixed(bytes)
}

fn digits(value: &str) -> Result<&str, ProtocolError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| ProtocolError::InvalidHex(value.to_string()))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidHex(value.to_string()));
    }
    Ok(digits)
}

pub fn decode_quantity(value: &str) -> Result<U256, ProtocolError> {
    U256::from_str_radix(digits(value)?, 16)
        .map_err(|_| ProtocolError::InvalidHex(value.to_string()))
}

pub fn decode_u64(value: &str) -> Result<u64, ProtocolError> {
    u64::from_str_radix(digits(value)?, 16).map_err(|_| ProtocolError::InvalidHex(value.to_string()))
}

pub fn decode_bytes(value: &str) -> Result<Bytes, ProtocolError> {
    // `0x` alone is the empty byte string.
    if value == "0x" {
        return Ok(Bytes::new());
    }
    let digits = digits(value)?;
    const_hex::decode(digits)
        .map(Bytes::from)
        .map_err(|_| ProtocolError::InvalidHex(value.to_string()))
}

pub fn decode_b256(value: &str) -> Result<B256, ProtocolError> {
    let bytes = decode_bytes(value)?;
    B256::try_from(bytes.as_ref()).map_err(|_| ProtocolError::InvalidHex(value.to_string()))
}

fn as_str<'a>(value: &'a Value, expected: &'static str) -> Result<&'a str, ProtocolError> {
    value.as_str().ok_or_else(|| ProtocolError::InvalidShape {
        expected,
        value: value.clone(),
    })
}

/// Result parsers for hex encoded JSON values.
pub fn quantity(value: Value) -> Result<U256, ProtocolError> {
    decode_quantity(as_str(&value, "hex quantity")?)
}

pub fn u64_quantity(value: Value) -> Result<u64, ProtocolError> {
    decode_u64(as_str(&value, "hex quantity")?)
}

pub fn bytes(value: Value) -> Result<Bytes, ProtocolError> {
    decode_bytes(as_str(&value, "hex data")?)
}

pub fn b256(value: Value) -> Result<B256, ProtocolError> {
    decode_b256(as_str(&value, "32 byte hex data")?)
}

/// `#[serde(deserialize_with = ...)]` adapter for `u64` quantities.
pub fn deserialize_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    decode_u64(&value).map_err(serde::de::Error::custom)
}
