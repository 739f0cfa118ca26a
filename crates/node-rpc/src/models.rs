use {
    crate::{jsonrpc::hex, syncer::SyncError},
    alloy::primitives::{Address, B256, Bytes, U256},
    serde::Deserialize,
    std::fmt::{self, Display, Formatter},
};

/// Balance and transaction count of one address, always fetched and replaced
/// as a pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: u64,
}

/// Synchronization status the façade exposes to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncState {
    Synced,
    Syncing { progress: Option<f64> },
    NotSynced(SyncError),
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing { .. })
    }

    pub fn is_not_synced(&self) -> bool {
        matches!(self, Self::NotSynced(_))
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced => f.write_str("synced"),
            Self::Syncing { progress } => write!(f, "syncing {}", progress.unwrap_or_default()),
            Self::NotSynced(cause) => write!(f, "not synced: {cause}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasPrice {
    Legacy {
        gas_price: u64,
    },
    Eip1559 {
        max_fee_per_gas: u64,
        max_priority_fee_per_gas: u64,
    },
}

/// The header fields carried by `newHeads` notifications that we use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(deserialize_with = "hex::deserialize_u64")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(deserialize_with = "hex::deserialize_u64")]
    pub timestamp: u64,
}

/// An unsigned transaction as handed to the signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTransaction {
    pub gas_price: GasPrice,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub v: u64,
    pub r: B256,
    pub s: B256,
}

/// Record of a transaction this client broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub hash: B256,
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub gas_price: GasPrice,
    pub gas_limit: u64,
    pub input: Bytes,
    /// Unix timestamp of the broadcast.
    pub timestamp: u64,
}
