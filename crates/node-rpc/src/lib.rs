pub mod arguments;
pub mod blockchain;
pub mod chain;
pub mod error;
pub mod gas_price;
pub mod http;
mod instrumentation;
pub mod jsonrpc;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod nonce;
pub mod polling;
pub mod socket;
pub mod storage;
pub mod syncer;
pub mod transport;

pub use self::{
    blockchain::{Blockchain, BlockchainEvent, TransactionEncoder},
    chain::{Chain, RpcSource},
    error::{Error, ProtocolError, RpcFault},
    gas_price::GasPriceProvider,
    jsonrpc::{RpcRequest, RpcResponse, RpcSubscription},
    models::{AccountState, SyncState},
    nonce::{NonceAggregator, NonceSource},
    syncer::{RpcSyncer, SyncError, SyncerEvent, SyncerState},
    transport::{Transport, TransportExt},
};
