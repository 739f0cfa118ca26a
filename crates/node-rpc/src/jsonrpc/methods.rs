//! Constructors for the node operations the façade needs.

use {
    super::{RpcRequest, deserialize, hex},
    crate::models::GasPrice,
    alloy::{
        eips::BlockNumberOrTag,
        primitives::{Address, B256, Bytes, U256},
        rpc::types::{Block, FeeHistory, Log, Transaction, TransactionReceipt},
    },
    serde_json::{Map, Value, json},
};

fn block_param(block: BlockNumberOrTag) -> Value {
    match block {
        BlockNumberOrTag::Number(number) => json!(hex::encode_u64(number)),
        tag => json!(tag.to_string()),
    }
}

pub fn block_number() -> RpcRequest<u64> {
    RpcRequest::new("eth_blockNumber", vec![], hex::u64_quantity)
}

pub fn chain_id() -> RpcRequest<u64> {
    RpcRequest::new("eth_chainId", vec![], hex::u64_quantity)
}

pub fn gas_price() -> RpcRequest<U256> {
    RpcRequest::new("eth_gasPrice", vec![], hex::quantity)
}

/// Base fees and priority fee percentiles of the `block_count` blocks ending
/// at `newest`.
pub fn fee_history(
    block_count: u64,
    newest: BlockNumberOrTag,
    reward_percentiles: &[f64],
) -> RpcRequest<FeeHistory> {
    RpcRequest::new(
        "eth_feeHistory",
        vec![
            json!(hex::encode_u64(block_count)),
            block_param(newest),
            json!(reward_percentiles),
        ],
        deserialize,
    )
}

pub fn get_balance(address: Address, block: BlockNumberOrTag) -> RpcRequest<U256> {
    RpcRequest::new(
        "eth_getBalance",
        vec![json!(address), block_param(block)],
        hex::quantity,
    )
}

pub fn get_transaction_count(address: Address, block: BlockNumberOrTag) -> RpcRequest<u64> {
    RpcRequest::new(
        "eth_getTransactionCount",
        vec![json!(address), block_param(block)],
        hex::u64_quantity,
    )
}

/// Broadcasts an already signed and encoded transaction, returning its hash.
pub fn send_raw_transaction(encoded: &[u8]) -> RpcRequest<B256> {
    RpcRequest::new(
        "eth_sendRawTransaction",
        vec![json!(hex::encode_bytes(encoded))],
        hex::b256,
    )
}

pub fn get_transaction_by_hash(hash: B256) -> RpcRequest<Option<Transaction>> {
    RpcRequest::nullable("eth_getTransactionByHash", vec![json!(hash)], deserialize)
}

pub fn get_transaction_receipt(hash: B256) -> RpcRequest<Option<TransactionReceipt>> {
    RpcRequest::nullable("eth_getTransactionReceipt", vec![json!(hash)], deserialize)
}

pub fn call(to: Address, data: &[u8], block: BlockNumberOrTag) -> RpcRequest<Bytes> {
    RpcRequest::new(
        "eth_call",
        vec![
            json!({ "to": to, "data": hex::encode_bytes(data) }),
            block_param(block),
        ],
        hex::bytes,
    )
}

pub fn get_storage_at(
    contract: Address,
    position: &[u8],
    block: BlockNumberOrTag,
) -> RpcRequest<Bytes> {
    RpcRequest::new(
        "eth_getStorageAt",
        vec![
            json!(contract),
            json!(hex::encode_bytes(position)),
            block_param(block),
        ],
        hex::bytes,
    )
}

/// Fields of an `eth_estimateGas` call object.
#[derive(Clone, Debug, Default)]
pub struct EstimateGas {
    pub from: Address,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<GasPrice>,
    pub data: Option<Bytes>,
}

pub fn estimate_gas(params: EstimateGas) -> RpcRequest<u64> {
    let mut object = Map::new();
    object.insert("from".into(), json!(params.from));
    if let Some(to) = params.to {
        object.insert("to".into(), json!(to));
    }
    if let Some(value) = params.value {
        object.insert("value".into(), json!(hex::encode_quantity(value)));
    }
    if let Some(gas) = params.gas_limit {
        object.insert("gas".into(), json!(hex::encode_u64(gas)));
    }
    match params.gas_price {
        Some(GasPrice::Legacy { gas_price }) => {
            object.insert("gasPrice".into(), json!(hex::encode_u64(gas_price)));
        }
        Some(GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }) => {
            object.insert("maxFeePerGas".into(), json!(hex::encode_u64(max_fee_per_gas)));
            object.insert(
                "maxPriorityFeePerGas".into(),
                json!(hex::encode_u64(max_priority_fee_per_gas)),
            );
        }
        None => {}
    }
    if let Some(data) = params.data {
        object.insert("data".into(), json!(hex::encode_bytes(&data)));
    }
    RpcRequest::new("eth_estimateGas", vec![Value::Object(object)], hex::u64_quantity)
}

/// Log filter of `eth_getLogs`.
///
/// Every topic position is either a wildcard (`None`) or a set of accepted
/// values; a single accepted value is sent as a plain string.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub from_block: Option<BlockNumberOrTag>,
    pub to_block: Option<BlockNumberOrTag>,
    pub topics: Option<Vec<Option<Vec<B256>>>>,
}

pub fn get_logs(filter: LogFilter) -> RpcRequest<Vec<Log>> {
    let mut object = Map::new();
    if let Some(address) = filter.address {
        object.insert("address".into(), json!(address));
    }
    if let Some(block) = filter.from_block {
        object.insert("fromBlock".into(), block_param(block));
    }
    if let Some(block) = filter.to_block {
        object.insert("toBlock".into(), block_param(block));
    }
    if let Some(topics) = filter.topics {
        let topics = topics
            .into_iter()
            .map(|position| match position {
                None => Value::Null,
                Some(values) if values.len() == 1 => json!(values[0]),
                Some(values) => json!(values),
            })
            .collect();
        object.insert("topics".into(), Value::Array(topics));
    }
    RpcRequest::new("eth_getLogs", vec![Value::Object(object)], deserialize)
}

/// Fetches a block header with transaction hashes only.
pub fn get_block_by_number(number: u64) -> RpcRequest<Option<Block>> {
    RpcRequest::nullable(
        "eth_getBlockByNumber",
        vec![json!(hex::encode_u64(number)), json!(false)],
        deserialize,
    )
}
