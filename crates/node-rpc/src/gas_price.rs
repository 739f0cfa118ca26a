//! Gas price suggestions for new transactions: `eth_gasPrice` on legacy
//! chains, a fee history based estimate on EIP-1559 chains.

use {
    crate::{
        chain::Chain,
        error::{Error, ProtocolError},
        jsonrpc::methods,
        models::GasPrice,
        transport::{Transport, TransportExt},
    },
    alloy::{eips::BlockNumberOrTag, rpc::types::FeeHistory},
    serde_json::json,
};

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of blocks the fee history looks back.
    pub past_blocks: u64,
    /// Percentile of the priority fees paid in those blocks to pay.
    pub reward_percentile: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            past_blocks: 10,
            reward_percentile: 20.0,
        }
    }
}

pub struct GasPriceProvider<T> {
    transport: T,
    chain: Chain,
    config: Config,
}

impl<T: Transport> GasPriceProvider<T> {
    pub fn new(transport: T, chain: Chain, config: Config) -> Self {
        Self {
            transport,
            chain,
            config,
        }
    }

    /// Suggested price in the fee model of the chain.
    pub async fn gas_price(&self) -> Result<GasPrice, Error> {
        if self.chain.eip1559 {
            self.eip1559().await
        } else {
            self.legacy().await
        }
    }

    /// The node's own `eth_gasPrice` suggestion.
    pub async fn legacy(&self) -> Result<GasPrice, Error> {
        let price = self.transport.fetch(methods::gas_price()).await?;
        let gas_price = u64::try_from(price).map_err(|_| ProtocolError::InvalidShape {
            expected: "gas price fitting 64 bits",
            value: json!(price),
        })?;
        Ok(GasPrice::Legacy { gas_price })
    }

    pub async fn fee_history(
        &self,
        block_count: u64,
        newest: BlockNumberOrTag,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, Error> {
        self.transport
            .fetch(methods::fee_history(block_count, newest, reward_percentiles))
            .await
    }

    pub async fn eip1559(&self) -> Result<GasPrice, Error> {
        let history = self
            .fee_history(
                self.config.past_blocks,
                BlockNumberOrTag::Latest,
                &[self.config.reward_percentile],
            )
            .await?;
        let price = estimate(&history)?;
        tracing::debug!(?price, "estimated eip-1559 gas price");
        Ok(price)
    }

    /// The gas limit to use when no estimate is available.
    pub fn gas_limit(&self, estimate: Option<u64>) -> u64 {
        estimate.unwrap_or(self.chain.gas_limit)
    }
}

/// Pays the median of the requested reward percentile over the window on top
/// of twice the latest base fee.
fn estimate(history: &FeeHistory) -> Result<GasPrice, ProtocolError> {
    // The last entry is the prediction for the next block.
    let base_fee = match history.base_fee_per_gas.as_slice() {
        [.., latest, _] if *latest != 0 => *latest,
        [.., next] => *next,
        [] => 0,
    };

    let mut rewards: Vec<u128> = history
        .reward
        .iter()
        .flatten()
        .filter_map(|block| block.first().copied())
        .filter(|reward| *reward != 0)
        .collect();
    rewards.sort_unstable();
    let priority_fee = rewards.get(rewards.len() / 2).copied().unwrap_or(0);

    let to_u64 = |value: u128| {
        u64::try_from(value).map_err(|_| ProtocolError::InvalidShape {
            expected: "fee fitting 64 bits",
            value: json!(value.to_string()),
        })
    };
    let max_priority_fee_per_gas = to_u64(priority_fee)?;
    let max_fee_per_gas = to_u64(
        base_fee
            .saturating_mul(2)
            .saturating_add(priority_fee),
    )?;
    Ok(GasPrice::Eip1559 {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    })
}
