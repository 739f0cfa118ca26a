//! Networks the client knows defaults for, and where to reach their nodes.

use {
    anyhow::{Context, Result},
    std::time::Duration,
    url::Url,
};

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chain {
    pub id: u64,
    /// Gas limit used when a transaction doesn't specify one.
    pub gas_limit: u64,
    /// Block height polling period of the HTTP syncer.
    pub sync_interval: Duration,
    pub eip1559: bool,
}

impl Chain {
    const fn new(id: u64, gas_limit: u64, eip1559: bool) -> Self {
        Self {
            id,
            gas_limit,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            eip1559,
        }
    }

    pub const ETHEREUM: Self = Self::new(1, 2_000_000, true);
    pub const BINANCE_SMART_CHAIN: Self = Self::new(56, 10_000_000, false);
    pub const POLYGON: Self = Self::new(137, 10_000_000, true);
    pub const AVALANCHE: Self = Self::new(43114, 10_000_000, true);
    pub const OPTIMISM: Self = Self::new(10, 10_000_000, false);
    pub const ARBITRUM_ONE: Self = Self::new(42161, 10_000_000, false);
    pub const GNOSIS: Self = Self::new(100, 10_000_000, true);
    pub const FANTOM: Self = Self::new(250, 10_000_000, false);
    pub const BASE: Self = Self::new(8453, 10_000_000, true);
    pub const ZKSYNC: Self = Self::new(324, 10_000_000, true);
    pub const SEPOLIA: Self = Self::new(11_155_111, 2_000_000, true);
    pub const BINANCE_SMART_CHAIN_TESTNET: Self = Self::new(97, 10_000_000, false);

    const KNOWN: [Self; 12] = [
        Self::ETHEREUM,
        Self::BINANCE_SMART_CHAIN,
        Self::POLYGON,
        Self::AVALANCHE,
        Self::OPTIMISM,
        Self::ARBITRUM_ONE,
        Self::GNOSIS,
        Self::FANTOM,
        Self::BASE,
        Self::ZKSYNC,
        Self::SEPOLIA,
        Self::BINANCE_SMART_CHAIN_TESTNET,
    ];

    /// Preset for a known chain id, generic defaults otherwise.
    pub fn from_id(id: u64) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|chain| chain.id == id)
            .unwrap_or(Self::new(id, 10_000_000, false))
    }
}

/// Where RPC calls go: a list of equivalent HTTP endpoints or one socket.
#[derive(Clone, PartialEq, Eq)]
pub enum RpcSource {
    Http { urls: Vec<Url>, auth: Option<String> },
    WebSocket { url: Url, auth: Option<String> },
}

impl std::fmt::Debug for RpcSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |auth: &Option<String>| auth.as_ref().map(|_| "SECRET");
        match self {
            Self::Http { urls, auth } => f
                .debug_struct("Http")
                .field("urls", urls)
                .field("auth", &redacted(auth))
                .finish(),
            Self::WebSocket { url, auth } => f
                .debug_struct("WebSocket")
                .field("url", url)
                .field("auth", &redacted(auth))
                .finish(),
        }
    }
}

fn parse(url: &str) -> Result<Url> {
    url.parse().with_context(|| format!("invalid node url {url}"))
}

fn http(urls: &[&str]) -> Result<RpcSource> {
    Ok(RpcSource::Http {
        urls: urls.iter().copied().map(parse).collect::<Result<_>>()?,
        auth: None,
    })
}

impl RpcSource {
    pub fn infura_http(subdomain: &str, project_id: &str, secret: Option<String>) -> Result<Self> {
        Ok(Self::Http {
            urls: vec![parse(&format!("https://{subdomain}.infura.io/v3/{project_id}"))?],
            auth: secret,
        })
    }

    pub fn infura_websocket(
        subdomain: &str,
        project_id: &str,
        secret: Option<String>,
    ) -> Result<Self> {
        Ok(Self::WebSocket {
            url: parse(&format!("wss://{subdomain}.infura.io/ws/v3/{project_id}"))?,
            auth: secret,
        })
    }

    pub fn binance_smart_chain_http() -> Result<Self> {
        http(&[
            "https://bsc-dataseed.binance.org",
            "https://bsc-dataseed1.binance.org",
            "https://bsc-dataseed2.binance.org",
            "https://bsc-dataseed3.binance.org",
            "https://bsc-dataseed4.binance.org",
        ])
    }

    pub fn polygon_http() -> Result<Self> {
        http(&["https://polygon-rpc.com"])
    }

    pub fn avalanche_http() -> Result<Self> {
        http(&["https://api.avax.network/ext/bc/C/rpc"])
    }

    pub fn optimism_http() -> Result<Self> {
        http(&["https://mainnet.optimism.io"])
    }

    pub fn arbitrum_one_http() -> Result<Self> {
        http(&["https://arb1.arbitrum.io/rpc"])
    }

    pub fn gnosis_http() -> Result<Self> {
        http(&["https://rpc.gnosischain.com"])
    }

    pub fn fantom_http() -> Result<Self> {
        http(&["https://rpc.fantom.network"])
    }

    pub fn base_http() -> Result<Self> {
        http(&["https://mainnet.base.org"])
    }

    pub fn zksync_http() -> Result<Self> {
        http(&["https://mainnet.era.zksync.io"])
    }

    /// Public endpoints for a known chain.
    pub fn public(chain: &Chain) -> Option<Result<Self>> {
        let source = match chain.id {
            56 => Self::binance_smart_chain_http(),
            137 => Self::polygon_http(),
            43114 => Self::avalanche_http(),
            10 => Self::optimism_http(),
            42161 => Self::arbitrum_one_http(),
            100 => Self::gnosis_http(),
            250 => Self::fantom_http(),
            8453 => Self::base_http(),
            324 => Self::zksync_http(),
            _ => return None,
        };
        Some(source)
    }
}
