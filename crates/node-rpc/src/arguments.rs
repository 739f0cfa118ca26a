//! Command line arguments configuring the node connection, and the helpers to
//! turn them into a running syncer.

use {
    crate::{
        chain::{Chain, RpcSource},
        http::{self, HttpTransport},
        polling::PollingSyncer,
        socket::{
            SocketSyncer,
            ws::{self, WebSocket},
        },
        syncer::RpcSyncer,
    },
    anyhow::{Context, Result, ensure},
    std::{
        fmt::{self, Display, Formatter},
        sync::Arc,
        time::Duration,
    },
    tokio::sync::watch,
    url::Url,
};

#[macro_export]
macro_rules! logging_args_with_default_filter {
    ($struct_name:ident ,$default_filter:literal) => {
        #[derive(clap::Parser)]
        pub struct $struct_name {
            #[clap(long, env, default_value = $default_filter)]
            pub log_filter: String,

            #[clap(long, env, default_value = "error")]
            pub log_stderr_threshold: ::tracing::level_filters::LevelFilter,
        }

        impl ::std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let Self {
                    log_filter,
                    log_stderr_threshold,
                } = self;

                writeln!(f, "log_filter: {}", log_filter)?;
                writeln!(f, "log_stderr_threshold: {}", log_stderr_threshold)?;
                Ok(())
            }
        }
    };
}

#[derive(clap::Parser)]
#[group(skip)]
pub struct Arguments {
    /// Equivalent HTTP node endpoints, comma separated. Calls fail over to
    /// the next one in order. Defaults to the public endpoints of the chain.
    #[clap(long, env, use_value_delimiter = true)]
    pub node_urls: Vec<Url>,

    /// WebSocket node endpoint. When set it is used instead of the HTTP
    /// endpoints.
    #[clap(long, env)]
    pub node_ws_url: Option<Url>,

    /// Secret sent as basic auth password to the node.
    #[clap(long, env)]
    pub node_auth: Option<String>,

    #[clap(long, env, default_value = "1")]
    pub chain_id: u64,

    /// Block height polling period. Defaults to the chain preset.
    #[clap(long, env, value_parser = humantime::parse_duration)]
    pub sync_interval: Option<Duration>,

    /// Default transaction gas limit. Defaults to the chain preset.
    #[clap(long, env)]
    pub gas_limit: Option<u64>,

    /// Timeout of a single HTTP request attempt.
    #[clap(
        long,
        env,
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    pub http_timeout: Duration,

    /// Delayed retries of a rate limited request before moving on to the
    /// next endpoint.
    #[clap(long, env, default_value = "5")]
    pub rate_limit_max_retries: usize,

    /// Pause before reconnecting a dropped WebSocket.
    #[clap(
        long,
        env,
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    pub reconnect_delay: Duration,
}

pub fn display_secret_option<T>(
    f: &mut Formatter<'_>,
    name: &str,
    option: &Option<T>,
) -> std::fmt::Result {
    display_option(f, name, &option.as_ref().map(|_| "SECRET"))
}

pub fn display_option(
    f: &mut Formatter<'_>,
    name: &str,
    option: &Option<impl Display>,
) -> std::fmt::Result {
    write!(f, "{name}: ")?;
    match option {
        Some(display) => writeln!(f, "{display}"),
        None => writeln!(f, "None"),
    }
}

impl Display for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self {
            node_urls,
            node_ws_url,
            node_auth,
            chain_id,
            sync_interval,
            gas_limit,
            http_timeout,
            rate_limit_max_retries,
            reconnect_delay,
        } = self;

        writeln!(f, "node_urls: {node_urls:?}")?;
        display_option(f, "node_ws_url", node_ws_url)?;
        display_secret_option(f, "node_auth", node_auth)?;
        writeln!(f, "chain_id: {chain_id}")?;
        writeln!(f, "sync_interval: {sync_interval:?}")?;
        display_option(f, "gas_limit", gas_limit)?;
        writeln!(f, "http_timeout: {http_timeout:?}")?;
        writeln!(f, "rate_limit_max_retries: {rate_limit_max_retries}")?;
        writeln!(f, "reconnect_delay: {reconnect_delay:?}")?;
        Ok(())
    }
}

impl Arguments {
    /// The chain preset with command line overrides applied.
    pub fn chain(&self) -> Chain {
        let mut chain = Chain::from_id(self.chain_id);
        if let Some(interval) = self.sync_interval {
            chain.sync_interval = interval;
        }
        if let Some(gas_limit) = self.gas_limit {
            chain.gas_limit = gas_limit;
        }
        chain
    }

    pub fn rpc_source(&self) -> Result<RpcSource> {
        if let Some(url) = &self.node_ws_url {
            return Ok(RpcSource::WebSocket {
                url: url.clone(),
                auth: self.node_auth.clone(),
            });
        }
        if !self.node_urls.is_empty() {
            return Ok(RpcSource::Http {
                urls: self.node_urls.clone(),
                auth: self.node_auth.clone(),
            });
        }
        RpcSource::public(&self.chain())
            .with_context(|| format!("no node url given and no public endpoint known for chain {}", self.chain_id))?
    }

    pub fn http_config(&self) -> http::Config {
        http::Config {
            rate_limit_max_retries: self.rate_limit_max_retries,
        }
    }

    pub fn ws_config(&self) -> ws::Config {
        ws::Config {
            reconnect_delay: self.reconnect_delay,
        }
    }

    /// Builds the syncer for the configured source. Must be called from
    /// within a tokio runtime.
    pub fn syncer(&self, reachability: watch::Receiver<bool>) -> Result<Arc<dyn RpcSyncer>> {
        let chain = self.chain();
        let syncer: Arc<dyn RpcSyncer> = match self.rpc_source()? {
            RpcSource::Http { urls, auth } => {
                ensure!(!urls.is_empty(), "at least one node url is required");
                let client = reqwest::Client::builder()
                    .timeout(self.http_timeout)
                    .build()
                    .context("failed to build http client")?;
                let transport = HttpTransport::new(client, urls, auth, self.http_config())?;
                Arc::new(PollingSyncer::new(
                    Arc::new(transport),
                    reachability,
                    chain.sync_interval,
                ))
            }
            RpcSource::WebSocket { url, auth } => Arc::new(SocketSyncer::new(WebSocket::new(
                url,
                auth,
                self.ws_config(),
            ))),
        };
        Ok(syncer)
    }
}
