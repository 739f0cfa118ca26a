use {
    alloy::primitives::Address,
    anyhow::Result,
    clap::Parser,
    node_rpc::{
        Blockchain,
        BlockchainEvent,
        GasPriceProvider,
        gas_price,
        polling::always_reachable,
        storage::InMemoryStorage,
    },
    std::{
        fmt::{self, Display, Formatter},
        future,
        sync::Arc,
        time::Duration,
    },
};

node_rpc::logging_args_with_default_filter!(
    LoggingArguments,
    "warn,node_watch=debug,node_rpc=debug"
);

/// Follows a node and logs block heights and the state of one account.
#[derive(Parser)]
struct Arguments {
    #[clap(flatten)]
    logging: LoggingArguments,

    #[clap(flatten)]
    node: node_rpc::arguments::Arguments,

    /// Account whose balance and nonce are followed.
    #[clap(long, env)]
    address: Address,

    /// Logs the suggested gas price on every new block.
    #[clap(long, env)]
    log_gas_price: bool,

    /// Period of the metrics dump in the prometheus text format. No dump when
    /// unset.
    #[clap(long, env, value_parser = humantime::parse_duration)]
    metrics_interval: Option<Duration>,
}

impl Display for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self {
            logging,
            node,
            address,
            log_gas_price,
            metrics_interval,
        } = self;

        write!(f, "{logging}")?;
        write!(f, "{node}")?;
        writeln!(f, "address: {address}")?;
        writeln!(f, "log_gas_price: {log_gas_price}")?;
        writeln!(f, "metrics_interval: {metrics_interval:?}")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arguments::parse();
    observe::tracing::initialize(
        args.logging.log_filter.as_str(),
        args.logging.log_stderr_threshold,
    );
    observe::metrics::setup_registry(Some("node_watch".into()), None);
    tracing::info!("running node-watch with\n{args}");

    let syncer = args.node.syncer(always_reachable())?;
    let gas_prices = GasPriceProvider::new(
        syncer.clone(),
        args.node.chain(),
        gas_price::Config::default(),
    );
    let blockchain = Blockchain::new(
        args.address,
        syncer,
        Arc::new(InMemoryStorage::default()),
    );
    let mut events = blockchain.events();
    tracing::info!(source = %blockchain.source(), "starting");
    blockchain.start();

    let mut metrics = args.metrics_interval.map(tokio::time::interval);
    loop {
        let metrics_tick = async {
            match metrics.as_mut() {
                Some(interval) => interval.tick().await,
                None => future::pending().await,
            }
        };
        tokio::select! {
            event = events.recv() => match event {
                Some(BlockchainEvent::BlockHeight(height)) => {
                    tracing::info!(height, "new block");
                    if args.log_gas_price {
                        match gas_prices.gas_price().await {
                            Ok(price) => tracing::info!(?price, "suggested gas price"),
                            Err(err) => tracing::warn!(?err, "failed to fetch gas price"),
                        }
                    }
                }
                Some(BlockchainEvent::AccountState(state)) => {
                    tracing::info!(?state, "account updated");
                }
                Some(BlockchainEvent::SyncState(state)) => {
                    tracing::info!(%state, "sync state changed");
                }
                None => break,
            },
            _ = metrics_tick => {
                let text = observe::metrics::encode(observe::metrics::get_registry());
                tracing::info!("metrics\n{text}");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received interrupt, shutting down");
                break;
            }
        }
    }

    blockchain.stop();
    Ok(())
}
