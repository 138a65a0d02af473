use std::{path::PathBuf, time::Duration};

use clap::Parser;
use miner::{load_config_file, Miner, MinerConfig};
use shared::log::init_log;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::*;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(long, value_name = "POOL_ADDR", help = "Pool address to mine for, host:port")]
    pool: Option<String>,

    #[arg(long, value_name = "CONFIG_FILE", help = "JSON miner configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "MILLIS", help = "Artificial delay spent on every nonce")]
    speed: Option<u64>,

    #[arg(long, value_name = "RECONNECT", help = "The number of reconnect times")]
    reconnect: Option<u32>,
}

fn build_config(args: Args) -> anyhow::Result<MinerConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => MinerConfig::default(),
    };

    if let Some(pool) = args.pool {
        config.pool = pool;
    }
    if let Some(speed) = args.speed {
        config.speed_millis = speed;
    }
    if let Some(reconnect) = args.reconnect {
        config.reconnect = reconnect;
    }

    anyhow::ensure!(
        !config.pool.is_empty(),
        "no pool address, pass --pool or set `pool` in the config file"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log("miner=info");

    info!("VERSION: {}", env!("CARGO_PKG_VERSION"));

    let config = build_config(Args::parse())?;

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            if let Err(err) = signal::ctrl_c().await {
                error!("failed to listen for Ctrl+C: {err}");
                return;
            }
            info!("ctrl+c received. start shutdown and wait for mining to complete");
            stop.cancel();
        }
    });

    let mut attempts = 0;
    loop {
        match Miner::connect(&config).await {
            Ok(miner) => {
                attempts = 0;
                let state = miner.state().clone();
                let closed = miner.closed();
                tokio::pin!(closed);

                tokio::select! {
                    _ = &mut closed => {}
                    _ = stop.cancelled() => {
                        state.shutdown();
                        closed.await;
                        info!("miner stopped");
                        return Ok(());
                    }
                }
            }
            Err(err) => error!("fail to connect to pool {}: {err}", config.pool),
        }

        if attempts >= config.reconnect {
            anyhow::bail!("pool {} unreachable", config.pool);
        }
        attempts += 1;
        info!("retries in {}s...({attempts}/{})", RECONNECT_DELAY.as_secs(), config.reconnect);

        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}
