use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parlay::registry::RegisterRequest;
use parlay::venue::AgentCredentials;
use parlay::{AppConfig, Strategy, TradingEngine, Venue};

#[derive(Parser)]
#[command(name = "parlay", about = "Risk-gated multi-venue execution engine")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", env = "PARLAY_CONFIG_DIR")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until interrupted
    Run {
        /// Register and activate a credential-less demo agent
        #[arg(long)]
        demo: bool,
    },
    /// Print platform stats from the persisted snapshot
    Status,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,parlay={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(config_dir: &str) -> AppConfig {
    match AppConfig::load_from(config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config load failed ({e}), using defaults");
            AppConfig::default()
        }
    }
}

async fn run(config: AppConfig, demo: bool) -> anyhow::Result<()> {
    let engine = Arc::new(TradingEngine::new(config)?);

    if demo {
        let platforms: BTreeMap<Venue, bool> = [
            (Venue::Polymarket, true),
            (Venue::Kalshi, true),
            (Venue::Limitless, false),
        ]
        .into_iter()
        .collect();

        let agent_id = engine
            .register_agent(RegisterRequest {
                wallet_address: "0x7F5EB5bB5cF88cfcEe9613368636f458800e62CB".to_string(),
                platforms,
                strategy: Strategy::Arbitrage,
                max_position: dec!(100),
                min_profit: dec!(2.0),
                max_trades: 20,
                stop_loss: dec!(0.2),
                credentials: AgentCredentials::none(),
            })
            .await?;
        engine.activate_agent(&agent_id).await?;
        info!(%agent_id, "demo agent running in simulated mode");
    }

    // Periodic checkpoints so loop-recorded trades survive a crash
    let checkpointer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.checkpoint_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.persist().await {
                    warn!(error = %e, "checkpoint failed");
                }
            }
        })
    };

    info!("engine running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    checkpointer.abort();
    engine.shutdown().await?;
    Ok(())
}

async fn status(config: AppConfig) -> anyhow::Result<()> {
    let engine = TradingEngine::new(config)?;
    let stats = engine.platform_stats().await;

    println!("agents:          {}", stats.total_agents);
    println!("active agents:   {}", stats.active_agents);
    println!("total trades:    {}", stats.total_trades);
    println!("total volume:    ${}", stats.total_volume);
    println!("fees collected:  ${}", stats.total_fees_collected);
    println!("fee rate:        {}", stats.fee_rate);

    for view in engine.list_agents().await {
        println!(
            "  {} [{}] venues={:?} active={}",
            view.agent_id,
            view.strategy,
            view.platforms
                .iter()
                .filter(|(_, on)| **on)
                .map(|(v, _)| v.to_string())
                .collect::<Vec<_>>(),
            view.active
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli.config_dir);
    init_logging(&config.logging.level);

    let result = match cli.command {
        Command::Run { demo } => run(config, demo).await,
        Command::Status => status(config).await,
    };

    if let Err(e) = result {
        error!(error = %e, "engine exited with error");
        std::process::exit(1);
    }
}
