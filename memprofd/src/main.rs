use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use memprofd::{Broker, Config, Metrics};

#[derive(Parser)]
#[command(name = "memprofd", about = "Broker and viewer daemon for the memory profiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pub/sub broker (spec §4.G).
    Broker {
        #[arg(long)]
        bind_addr: Option<String>,
    },
    /// Run a viewer that listens for a direct runtime snapshot stream
    /// (no broker in between).
    Viewer {
        #[arg(long)]
        bind_addr: Option<String>,
    },
    /// Run a viewer that polls the broker for raw ALLOC/FREE events on
    /// one topic and mirrors them into a Consumer Aggregator.
    ViewerBroker {
        #[arg(long)]
        broker_addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "viewer")]
        app_id: String,
    },
}

/// Initialize both logging facades from `config.logging.level`, honoring
/// `RUST_LOG` as an override when set (matching `env_logger`'s own
/// convention) rather than always deferring to the config file.
fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(filter) => builder.parse_filters(&filter),
        Err(_) => builder.parse_filters(level),
    };
    builder.init();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(env_filter).try_init().ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    init_logging(&config.logging.level);

    let cli = Cli::parse();

    match cli.command {
        Command::Broker { bind_addr } => {
            let bind_addr = bind_addr.unwrap_or(config.broker.bind_addr);
            let metrics = Arc::new(Metrics::new());
            let broker = Arc::new(Broker::new(metrics));
            broker.run(&bind_addr).await.context("broker accept loop failed")
        }
        Command::Viewer { bind_addr } => {
            let bind_addr = bind_addr.unwrap_or(config.viewer.bind_addr);
            memprofd::viewer::run_direct(&bind_addr).await.context("direct viewer stream failed")
        }
        Command::ViewerBroker { broker_addr, topic, app_id } => {
            memprofd::viewer::run_broker_poll(&broker_addr, &topic, &app_id, &config.registry)
                .await
                .context("broker-polling viewer failed")
        }
    }
}
