//! driftmq broker binary.

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use driftmq_server::{BrokerServer, ServerConfig, ServerError};
use driftmq_store::{MessageStore, StoreConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "driftmq-server")]
#[command(about = "Durable message-queue broker")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7600")]
    bind: String,

    /// Store directory, one subdirectory per queue
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Identifier returned to connecting clients
    #[arg(long, default_value = "driftmq")]
    server_id: String,

    /// Largest accepted frame body in bytes
    #[arg(long, default_value_t = driftmq_proto::DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_length: u32,

    /// Close connections silent for this many seconds
    #[arg(long, default_value_t = 90)]
    idle_timeout_secs: u64,

    /// Background flush period in milliseconds
    #[arg(long, default_value_t = 200)]
    flush_interval_ms: u64,

    /// Days to keep consumed segments
    #[arg(long, default_value_t = 7)]
    retention_days: u64,

    /// Local hour (0-23) of the daily retention sweep
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..24))]
    cleanup_hour: u32,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            retention: Duration::from_secs(self.retention_days * 24 * 60 * 60),
            cleanup_hour: self.cleanup_hour,
            ..StoreConfig::new(&self.data_dir)
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind.clone(),
            max_frame_length: self.max_frame_length,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            server_id: self.server_id.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(MessageStore::open(args.store_config())?);
    let server = Arc::new(BrokerServer::new(args.server_config(), Arc::clone(&store)));
    let listener = server.bind().await?;

    info!(
        bind = %args.bind,
        data_dir = %args.data_dir.display(),
        server_id = %args.server_id,
        "driftmq starting"
    );

    tokio::select! {
        result = Arc::clone(&server).serve(listener, None) => {
            if let Err(e) = &result {
                error!(error = %e, "server stopped");
            }
            result?;
        },
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        },
    }

    store.close()?;
    info!("driftmq stopped");
    Ok(())
}
