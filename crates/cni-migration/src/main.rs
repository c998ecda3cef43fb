//! cni-migration
//!
//! CLI for migrating a cluster from AWS VPC CNI to Cilium.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cni_migration::{log_filter, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match log_filter(&cli.log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping at the next wait");
                cancel.cancel();
            }
        }
    });

    match cli.run(cancel).await {
        Ok(_) => info!("steps successful"),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
