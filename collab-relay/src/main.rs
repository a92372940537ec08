use clap::Parser;
use log::{error, info};

use collab_relay::{Cli, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    info!(
        "Starting collab-relay on {} (allowed origin: {:?})",
        config.bind_addr, config.allowed_origin
    );

    let server = match SyncServer::open(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
