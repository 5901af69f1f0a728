//! scrawl-server: room synchronization server for the shared canvas.
//!
//! Configuration comes from the environment, see [`ServerConfig::from_env`].
//! Log verbosity follows `RUST_LOG`.

use log::{error, info};
use scrawl_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting scrawl-server (default room {:?}, queue capacity {})",
        config.default_room, config.broadcast_capacity
    );

    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
