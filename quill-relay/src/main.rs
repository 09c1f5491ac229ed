//! Quill relay: standalone WebSocket fan-out for collaborative documents.
//!
//! Listens on `QUILL_RELAY_ADDR` (default `127.0.0.1:9090`) and, when
//! `QUILL_RELAY_TOKEN` is set, only admits clients presenting that token.
//! Log verbosity follows `RUST_LOG`.

use log::{error, info};
use quill_collab::server::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from_env();
    info!(
        "Starting Quill relay on {} ({})",
        config.bind_addr,
        if config.access_token.is_some() {
            "token required"
        } else {
            "open access"
        }
    );

    let relay = RelayServer::new(config);
    if let Err(e) = relay.run().await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
