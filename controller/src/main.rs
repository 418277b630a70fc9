mod device;
mod net;
mod signal;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use irrigator_common::DeviceConfig;

use crate::device::{spawn_irrigation_supervisor, spawn_sensor_feed, Board};
use crate::net::client::CloudClient;

async fn load_config() -> DeviceConfig {
    let path =
        std::env::var("IRRIGATOR_CONFIG").unwrap_or_else(|_| "irrigator-config.json".to_string());
    let mut config = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => match serde_json::from_str::<DeviceConfig>(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!("failed to parse config at {path}: {err}, using defaults");
                DeviceConfig::default()
            }
        },
        Err(err) => {
            warn!("failed to read config at {path}: {err}, using defaults");
            DeviceConfig::default()
        }
    };
    config.sanitize();
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(load_config().await);

    let (board, commands) = Board::new();
    // Running on a host there is no radio to bring up; both links are live.
    board.set_connectivity(true, true);

    spawn_irrigation_supervisor(board.clone(), commands);
    spawn_sensor_feed(board.clone());
    tokio::spawn(CloudClient::new(board.clone(), config.clone()).run());
    tokio::spawn(net::ntp::run(board.clone(), config.clone()));

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.http_port);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind local api server at {addr}"))?;
    if let Ok(local) = listener.local_addr() {
        board.set_ip_address(local.ip().to_string());
    }

    info!("local api listening on http://{addr}");
    net::server::serve(board, listener).await
}
