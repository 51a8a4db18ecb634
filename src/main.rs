use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use veil_server::ServerConfig;
use veil_store::Database;
use veil_telemetry::{init_telemetry, veil_dir, TelemetryConfig};

#[tokio::main]
async fn main() {
    let _telemetry = init_telemetry(TelemetryConfig::default());

    tracing::info!("Starting veil server");

    // Database path: VEIL_DB overrides the default under ~/.veil
    let db_path = std::env::var("VEIL_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let dir = veil_dir().join("database");
            std::fs::create_dir_all(&dir).expect("Failed to create database directory");
            dir.join("veil.db")
        });

    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let config = ServerConfig {
        port: env_port(),
        token_secret: env_secret(),
        digest_interval: env_digest_interval(),
        push_endpoint: std::env::var("VEIL_PUSH_URL").ok(),
        push_api_key: std::env::var("VEIL_PUSH_KEY").ok().map(SecretString::from),
        ..Default::default()
    };
    let port = config.port;

    let _handle = veil_server::start(config, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "veil server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn env_port() -> u16 {
    std::env::var("VEIL_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090)
}

fn env_secret() -> SecretString {
    match std::env::var("VEIL_TOKEN_SECRET") {
        Ok(secret) if !secret.is_empty() => SecretString::from(secret),
        _ => {
            tracing::warn!("VEIL_TOKEN_SECRET not set, using development secret");
            SecretString::from("dev-secret")
        }
    }
}

fn env_digest_interval() -> Duration {
    std::env::var("VEIL_DIGEST_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(veil_engine::DIGEST_INTERVAL)
}
