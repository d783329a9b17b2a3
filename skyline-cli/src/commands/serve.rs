//! Serve command for running the skyline server
//!
//! The server provides:
//! - HTTP API for raising and acknowledging alarms and ingesting cluster events
//! - WebSocket streams of the alarm log and of each cluster log

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use skyline_events::StorageBackend;
use skyline_server::SkylineServer;
use tracing::{info, warn};

use crate::config::{ConfigLoader, SkylineConfig};

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Directory for the event log files (overrides config)
    #[arg(long, conflicts_with = "memory")]
    pub data_dir: Option<PathBuf>,

    /// Keep every log in memory only
    #[arg(long)]
    pub memory: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = apply_overrides(ConfigLoader::load()?, &args);

    info!(
        "Starting skyline server on {}:{}",
        config.server.host, config.server.port
    );

    let server = SkylineServer::new(config.to_server_config()).await?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    server.run().await?;
    info!("skyline server stopped");
    Ok(())
}

/// Apply command-line flags on top of the loaded configuration
fn apply_overrides(mut config: SkylineConfig, args: &ServeArgs) -> SkylineConfig {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.storage.backend = StorageBackend::File;
        config.storage.data_dir = dir.clone();
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            port: None,
            host: None,
            data_dir: None,
            memory: false,
        }
    }

    #[test]
    fn test_no_flags_keep_config() {
        let config = apply_overrides(SkylineConfig::default(), &args());
        assert_eq!(config.server.port, 7480);
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_flags_override_config() {
        let config = apply_overrides(
            SkylineConfig::default(),
            &ServeArgs {
                port: Some(9100),
                host: Some("127.0.0.1".to_string()),
                ..args()
            },
        );
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_storage_flags() {
        let config = apply_overrides(
            SkylineConfig::default(),
            &ServeArgs {
                memory: true,
                ..args()
            },
        );
        assert_eq!(config.storage.backend, StorageBackend::Memory);

        let mut base = SkylineConfig::default();
        base.storage.backend = StorageBackend::Memory;
        let config = apply_overrides(
            base,
            &ServeArgs {
                data_dir: Some(PathBuf::from("/var/lib/skyline")),
                ..args()
            },
        );
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/skyline"));
    }
}
