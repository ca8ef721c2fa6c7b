use anyhow::Context;
use clap::Parser;
use rendezvous::config::Config;
use rendezvous::domain::session::SessionState;
use rendezvous::infrastructure::metrics::init_metrics;
use rendezvous::infrastructure::protocols::relay::WebSocketConnector;
use rendezvous::infrastructure::protocols::room::HttpRoomRegistrar;
use rendezvous::infrastructure::protocols::webrtc::WebRtcMediaEngine;
use rendezvous::interface::{console, start_call};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Join a two-party call room
#[derive(Parser, Debug)]
#[command(name = "rendezvous", version, about)]
struct Args {
    /// Room to join
    room_id: String,

    /// TOML configuration file, overridden by RENDEZVOUS__* environment variables
    #[arg(short, long, env = "RENDEZVOUS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let room = args.room_id;

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let metrics = init_metrics()?;
    info!("Starting rendezvous client for room {}", room);
    debug!("Configuration loaded: {:?}", config);

    let registrar = Arc::new(HttpRoomRegistrar::new(
        config.registrar.base_url.clone(),
        config.request_timeout(),
    )?);
    let connector = Arc::new(WebSocketConnector::new(config.signaling.relay_url.clone()));
    let media = Arc::new(WebRtcMediaEngine::new());

    let (call, changes) = start_call(config.session_config(), registrar, connector, media);
    call.join(&room)?;

    let hangup = call.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, hanging up");
            let _ = hangup.hangup();
        }
    });

    let outcome = console::present(changes).await;
    debug!("Metrics at exit:\n{}", metrics.render());

    match outcome {
        Some(SessionState::Failed(reason)) => anyhow::bail!("call failed: {}", reason),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["rendezvous", "r1", "--config", "call.toml"]).unwrap();
        assert_eq!(args.room_id, "r1");
        assert_eq!(args.config, Some(PathBuf::from("call.toml")));

        assert!(Args::try_parse_from(["rendezvous"]).is_err());
    }
}
