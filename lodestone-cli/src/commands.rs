//! Resolution command: configuration assembly and the session opener

use std::time::Duration;

use lodestone_core::config::LodestoneConfig;
use lodestone_core::{ResolveReport, Resolver, SessionConfig, SwarmSession};

use crate::Cli;

/// Runs one resolution for the parsed command line.
///
/// Ctrl-C interrupts the attempt; the session is released before this
/// returns either way.
///
/// # Errors
///
/// Returns the terminal `ResolveError` of the attempt.
pub async fn resolve_magnet(cli: &Cli) -> lodestone_core::Result<ResolveReport> {
    let config = build_config(cli);
    let network = config.network.clone();
    let session_config = build_session_config(cli);
    tracing::debug!("Session configuration: {:?}", session_config);

    Resolver::new(config)
        .resolve_until(
            &cli.magnet_uri,
            &cli.output,
            session_config,
            move |session_config| SwarmSession::with_network(session_config, network),
            interrupted(),
        )
        .await
}

/// Environment overrides first, then command-line flags.
pub fn build_config(cli: &Cli) -> LodestoneConfig {
    let mut config = LodestoneConfig::from_env();

    if let Some(seconds) = cli.timeout {
        config.resolver.timeout = Duration::from_secs(seconds);
    }
    if let Some(millis) = cli.poll_interval {
        config.resolver.poll_interval = Duration::from_millis(millis.max(1));
    }
    if let Some(max_peers) = cli.max_peers {
        config.network.max_peer_connections = max_peers.max(1);
    }
    config.resolver.include_creation_date = cli.creation_date;

    config
}

pub fn build_session_config(cli: &Cli) -> SessionConfig {
    let mut session_config = SessionConfig::from_flags(cli.tcp, cli.udp, cli.anonymous);
    if cli.anonymous
        && let Some(proxy) = &cli.proxy
    {
        session_config.proxy_endpoint = Some(proxy.clone());
    }
    session_config
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Interrupted");
}
