//! VolunteerX query gateway
//!
//! Authenticates API requests: validates the bearer token against the identity
//! provider's key set, resolves the caller through the user directory, and
//! attaches the identity for downstream handlers.

use gateway::auth::{HttpKeySetSource, KeySetCache, TokenValidator, ValidatorSettings};
use gateway::config::Config;
use gateway::middleware::RequestGuard;
use gateway::observability::metrics::init_metrics_recorder;
use gateway::routes::{self, AppState};
use gateway::services::{DirectoryClient, RedisRequestReply};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,gw=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting query gateway");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        gateway_id = %config.gateway_id,
        bind_address = %config.bind_address,
        issuer = %config.issuer,
        jwks_url = %config.jwks_url,
        jwks_requests_per_minute = config.jwks_requests_per_minute,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        directory_channel = %config.directory_channel,
        "Configuration loaded successfully"
    );

    // Must be installed before anything records a metric
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // One key cache per issuer, shared by the validator and readiness check
    let key_source = Arc::new(HttpKeySetSource::new(config.jwks_url.clone()));
    let key_cache = KeySetCache::new(key_source, config.jwks_requests_per_minute);
    let validator = Arc::new(TokenValidator::new(
        key_cache.clone(),
        ValidatorSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let reply_channel = format!("gateway.replies.{}", config.gateway_id);
    let (transport, listener_handle) =
        RedisRequestReply::connect(&config.redis_url, reply_channel, shutdown.child_token())
            .await
            .map_err(|e| {
                error!("Failed to connect to message transport: {}", e);
                e
            })?;

    let transport = Arc::new(transport);
    let resolver = Arc::new(DirectoryClient::new(
        transport.clone(),
        config.directory_channel.clone(),
        config.directory_rpc_timeout,
    ));
    let guard = Arc::new(RequestGuard::new(validator, resolver));

    // Warm the cache; readiness stays 503 until this (or a later lookup) succeeds
    match key_cache.refresh().await {
        Ok(()) => info!(keys = key_cache.key_count().await, "Signing key set loaded"),
        Err(e) => warn!(error = %e, "Initial signing key fetch failed, will retry on demand"),
    }

    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        config,
        key_cache,
        guard,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Query gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(
        in_flight = transport.in_flight(),
        "Stopping reply listener"
    );
    shutdown.cancel();
    if let Err(e) = listener_handle.await {
        warn!("Reply listener task ended abnormally: {}", e);
    }

    info!("Query gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
