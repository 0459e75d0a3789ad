//! Headless gridwalk sync runner: joins a room with logging collaborators and keeps the match
//! session alive until Ctrl+C or SIGTERM.

use std::{env, sync::Arc};

use anyhow::Context;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "couch-store")]
use gridwalk_sync::{
    dao::couchdb::{CouchClient, CouchConfig},
    services::supervisor,
};
use gridwalk_sync::{
    clock::now_ms,
    config::{StoreBackend, SyncConfig},
    dao::room_store::RoomStore,
    dto::room::{RoomPlayer, RoomRecord},
    services::{
        collaborators::Collaborators,
        headless::{LoggingModals, LoggingNavigator, LoggingSpeech, LoggingTimer, PlainGridBoard},
        session::{Backends, LocalBackends, MatchSession, SessionIdentity},
    },
    state::settings::Settings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::load();
    let identity = identity_from_env()?;
    let backends = build_backends(&config, &identity).await?;

    let session = MatchSession::start(
        identity,
        &config,
        backends,
        headless_collaborators(),
        Settings::default(),
    )
    .await
    .context("starting match session")?;

    let mut events = session.events().stream();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(?event, "sync event"),
                Err(err) => warn!(error = %err, "event stream lagged"),
            }
        }
    });

    shutdown_signal().await;
    info!("shutdown requested");
    session.leave().await;
    logger.abort();
    Ok(())
}

/// Read who this runner is from `ROOM_ID`, `PLAYER_ID`, `PLAYER_NAME` and `IS_HOST`.
fn identity_from_env() -> anyhow::Result<SessionIdentity> {
    let room_id = env::var("ROOM_ID").context("ROOM_ID must be set")?;
    let player_id = env::var("PLAYER_ID").context("PLAYER_ID must be set")?;
    let player_name = env::var("PLAYER_NAME").unwrap_or_else(|_| player_id.clone());
    let is_host = env::var("IS_HOST")
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    Ok(SessionIdentity {
        room_id,
        player_id,
        player_name,
        is_host,
    })
}

async fn build_backends(
    config: &SyncConfig,
    identity: &SessionIdentity,
) -> anyhow::Result<Backends> {
    match config.backend {
        StoreBackend::Local => {
            anyhow::ensure!(
                identity.is_host,
                "the local backend lives in this process only; run as host (IS_HOST=1)"
            );
            let local = LocalBackends::new();
            let now = now_ms();
            local
                .rooms
                .create_room(RoomRecord {
                    room_id: identity.room_id.clone(),
                    host_id: identity.player_id.clone(),
                    players: vec![RoomPlayer::new(
                        identity.player_id.clone(),
                        identity.player_name.clone(),
                        now,
                    )],
                    session_id: None,
                    started_at: Some(now),
                    created_at: now,
                })
                .await
                .context("creating local room")?;
            Ok(local.client())
        }
        StoreBackend::Couch => couch_backends(config).await,
    }
}

#[cfg(feature = "couch-store")]
async fn couch_backends(config: &SyncConfig) -> anyhow::Result<Backends> {
    let couch = CouchConfig::from_env().context("reading CouchDB configuration")?;
    let client = supervisor::connect_with_backoff("couchdb", || CouchClient::connect(couch.clone()))
        .await;

    let health = client.clone();
    tokio::spawn(async move {
        supervisor::monitor_health("couchdb", || {
            let health = health.clone();
            async move { health.health_check().await }
        })
        .await;
    });

    Ok(Backends::couch(client, config))
}

#[cfg(not(feature = "couch-store"))]
async fn couch_backends(_config: &SyncConfig) -> anyhow::Result<Backends> {
    anyhow::bail!("built without the `couch-store` feature")
}

fn headless_collaborators() -> Collaborators {
    Collaborators {
        board: Arc::new(PlainGridBoard::new()),
        modals: Arc::new(LoggingModals),
        speech: Arc::new(LoggingSpeech),
        navigator: Arc::new(LoggingNavigator),
        timer: Arc::new(LoggingTimer),
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
