use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use remus_server::authority::AuthorityClient;
use remus_server::config::ServerConfig;
use remus_server::rate_limit::RateBuckets;
use remus_server::router::build_router;
use remus_server::shutdown::shutdown_signal;
use remus_server::state::AppState;
use remus_server::store::Store;
use remus_server::voice::media::{default_media_codecs, MediaWorker, SignalingWorker};
use remus_server::voice::VoiceCoordinator;
use remus_server::ws::WsState;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("configuration error: {error}");
        }
        return ExitCode::from(1);
    }

    let default_level = if config.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    for dir in [config.data_dir(), config.uploads_path(), config.role_icons_path()] {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::error!(dir = %dir.display(), error = %e, "cannot create runtime directory");
            return ExitCode::from(1);
        }
    }

    let store = match Store::open(&config.db_file(), &config.server_name).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "store bring-up failed");
            return ExitCode::from(1);
        }
    };
    let guild_id = match store.node_guild_id().await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "node guild missing after bring-up");
            return ExitCode::from(1);
        }
    };
    tracing::info!(guild_id = %guild_id, "store ready");

    // Exactly one worker and one router; a dead worker is fatal.
    let worker = SignalingWorker::spawn();
    let router = match worker.create_router(default_media_codecs()).await {
        Ok(router) => router,
        Err(e) => {
            tracing::error!(error = %e, "media router creation failed");
            return ExitCode::from(1);
        }
    };
    let mut died = worker.died();
    tokio::spawn(async move {
        while died.changed().await.is_ok() {
            if *died.borrow() {
                tracing::error!("media worker died, exiting");
                std::process::exit(1);
            }
        }
    });

    let config = Arc::new(config);
    let authority = match AuthorityClient::new(&config) {
        Ok(authority) => authority,
        Err(e) => {
            tracing::error!(error = %e, "authority client init failed");
            return ExitCode::from(1);
        }
    };
    let ws = Arc::new(WsState::new());
    let rate = Arc::new(RateBuckets::new());
    let voice = VoiceCoordinator::new(router, ws.clone(), store.clone(), rate.clone(), &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    authority.spawn_sweeper(shutdown_rx.clone());
    remus_server::tasks::heartbeat::spawn(
        authority.clone(),
        config.clone(),
        guild_id.as_str().to_string(),
        shutdown_rx,
    );

    let state = AppState {
        store,
        config: config.clone(),
        authority,
        ws,
        voice,
        rate,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port()));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "cannot bind listen port");
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %addr, "community node listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let result = serve.await;
    let _ = shutdown_tx.send(true);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::from(1)
        }
    }
}
