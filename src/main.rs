use std::{net::SocketAddr, process, sync::Arc};

use newsletter::{
    application::app::{Application, ApplicationConfig, Repositories},
    cache::MemoryCacheStore,
    config,
    infra::{
        error::InfraError, http, identity::OidcRedirectProvider, memory::MemoryRepositories,
        telemetry,
    },
};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_startup_error(&error);
        process::exit(1);
    }
}

fn report_startup_error(error: &(dyn std::error::Error + 'static)) {
    if dispatcher::has_been_set() {
        error!(error = %error, "newsletter exited with an error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "newsletter exited with an error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let app_config = ApplicationConfig::from(&settings);
    let store = Arc::new(MemoryCacheStore::new(&app_config.cache));
    let memory = Arc::new(MemoryRepositories::seeded());
    let repos = Repositories {
        articles: memory.clone(),
        subscribers: memory.clone(),
        users: memory,
    };
    let identity = Arc::new(OidcRedirectProvider::new(&settings.identity));
    if settings.identity.authority.is_none() {
        warn!("identity.authority is not set; login and sign-out will fail");
    }

    let app = Application::new(app_config, store, repos, identity);
    let dispatcher = app
        .dispatcher()
        .ok_or_else(|| InfraError::dispatcher("receiver already taken"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    let served = serve_http(&settings, app.clone()).await;

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(settings.server.graceful_shutdown, dispatcher_handle).await {
        Ok(Ok(())) => info!("event dispatcher stopped"),
        Ok(Err(err)) => error!(error = %err, "event dispatcher task failed"),
        Err(_) => warn!(
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "event dispatcher did not stop before the graceful shutdown timeout"
        ),
    }
    app.bus().close();

    served
}

async fn serve_http(settings: &config::Settings, app: Application) -> Result<(), InfraError> {
    let router = http::build_router(app, http::ClientAddressPolicy::from(&settings.server));
    let listener = TcpListener::bind(settings.server.addr).await?;
    info!(addr = %settings.server.addr, "newsletter listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
