use std::{process, sync::Arc};

use pagelens::{
    application::{
        dispatcher::JobDispatcher, error::AppError, pool::RenderPool, store::MemoryJobStore,
    },
    config,
    infra::{
        artifacts::ArtifactStorage,
        browser::ChromiumBackend,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let backend = Arc::new(ChromiumBackend::new(settings.browser.clone()));
    let pool = Arc::new(RenderPool::new(
        backend,
        settings.browser.pool_size,
        settings.browser.acquire_timeout,
    ));
    let store = Arc::new(MemoryJobStore::new());
    let artifacts = Arc::new(
        ArtifactStorage::new(settings.artifacts.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let dispatcher = JobDispatcher::new(
        pool,
        store,
        artifacts,
        settings.jobs.ttl,
        settings.browser.render_timeout,
    );

    let sweeper_handle = spawn_job_sweeper(dispatcher.clone(), settings.jobs.sweep_interval);

    let state = HttpState {
        dispatcher,
        expose_internal_errors: settings.http.expose_internal_errors,
        max_body_bytes: settings.http.max_body_bytes.get() as usize,
    };

    let result = serve_http(&settings, state).await;

    sweeper_handle.abort();
    let _ = sweeper_handle.await;

    result
}

/// Periodically reclaims expired job records and their stored artifacts.
fn spawn_job_sweeper(
    dispatcher: JobDispatcher,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            dispatcher.reclaim_expired().await;
        }
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.bind_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "pagelens::server",
        addr = %settings.server.bind_addr,
        "listening"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    // Bound the drain: once a shutdown signal lands, in-flight requests get
    // the configured grace period before the server is dropped outright.
    // Both branches listen for the same signals independently.
    let drain_deadline = async {
        signal_received().await;
        tokio::time::sleep(settings.server.graceful_shutdown).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline => {
            error!(
                target = "pagelens::server",
                timeout = ?settings.server.graceful_shutdown,
                "graceful shutdown deadline exceeded; aborting open connections"
            );
        }
    }

    info!(target = "pagelens::server", "shut down");
    Ok(())
}

async fn shutdown_signal() {
    signal_received().await;
    info!(target = "pagelens::server", "shutdown signal received");
}

async fn signal_received() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
