use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use serde::Serialize;
use storefront_cache::{
    application::{error::AppError, warmup::WarmupService},
    cache::{AdminGuard, CacheConfig, CacheManager, InvalidationRequest, Invalidator, Warmer},
    config::{self, Command, InvalidateArgs, Settings},
    infra::{error::InfraError, http, origin::OriginClient, store, telemetry},
};
use tokio::{signal, sync::oneshot};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Stats(_) => run_stats(settings).await,
        Command::Invalidate(args) => run_invalidate(settings, args).await,
        Command::Flush(_) => run_flush(settings).await,
    }
}

async fn build_manager(settings: &Settings) -> Result<Arc<CacheManager>, AppError> {
    let store = store::connect(&settings.store).await?;
    Ok(Arc::new(CacheManager::new(
        store,
        CacheConfig::from(&settings.cache),
    )))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let manager = build_manager(&settings).await?;

    let guard = AdminGuard::new(settings.admin.token.as_deref());
    if !guard.is_configured() {
        warn!("admin.token is not set; invalidation and warmup endpoints will refuse every request");
    }

    let origin = OriginClient::new(&settings.origin)?;
    if !origin.is_configured() {
        warn!("origin.base_url is not set; warmup items will fail to load");
    }

    let warmup = WarmupService::new(Warmer::new(manager.clone()), guard.clone(), Arc::new(origin));
    let router = http::build_router(http::AdminState::new(manager, guard, warmup));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        store = settings.store.backend.as_str(),
        "storefront cache listening"
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.map_err(|err| AppError::from(InfraError::from(err)))?,
        Ok(()) = signalled_rx => {
            drain(&mut server, settings.server.graceful_shutdown).await?;
        }
    }

    info!("storefront cache stopped");
    Ok(())
}

async fn drain<F>(server: &mut std::pin::Pin<&mut F>, grace: Duration) -> Result<(), AppError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    info!(grace_seconds = grace.as_secs(), "draining in-flight requests");
    match tokio::time::timeout(grace, server.as_mut()).await {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::from(err))),
        Err(_) => {
            warn!("graceful shutdown timed out; dropping remaining connections");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
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
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

async fn run_stats(settings: Settings) -> Result<(), AppError> {
    let manager = build_manager(&settings).await?;
    print_json(&manager.stats().await)
}

async fn run_invalidate(settings: Settings, args: InvalidateArgs) -> Result<(), AppError> {
    let manager = build_manager(&settings).await?;
    let invalidator = Invalidator::new(manager, AdminGuard::new(None));

    let mut request = InvalidationRequest::new(args.kind.into(), args.target.as_deref());
    request.tags = args.tags;
    request.keys = args.keys;

    let outcome = invalidator
        .run(&request)
        .await
        .map_err(|err| AppError::validation(err.to_string()))?;
    print_json(&outcome)
}

async fn run_flush(settings: Settings) -> Result<(), AppError> {
    let manager = build_manager(&settings).await?;
    if !manager.flush().await {
        return Err(AppError::from(InfraError::store("flush failed")));
    }
    info!(store = settings.store.backend.as_str(), "cache flushed");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
