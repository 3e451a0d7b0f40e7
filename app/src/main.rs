//! Process entry point: load configuration, wire collaborators, start
//! the scheduler's worker pool, and serve the HTTP surface until the
//! process receives a shutdown signal.

use std::path::PathBuf;

use leadline_app::wiring;
use leadline_otel::LogFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let format = match std::env::var("LEADLINE_LOG_FORMAT").ok().as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    leadline_otel::init(format).ok();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = leadline_config::load(config_path.as_deref())?;
    let bind_addr = config.bind_addr.0;

    let wiring::Runtime { state, scheduler, .. } = wiring::build_for_process(config);
    scheduler.start();

    let router = leadline_webhook_server::router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "leadline listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
