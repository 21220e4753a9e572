//! HLS transcoding worker binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_firestore::{FirestoreClient, FirestoreStatusRecorder};
use vproc_media::{check_ffmpeg, FfmpegTranscoder};
use vproc_queue::PubSubClient;
use vproc_storage::R2Client;
use vproc_worker::metrics::init_metrics;
use vproc_worker::{health, QueueListener, VideoPipeline, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vproc-worker");

    if let Err(e) = run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vproc=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    tokio::fs::create_dir_all(&config.work_dir).await?;

    if let Err(e) = check_ffmpeg() {
        warn!("{}; every job will fail at the transcode step", e);
    }

    let metrics_handle = init_metrics()?;

    let store = Arc::new(R2Client::from_env()?);
    let firestore = FirestoreClient::from_env().await?;
    let recorder = Arc::new(FirestoreStatusRecorder::new(firestore));
    let subscription = Arc::new(PubSubClient::from_env().await?);

    let pipeline = Arc::new(VideoPipeline::new(
        store,
        Arc::new(FfmpegTranscoder::default()),
        recorder,
        config.work_dir.clone(),
    ));
    let listener = QueueListener::new(subscription, pipeline, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let http = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let server = tokio::spawn(health::serve(
        http,
        health::create_router(Some(metrics_handle)),
        shutdown_rx.clone(),
    ));

    let result = listener.run(shutdown_rx).await;

    // The server only stops on the signal; don't hold the exit on it after a listener error.
    if result.is_err() {
        server.abort();
    } else if let Ok(Err(e)) = server.await {
        warn!("Health server error: {}", e);
    }

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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

    info!("Received shutdown signal");
}
