use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use stream_mixer::{
    create_router, shutdown_signal, AppState, Config, FfmpegTranscoder, MemoryCatalog, NewStream,
    SessionConfig, SessionManager, StreamCatalog,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mux looping video with live radio into on-demand HLS
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/stream-mixer")]
    config: String,

    /// Override the HTTP port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(MemoryCatalog::new());
    for seed in &cfg.streams {
        let stream = catalog
            .create_stream(NewStream {
                name: seed.name.clone(),
                video_url: seed.video_url.clone(),
                radio_url: seed.radio_url.clone(),
                slug: seed.slug.clone(),
            })
            .await
            .with_context(|| format!("Invalid seed stream {}", seed.name))?;
        info!(
            "Stream {} available at /stream/{}/{}",
            stream.name, stream.slug, cfg.hls.manifest_name
        );
    }

    let transcoder = Arc::new(FfmpegTranscoder::new(&cfg.transcoder, &cfg.hls));
    let sessions =
        SessionManager::start(catalog.clone(), transcoder, SessionConfig::from_config(&cfg))
            .await?;

    let app = create_router(AppState::new(catalog, sessions.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sessions.shutdown().await;
    Ok(())
}
