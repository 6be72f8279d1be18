use anyhow::{Context, Result};
use clap::Parser;
use pothole_web::config::Args;
use pothole_web::detection;
use pothole_web::pipeline::Pipeline;
use pothole_web::render::Annotator;
use pothole_web::server::{self, AppState, ArtifactStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!("pothole-web starting");

    let tracker = args.tracker()?;
    tracing::info!(
        "Tracker: high={} low={} new={} buffer={} match={}",
        tracker.track_high_thresh,
        tracker.track_low_thresh,
        tracker.new_track_thresh,
        tracker.track_buffer,
        tracker.match_thresh
    );

    tracing::info!("Loading segmentation model from {}", args.model.display());
    let model = detection::create_default_model(&args.model, args.input_size)
        .context("Failed to load segmentation model")?;
    tracing::info!("Model classes: {:?}", model.class_names());

    let mut annotator = Annotator::new(model.class_names().to_vec());
    match &args.font {
        Some(path) => {
            let font = Annotator::load_font(path).context("Failed to load label font")?;
            annotator = annotator.with_font(font);
        }
        None => tracing::info!("No --font given, drawing boxes without labels"),
    }

    let pipeline = Pipeline::new(model, annotator, args.ffmpeg_tools(), tracker);
    let state = AppState::new(
        pipeline,
        ArtifactStore::new(args.keep_artifacts),
        args.server_settings(),
    );
    let app = server::build_router(state);

    let addr = args.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl+C received, stopping");
}
