//! Live fMP4 segmenter
//!
//! Pulls a live source through the FFmpeg engine and stores every fragment as
//! a self-contained segment in a directory, until Ctrl-C or end of stream.

use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_fmp4_lib::{
    ConfigFile, DirectoryWriter, FfmpegEngine, LogFormat, Result, Segmenter, SegmenterError,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "live-fmp4";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the level can come from the file
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let (config, load_error) = if std::path::Path::new(&config_path).exists() {
        match ConfigFile::from_file(&config_path) {
            Ok(cf) => (cf, None),
            Err(e) => (ConfigFile::default_config(), Some(e)),
        }
    } else {
        (ConfigFile::default_config(), None)
    };

    init_logging(config.log_level(), config.log_format());

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }

    live_fmp4_lib::init()?;
    live_fmp4_lib::install_log_filter();
    tracing::info!("FFmpeg version: {}", live_fmp4_lib::ffmpeg_version_info());

    let source = config.source_config()?;
    let segmenter_config = config.segmenter_config()?;
    let output_dir = config
        .output_directory()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("segments"));

    let mut writer = DirectoryWriter::create(&output_dir)?;
    let mut segmenter = Segmenter::<FfmpegEngine>::new(FfmpegEngine::new(), source, segmenter_config)?;
    tracing::info!(
        "Source: {} (transport: {:?})",
        segmenter.source().url,
        segmenter.source().transport
    );
    segmenter.start().await?;

    let outcome = tokio::select! {
        r = store_segments(&segmenter, &mut writer) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
            Ok(())
        }
    };

    // Also reaps a run that already ended on its own
    match segmenter.stop().await {
        Ok(()) | Err(SegmenterError::InvalidState(_)) => {}
        Err(e) => tracing::warn!("Stop failed: {}", e),
    }

    let dropped = segmenter.dropped_segments();
    if dropped > 0 {
        tracing::warn!("{} segments were dropped because storage fell behind", dropped);
    }

    outcome
}

/// Store segments until the run ends.
async fn store_segments(segmenter: &Segmenter<FfmpegEngine>, writer: &mut DirectoryWriter) -> Result<()> {
    loop {
        match segmenter.next_segment().await {
            Ok(segment) => {
                let record = writer.store(&segment)?;
                tracing::info!(
                    sequence = record.sequence,
                    size = record.size,
                    duration_ms = record.duration_micros / 1000,
                    frames = ?record.frame_count,
                    "Stored {}",
                    record.file
                );
            }
            Err(SegmenterError::EndOfStream) => {
                tracing::info!("Source ended");
                return Ok(());
            }
            Err(SegmenterError::Closed) => return Ok(()),
            Err(e) => {
                tracing::error!("Segmenter failed: {}", e);
                return Err(e);
            }
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: &str, format: LogFormat) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("live_fmp4={level},live_fmp4_lib={level},ffmpeg={level}").into()
            }),
        )
        .with((format == LogFormat::Text).then(|| tracing_subscriber::fmt::layer()))
        .with((format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .init();
}
