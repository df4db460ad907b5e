pub mod config;
pub mod config_file;
pub mod engine;
pub(crate) mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_utils;
pub mod segment;
pub(crate) mod segmenter;
pub mod stream;
pub(crate) mod types;
pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{RtspTransport, SegmenterConfig, SourceConfig, MIN_OUTPUT_BUFFER_SIZE};
pub use config_file::{generate_default_config, ConfigFile, LogFormat};
pub use error::{Result, SegmenterError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_utils::{init, install_log_filter, FfmpegEngine};
pub use segment::writer::{DirectoryWriter, SegmentRecord};
pub use segment::SegmentReceiver;
pub use segmenter::Segmenter;
pub use types::{Clock, MediaType, Segment, SystemClock};
