//! Configuration file support
//!
//! Loads segmenter configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{RtspTransport, SegmenterConfig, SourceConfig};
use crate::error::{Result, SegmenterError};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Source settings
    pub source: SourceSettings,
    /// Segmenter settings
    pub segmenter: Option<SegmenterSettings>,
    /// Segment output settings
    pub output: Option<OutputSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Connection target
    pub url: String,
    /// Transport hint (auto, tcp, udp)
    pub transport: Option<RtspTransport>,
    /// Prefer TCP when negotiating
    pub prefer_tcp: Option<bool>,
    /// Timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Carry supported audio streams
    pub allow_audio: Option<bool>,
    /// Output chunk buffer size in bytes
    pub output_buffer_size: Option<usize>,
    /// Segments buffered for slow consumers
    pub segment_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory receiving init and fragment files
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log line format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            SegmenterError::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SegmenterError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = SegmenterConfig::default();
        Self {
            source: SourceSettings {
                url: "rtsp://127.0.0.1:554/stream".to_string(),
                transport: Some(RtspTransport::Tcp),
                prefer_tcp: Some(true),
                timeout_ms: Some(10_000),
            },
            segmenter: Some(SegmenterSettings {
                allow_audio: Some(defaults.allow_audio),
                output_buffer_size: Some(defaults.output_buffer_size),
                segment_queue_capacity: Some(defaults.segment_queue_capacity),
            }),
            output: Some(OutputSettings {
                directory: Some(PathBuf::from("segments")),
            }),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: LogFormat::Text,
            }),
        }
    }

    /// Convert to a validated source configuration
    pub fn source_config(&self) -> Result<SourceConfig> {
        let source = SourceConfig {
            url: self.source.url.clone(),
            transport: self.source.transport.unwrap_or_default(),
            prefer_tcp: self.source.prefer_tcp.unwrap_or(false),
            timeout_ms: self.source.timeout_ms,
        };
        source.validate()?;
        Ok(source)
    }

    /// Convert to a validated segmenter configuration
    pub fn segmenter_config(&self) -> Result<SegmenterConfig> {
        let defaults = SegmenterConfig::default();
        let config = match &self.segmenter {
            Some(s) => SegmenterConfig {
                allow_audio: s.allow_audio.unwrap_or(defaults.allow_audio),
                output_buffer_size: s.output_buffer_size.unwrap_or(defaults.output_buffer_size),
                segment_queue_capacity: s
                    .segment_queue_capacity
                    .unwrap_or(defaults.segment_queue_capacity),
            },
            None => defaults,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn output_directory(&self) -> Option<&Path> {
        self.output.as_ref().and_then(|o| o.directory.as_deref())
    }

    pub fn log_level(&self) -> &str {
        self.logging.as_ref().map(|l| l.level.as_str()).unwrap_or("info")
    }

    pub fn log_format(&self) -> LogFormat {
        self.logging.as_ref().map(|l| l.format).unwrap_or_default()
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ConfigFile::default_config().to_file(path)
}
