use thiserror::Error;

/// Main error type for the live segmenter.
///
/// Payloads are plain strings so the error is `Clone`: the terminal error of a
/// run is replayed to every retrieval that happens after the worker died.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmenterError {
    /// The engine could not open or describe the input source
    #[error("Failed to open source: {0}")]
    SourceOpen(String),

    /// No video stream survived stream mapping
    #[error("No video stream found in source")]
    NoVideoStream,

    /// Output muxer allocation, stream creation or header write failed
    #[error("Output setup failed: {0}")]
    Setup(String),

    /// Reading a packet from the source or writing it to the muxer failed
    #[error("Packet I/O error: {0}")]
    PacketIo(String),

    /// The byte sink saw output that does not frame into the expected boxes
    #[error("Framing error: {0}")]
    Framing(String),

    /// Growing an accumulator buffer failed
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A lifecycle call was made in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration value or configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// A filesystem error while storing segments
    #[error("IO error: {0}")]
    Io(String),

    /// The source reached its end and no further segments will be produced
    #[error("Source reached end of stream")]
    EndOfStream,

    /// The segmenter was stopped and no further segments will be produced
    #[error("Segmenter stopped")]
    Closed,

    /// The worker thread exited without reporting a result
    #[error("Worker thread failed: {0}")]
    Worker(String),
}

impl SegmenterError {
    /// Returns true for errors that end a run (as opposed to lifecycle misuse).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SegmenterError::PacketIo(_)
                | SegmenterError::Framing(_)
                | SegmenterError::Allocation(_)
                | SegmenterError::Worker(_)
        )
    }
}

impl From<std::io::Error> for SegmenterError {
    fn from(e: std::io::Error) -> Self {
        SegmenterError::Io(e.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SegmenterError>;
