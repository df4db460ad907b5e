//! Narrow interface to the media engine.
//!
//! The worker only talks to demuxing and muxing through these traits. The
//! FFmpeg implementation lives in [`crate::ffmpeg_utils`]; tests drive the
//! worker with a scripted in-memory engine.

use crate::config::SourceConfig;
use crate::error::Result;
use crate::types::MediaType;

/// Receives the muxer's output bytes.
///
/// Chunk boundaries are decided by the engine and never line up with box
/// boundaries. On success the sink returns the number of bytes consumed, which
/// must be the whole chunk.
pub trait ByteSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<usize>;
}

/// A coded packet as seen by the worker.
pub trait MediaPacket {
    fn stream_index(&self) -> usize;
    fn set_stream_index(&mut self, index: usize);
    fn dts(&self) -> Option<i64>;
    fn set_dts(&mut self, dts: i64);
    fn pts(&self) -> Option<i64>;
    fn set_pts(&mut self, pts: i64);
    /// Producer reference (wall-clock) time attached by the source, in microseconds.
    fn provided_timestamp(&self) -> Option<i64>;
}

/// Description of one input stream.
#[derive(Debug, Clone)]
pub struct InputStream<P> {
    pub index: usize,
    pub media_type: MediaType,
    pub params: P,
}

pub trait MediaInput {
    type Packet: MediaPacket;
    type CodecParams;

    fn streams(&self) -> Vec<InputStream<Self::CodecParams>>;

    /// Read the next packet. `Ok(None)` means end of stream.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>>;
}

pub trait MediaOutput {
    type Packet: MediaPacket;
    type CodecParams;

    /// Whether the output container can carry this codec.
    fn supports_codec(&self, params: &Self::CodecParams) -> bool;

    /// Create an output stream with a copy of `params` and return its index.
    /// The container-specific codec tag is cleared so the muxer picks its own.
    fn add_stream(&mut self, params: &Self::CodecParams) -> Result<usize>;

    /// Configure fragmented output and write the container header into `sink`.
    fn write_header(&mut self, sink: &mut dyn ByteSink) -> Result<()>;

    /// Mux one packet without holding it back for interleaving. Emits zero or
    /// more chunks into `sink` before returning; a fragment flushed during the
    /// call holds only packets from earlier calls.
    fn write_packet(&mut self, packet: &mut Self::Packet, sink: &mut dyn ByteSink) -> Result<()>;
}

/// Factory for input and output contexts. Shared with the worker thread, the
/// contexts it creates never leave that thread.
pub trait MediaEngine: Send + Sync + 'static {
    type Packet: MediaPacket;
    type CodecParams;
    type Input: MediaInput<Packet = Self::Packet, CodecParams = Self::CodecParams>;
    type Output: MediaOutput<Packet = Self::Packet, CodecParams = Self::CodecParams>;

    fn open_input(&self, source: &SourceConfig) -> Result<Self::Input>;

    /// Allocate a fragmented-MP4 output whose chunks are at most `buffer_size` bytes.
    fn allocate_output(&self, buffer_size: usize) -> Result<Self::Output>;
}
