//! The FFmpeg-backed media engine.

use ffmpeg_next as ffmpeg;

use super::context::{InputContext, OutputContext, StreamParams};
use super::helpers;
use crate::config::SourceConfig;
use crate::engine::{ByteSink, InputStream, MediaEngine, MediaInput, MediaOutput, MediaPacket};
use crate::error::Result;

/// Demuxes with `avformat_open_input` and remuxes into fragmented MP4.
///
/// [`super::init`] must have been called before the first run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for FfmpegEngine {
    type Packet = ffmpeg::Packet;
    type CodecParams = StreamParams;
    type Input = InputContext;
    type Output = OutputContext;

    fn open_input(&self, source: &SourceConfig) -> Result<InputContext> {
        InputContext::open(source)
    }

    fn allocate_output(&self, buffer_size: usize) -> Result<OutputContext> {
        OutputContext::create(buffer_size)
    }
}

impl MediaInput for InputContext {
    type Packet = ffmpeg::Packet;
    type CodecParams = StreamParams;

    fn streams(&self) -> Vec<InputStream<StreamParams>> {
        InputContext::streams(self)
    }

    fn read_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        InputContext::read_packet(self)
    }
}

impl MediaOutput for OutputContext {
    type Packet = ffmpeg::Packet;
    type CodecParams = StreamParams;

    fn supports_codec(&self, params: &StreamParams) -> bool {
        OutputContext::supports_codec(self, params)
    }

    fn add_stream(&mut self, params: &StreamParams) -> Result<usize> {
        OutputContext::add_stream(self, params)
    }

    fn write_header(&mut self, sink: &mut dyn ByteSink) -> Result<()> {
        OutputContext::write_header(self, sink)
    }

    fn write_packet(&mut self, packet: &mut ffmpeg::Packet, sink: &mut dyn ByteSink) -> Result<()> {
        OutputContext::write_packet(self, packet, sink)
    }
}

impl MediaPacket for ffmpeg::Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn set_stream_index(&mut self, index: usize) {
        self.set_stream(index);
    }

    fn dts(&self) -> Option<i64> {
        ffmpeg::Packet::dts(self)
    }

    fn set_dts(&mut self, dts: i64) {
        ffmpeg::Packet::set_dts(self, Some(dts));
    }

    fn pts(&self) -> Option<i64> {
        ffmpeg::Packet::pts(self)
    }

    fn set_pts(&mut self, pts: i64) {
        ffmpeg::Packet::set_pts(self, Some(pts));
    }

    fn provided_timestamp(&self) -> Option<i64> {
        helpers::producer_reference_time(self)
    }
}
