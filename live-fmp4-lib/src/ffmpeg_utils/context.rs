//! FFmpeg context wrappers for input/output handling

use ffmpeg_next as ffmpeg;

use super::helpers;
use super::io::AvioWriter;
use crate::config::SourceConfig;
use crate::engine::{ByteSink, InputStream};
use crate::error::{Result, SegmenterError};

/// Codec parameters of an input stream plus the time base its packets use.
#[derive(Clone)]
pub struct StreamParams {
    pub parameters: ffmpeg::codec::Parameters,
    pub time_base: ffmpeg::Rational,
}

/// Wrapper for FFmpeg input context
pub struct InputContext {
    inner: ffmpeg::format::context::Input,
    url: String,
}

impl InputContext {
    /// Open a live source and probe its streams.
    pub fn open(source: &SourceConfig) -> Result<Self> {
        let mut opts = ffmpeg::Dictionary::new();
        for (key, value) in source.input_options() {
            opts.set(key, &value);
        }

        let inner = ffmpeg::format::input_with_dictionary(&source.url, opts)
            .map_err(|e| SegmenterError::SourceOpen(format!("{}: {}", source.url, e)))?;

        tracing::debug!(
            "Opened input {} ({} streams)",
            source.url,
            inner.streams().len()
        );

        Ok(Self {
            inner,
            url: source.url.clone(),
        })
    }

    pub fn streams(&self) -> Vec<InputStream<StreamParams>> {
        self.inner
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                InputStream {
                    index: stream.index(),
                    media_type: helpers::media_type(parameters.medium()),
                    params: StreamParams {
                        parameters,
                        time_base: stream.time_base(),
                    },
                }
            })
            .collect()
    }

    /// Read the next packet; `None` at end of stream.
    pub fn read_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.inner) {
                Ok(()) => return Ok(Some(packet)),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => continue,
                Err(e) => {
                    return Err(SegmenterError::PacketIo(format!(
                        "reading from {}: {}",
                        self.url, e
                    )))
                }
            }
        }
    }
}

/// Fragmented MP4 output context writing through a custom AVIO context.
pub struct OutputContext {
    // Dropped before `avio`.
    inner: ffmpeg::format::context::Output,
    avio: AvioWriter,
    /// Time base of the input stream behind each output stream.
    source_time_bases: Vec<ffmpeg::Rational>,
}

impl OutputContext {
    /// Allocate an `mp4` output whose chunks are at most `buffer_size` bytes.
    pub fn create(buffer_size: usize) -> Result<Self> {
        let mut avio = AvioWriter::new(buffer_size)?;

        let mut ptr: *mut ffmpeg::ffi::AVFormatContext = std::ptr::null_mut();
        let format_name = c"mp4";
        // SAFETY: `ptr` is only wrapped when allocation succeeded.
        let mut inner = unsafe {
            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut ptr,
                std::ptr::null(),
                format_name.as_ptr(),
                std::ptr::null(),
            );
            if ret < 0 || ptr.is_null() {
                return Err(SegmenterError::Setup(format!(
                    "Failed to create output context: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
            ffmpeg::format::context::Output::wrap(ptr)
        };
        helpers::attach_avio(&mut inner, avio.as_mut_ptr());

        Ok(Self {
            inner,
            avio,
            source_time_bases: Vec::new(),
        })
    }

    pub fn supports_codec(&self, params: &StreamParams) -> bool {
        helpers::output_supports_codec(&self.inner, params.parameters.id())
    }

    /// Add an output stream that copies `params`.
    pub fn add_stream(&mut self, params: &StreamParams) -> Result<usize> {
        let mut out_stream = self
            .inner
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| SegmenterError::Setup(format!("Failed to add output stream: {}", e)))?;

        out_stream.set_parameters(params.parameters.clone());
        helpers::stream_reset_codec_tag(&mut out_stream);
        out_stream.set_time_base(params.time_base);

        let index = out_stream.index();
        self.source_time_bases.push(params.time_base);
        Ok(index)
    }

    /// Write the header with fragmented output options; its bytes go to `sink`.
    pub fn write_header(&mut self, sink: &mut dyn ByteSink) -> Result<()> {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("movflags", "frag_keyframe+empty_moov+default_base_moof");
        opts.set("flush_packets", "1");

        let inner = &mut self.inner;
        self.avio
            .with_sink(sink, || inner.write_header_with(opts))
            .map_err(|e| SegmenterError::Setup(format!("Failed to write header: {}", e)))?;
        if let Some(e) = self.avio.take_error() {
            return Err(SegmenterError::Setup(format!("Failed to write header: {}", e)));
        }

        for (index, stream) in self.inner.streams().enumerate() {
            tracing::debug!("Output stream {} time base {}", index, stream.time_base());
        }
        Ok(())
    }

    /// Rescale `packet` to its output stream's time base and mux it; any
    /// bytes it produces go to `sink`.
    ///
    /// Uses `av_write_frame`, not the interleaving variant: the packet must be
    /// muxed before this returns, so that a fragment flushed here holds only
    /// packets from earlier calls.
    pub fn write_packet(&mut self, packet: &mut ffmpeg::Packet, sink: &mut dyn ByteSink) -> Result<()> {
        let index = packet.stream();
        let source_tb = self.source_time_bases.get(index).copied();
        let output_tb = self.inner.stream(index).map(|s| s.time_base());
        let (Some(source_tb), Some(output_tb)) = (source_tb, output_tb) else {
            return Err(SegmenterError::PacketIo(format!(
                "packet for unknown output stream {}",
                index
            )));
        };
        packet.rescale_ts(source_tb, output_tb);
        packet.set_position(-1);

        let inner = &mut self.inner;
        self.avio
            .with_sink(sink, || packet.write(inner))
            .map_err(|e| SegmenterError::PacketIo(format!("Failed to write packet: {}", e)))?;
        if let Some(e) = self.avio.take_error() {
            return Err(SegmenterError::PacketIo(format!("Failed to write packet: {}", e)));
        }
        Ok(())
    }
}

impl Drop for OutputContext {
    fn drop(&mut self) {
        // The AVIO context is owned by `avio`, not by the format context.
        helpers::detach_avio(&mut self.inner);
    }
}
