//! The worker thread: pulls packets from the source, remuxes them and turns
//! the muxer's output into segments.
//!
//! Everything engine-related is created, used and dropped on this thread.
//! The only state shared with the caller is the stop flag, the segment
//! channel and the two signalling oneshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::config::{SegmenterConfig, SourceConfig};
use crate::engine::{ByteSink, MediaEngine, MediaInput, MediaOutput, MediaPacket};
use crate::error::{Result, SegmenterError};
use crate::segment::{BoxReassembler, Fragment, SegmentChannel};
use crate::stream::{map_streams, timestamp, StreamMap};
use crate::types::{Clock, Segment};

pub(crate) const THREAD_NAME: &str = "segmenter-worker";

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunEnd {
    Stopped,
    EndOfStream,
}

/// Caller-side handle of a spawned worker.
pub(crate) struct WorkerHandle {
    pub thread: JoinHandle<()>,
    pub started: oneshot::Receiver<Result<()>>,
    pub finished: oneshot::Receiver<()>,
}

/// Everything needed to set up a run on the worker thread.
pub(crate) struct WorkerParams<E: MediaEngine> {
    pub engine: Arc<E>,
    pub source: SourceConfig,
    pub config: SegmenterConfig,
    pub channel: Arc<SegmentChannel>,
    pub clock: Arc<dyn Clock>,
    pub stop: Arc<AtomicBool>,
}

/// Spawn the worker thread. Setup happens on the thread; its outcome arrives
/// on `started`.
pub(crate) fn spawn<E: MediaEngine>(params: WorkerParams<E>) -> Result<WorkerHandle> {
    let (started_tx, started) = oneshot::channel();
    let (finished_tx, finished) = oneshot::channel();

    let thread = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || worker_main(params, started_tx, finished_tx))
        .map_err(|e| SegmenterError::Worker(format!("failed to spawn worker thread: {}", e)))?;

    Ok(WorkerHandle {
        thread,
        started,
        finished,
    })
}

fn worker_main<E: MediaEngine>(
    params: WorkerParams<E>,
    started: oneshot::Sender<Result<()>>,
    finished: oneshot::Sender<()>,
) {
    let WorkerParams {
        engine,
        source,
        config,
        channel,
        clock,
        stop,
    } = params;
    // Declared first so it drops last, after the engine handles.
    let _panic_guard = CloseOnPanic {
        channel: channel.clone(),
    };

    let mut context = match WorkerContext::open(&*engine, &source, &config, channel.clone(), clock)
    {
        Ok(context) => context,
        Err(e) => {
            tracing::error!("Failed to start segmenter for {}: {}", source.url, e);
            channel.close(e.clone());
            let _ = started.send(Err(e));
            return;
        }
    };

    tracing::info!("Segmenter started for {}", source.url);
    let _ = started.send(Ok(()));

    let outcome = context.run(&stop);
    let produced = context.next_sequence;
    // Release the engine handles before consumers see the terminal state.
    drop(context);

    let terminal = match outcome {
        Ok(RunEnd::Stopped) => {
            tracing::info!("Segmenter stopped after {} segments", produced);
            SegmenterError::Closed
        }
        Ok(RunEnd::EndOfStream) => {
            tracing::info!("Source ended after {} segments", produced);
            SegmenterError::EndOfStream
        }
        Err(e) => {
            tracing::error!("Segmenter failed after {} segments: {}", produced, e);
            e
        }
    };
    channel.close(terminal);
    let _ = finished.send(());
}

/// Closes the channel when the worker thread unwinds, so consumers waiting
/// for a segment see the failure instead of waiting forever.
struct CloseOnPanic {
    channel: Arc<SegmentChannel>,
}

impl Drop for CloseOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("Segmenter worker thread panicked");
            self.channel
                .close(SegmenterError::Worker("worker thread panicked".to_string()));
        }
    }
}

/// Resources of one run. Dropping it releases every engine handle.
pub(crate) struct WorkerContext<E: MediaEngine> {
    input: E::Input,
    output: E::Output,
    streams: StreamMap,
    reassembler: BoxReassembler,
    channel: Arc<SegmentChannel>,
    clock: Arc<dyn Clock>,
    next_sequence: u64,
}

impl<E: MediaEngine> WorkerContext<E> {
    /// Open the source, configure the output and write the container header.
    pub(crate) fn open(
        engine: &E,
        source: &SourceConfig,
        config: &SegmenterConfig,
        channel: Arc<SegmentChannel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let input = engine.open_input(source)?;
        let mut output = engine.allocate_output(config.output_buffer_size)?;

        let streams = map_streams(&input.streams(), &mut output, config.allow_audio)?;

        let mut context = Self {
            input,
            output,
            streams,
            reassembler: BoxReassembler::new(),
            channel,
            clock,
            next_sequence: 0,
        };
        context.write_header()?;
        Ok(context)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut sink = SegmentSink {
            reassembler: &mut self.reassembler,
            streams: &mut self.streams,
            channel: &self.channel,
            next_sequence: &mut self.next_sequence,
            error: None,
        };
        let result = self.output.write_header(&mut sink);
        match (result, sink.error.take()) {
            (_, Some(sink_err)) => return Err(sink_err),
            (Ok(()), None) => {}
            (Err(SegmenterError::Setup(msg)), None) => return Err(SegmenterError::Setup(msg)),
            (Err(e), None) => {
                return Err(SegmenterError::Setup(format!("writing header: {}", e)));
            }
        }

        match self.reassembler.init() {
            Some(init) => tracing::debug!("Init payload captured: {} bytes", init.len()),
            None => tracing::debug!(
                "Header written, init payload not complete yet ({})",
                self.reassembler.state_name()
            ),
        }
        Ok(())
    }

    /// Run until stop is requested, the source ends or something fails.
    pub(crate) fn run(&mut self, stop: &AtomicBool) -> Result<RunEnd> {
        while !stop.load(Ordering::Acquire) {
            let Some(mut packet) = self.input.read_packet()? else {
                return Ok(RunEnd::EndOfStream);
            };
            self.process_packet(&mut packet)?;
        }
        Ok(RunEnd::Stopped)
    }

    fn process_packet(&mut self, packet: &mut E::Packet) -> Result<()> {
        let input_index = packet.stream_index();
        let Some(info) = self.streams.get_mut(input_index) else {
            return Ok(());
        };

        packet.set_stream_index(info.output_index);
        timestamp::normalize(packet, info.media_type, info.last_dts);
        if info.media_type.is_av() {
            info.last_dts = packet.dts();
            info.last_pts = packet.pts();
        }
        let provided = packet.provided_timestamp();

        let mut sink = SegmentSink {
            reassembler: &mut self.reassembler,
            streams: &mut self.streams,
            channel: &self.channel,
            next_sequence: &mut self.next_sequence,
            error: None,
        };
        let result = self.output.write_packet(packet, &mut sink);
        match (result, sink.error.take()) {
            (_, Some(sink_err)) => return Err(sink_err),
            (Ok(()), None) => {}
            (Err(SegmenterError::PacketIo(msg)), None) => return Err(SegmenterError::PacketIo(msg)),
            (Err(e), None) => {
                return Err(SegmenterError::PacketIo(format!("writing packet: {}", e)));
            }
        }

        // A fragment flushed by this write holds only earlier packets.
        let now = self.clock.now_micros();
        if let Some(info) = self.streams.get_mut(input_index) {
            info.record_packet(now, provided);
        }
        Ok(())
    }
}

/// The byte sink installed into the muxer for one header or packet write.
///
/// The first error is kept so the worker reports it instead of the engine's
/// generic write failure.
struct SegmentSink<'a> {
    reassembler: &'a mut BoxReassembler,
    streams: &'a mut StreamMap,
    channel: &'a SegmentChannel,
    next_sequence: &'a mut u64,
    error: Option<SegmenterError>,
}

impl SegmentSink<'_> {
    fn emit(&mut self, fragment: Fragment) {
        let Some(meta) = self.streams.segment_metadata() else {
            tracing::warn!(
                "Dropping fragment of {} bytes: no video packets recorded since the last segment",
                fragment.data.len()
            );
            self.streams.reset_segment();
            return;
        };
        self.streams.reset_segment();

        let sequence = *self.next_sequence;
        *self.next_sequence += 1;

        tracing::debug!(
            "Segment {}: {} bytes, {} frames, {} us",
            sequence,
            fragment.data.len(),
            meta.frame_count.unwrap_or(0),
            meta.duration_micros
        );

        self.channel.send(Segment {
            sequence,
            init: fragment.init,
            data: fragment.data,
            duration_micros: meta.duration_micros,
            timestamp_utc: meta.timestamp_utc,
            timestamp_provided: meta.timestamp_provided,
            frame_count: meta.frame_count,
        });
    }
}

impl ByteSink for SegmentSink<'_> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<usize> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        match self.reassembler.push(chunk) {
            Ok(fragments) => {
                for fragment in fragments {
                    self.emit(fragment);
                }
                Ok(chunk.len())
            }
            Err(e) => {
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }
}
