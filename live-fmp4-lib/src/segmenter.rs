//! Public lifecycle object: start a run, pull segments, stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use crate::config::{SegmenterConfig, SourceConfig};
use crate::engine::MediaEngine;
use crate::error::{Result, SegmenterError};
use crate::segment::{SegmentChannel, SegmentReceiver};
use crate::types::{Clock, Segment, SystemClock};
use crate::worker::{self, WorkerHandle, WorkerParams};

/// A worker thread owned by the segmenter.
struct Run {
    thread: JoinHandle<()>,
    finished: oneshot::Receiver<()>,
    stop: Arc<AtomicBool>,
}

impl Run {
    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to exit. Only called once the worker signalled
    /// completion or was asked to stop.
    fn join(self, channel: Option<&Arc<SegmentChannel>>) {
        if self.thread.join().is_err() {
            tracing::debug!("Joined a worker thread that panicked");
            if let Some(channel) = channel {
                channel.close(SegmenterError::Worker("worker thread panicked".to_string()));
            }
        }
    }
}

/// Live segmenter.
///
/// Each [`start`](Segmenter::start) spawns a worker thread that remuxes the
/// source into fragmented MP4 and queues one [`Segment`] per fragment.
/// Consumers pull segments with [`next_segment`](Segmenter::next_segment) or
/// through a [`SegmentReceiver`] obtained from [`segments`](Segmenter::segments).
///
/// ```ignore
/// let mut segmenter = Segmenter::new(FfmpegEngine::new(), source, SegmenterConfig::default())?;
/// segmenter.start().await?;
/// let segment = segmenter.next_segment().await?;
/// segmenter.stop().await?;
/// ```
pub struct Segmenter<E: MediaEngine> {
    engine: Arc<E>,
    source: SourceConfig,
    config: SegmenterConfig,
    clock: Arc<dyn Clock>,
    channel: Option<Arc<SegmentChannel>>,
    run: Option<Run>,
}

impl<E: MediaEngine> Segmenter<E> {
    /// Create a stopped segmenter. The configuration is validated here.
    pub fn new(
        engine: impl Into<Arc<E>>,
        source: SourceConfig,
        config: SegmenterConfig,
    ) -> Result<Self> {
        source.validate()?;
        config.validate()?;
        Ok(Self {
            engine: engine.into(),
            source,
            config,
            clock: Arc::new(SystemClock),
            channel: None,
            run: None,
        })
    }

    /// Replace the wall clock used for segment timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// True while a worker thread is alive.
    ///
    /// A run that ended on its own (end of stream or a fatal error) is no
    /// longer running, even before [`stop`](Segmenter::stop) reaps it.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }

    /// Start a run and wait until the source is open and the header written.
    ///
    /// Fails with `InvalidState` when already running. On a setup failure the
    /// worker thread has exited before this returns and the segmenter can be
    /// started again.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(SegmenterError::InvalidState(
                "segmenter is already running".to_string(),
            ));
        }
        // A previous run that ended on its own.
        if let Some(run) = self.run.take() {
            run.join(self.channel.as_ref());
        }

        let channel = Arc::new(SegmentChannel::new(self.config.segment_queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));

        tracing::info!(
            "Starting segmenter for {} (audio: {}, chunk size: {}, queue: {})",
            self.source.url,
            self.config.allow_audio,
            self.config.output_buffer_size,
            channel.capacity()
        );

        let WorkerHandle {
            thread,
            started,
            finished,
        } = worker::spawn(WorkerParams {
            engine: self.engine.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            channel: channel.clone(),
            clock: self.clock.clone(),
            stop: stop.clone(),
        })?;

        // Stored before waiting so a cancelled start can still be stopped.
        self.channel = Some(channel.clone());
        self.run = Some(Run {
            thread,
            finished,
            stop,
        });

        let outcome = match started.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let e = SegmenterError::Worker("worker thread exited during setup".to_string());
                channel.close(e.clone());
                Err(e)
            }
        };

        if outcome.is_err() {
            if let Some(run) = self.run.take() {
                run.join(Some(&channel));
            }
        }
        outcome
    }

    /// Stop the run and wait for the worker thread to exit.
    ///
    /// Fails with `InvalidState` when there is no run to stop. Segments still
    /// queued stay retrievable, after which retrieval returns `Closed` (or the
    /// error that ended the run).
    ///
    /// The thread is joined with a blocking `JoinHandle::join`. That happens
    /// only after the worker signalled completion or dropped its signal while
    /// unwinding from a panic, so the join waits at most for the rest of that
    /// unwind. A worker blocked inside a source read delays `stop` until the
    /// read returns; set `SourceConfig::timeout_ms` for network sources.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(run) = self.run.as_mut() else {
            return Err(SegmenterError::InvalidState(
                "segmenter is not running".to_string(),
            ));
        };

        run.stop.store(true, Ordering::Release);
        // An error means the sender was dropped without signalling.
        let signalled = (&mut run.finished).await.is_ok();

        if let Some(run) = self.run.take() {
            run.join(self.channel.as_ref());
        }
        if !signalled {
            if let Some(channel) = &self.channel {
                channel.close(SegmenterError::Worker(
                    "worker thread exited without signalling".to_string(),
                ));
            }
        }

        tracing::info!(
            "Segmenter for {} stopped ({} segments dropped)",
            self.source.url,
            self.dropped_segments()
        );
        Ok(())
    }

    /// Wait for the next segment of the current (or last) run.
    ///
    /// After the run ended, queued segments are returned first, then the
    /// terminal error on every call.
    pub async fn next_segment(&self) -> Result<Segment> {
        let channel = self.current_channel()?;
        channel.recv().await
    }

    /// A consumer handle for the current run that can be moved to another task.
    pub fn segments(&self) -> Result<SegmentReceiver> {
        Ok(SegmentReceiver::new(self.current_channel()?))
    }

    /// Segments dropped in the current run because the queue was full.
    pub fn dropped_segments(&self) -> u64 {
        self.channel.as_ref().map_or(0, |c| c.dropped())
    }

    fn current_channel(&self) -> Result<Arc<SegmentChannel>> {
        self.channel.clone().ok_or_else(|| {
            SegmenterError::InvalidState("segmenter has not been started".to_string())
        })
    }
}

impl<E: MediaEngine> Drop for Segmenter<E> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop.store(true, Ordering::Release);
            run.join(self.channel.as_ref());
        }
    }
}
