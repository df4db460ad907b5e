//! Handoff of completed segments from the worker thread to async consumers.
//!
//! A bounded FIFO queue. The worker never waits for consumers: a live source
//! cannot be paused, so when the queue is full the oldest segment is dropped
//! and counted. Consumers can spot the gap through [`Segment::sequence`].
//!
//! Once the run ends the channel is closed with a terminal error. Segments
//! still queued are delivered first; after that every retrieval returns the
//! terminal error.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::{Result, SegmenterError};
use crate::types::Segment;

#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<Segment>,
    terminal: Option<SegmenterError>,
    dropped: u64,
}

#[derive(Debug)]
pub struct SegmentChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
}

impl SegmentChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                terminal: None,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a completed segment. Called from the worker thread only.
    pub fn send(&self, segment: Segment) {
        {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                tracing::debug!("Segment {} produced after close, ignored", segment.sequence);
                return;
            }
            if state.queue.len() >= self.capacity {
                if let Some(oldest) = state.queue.pop_front() {
                    state.dropped += 1;
                    tracing::warn!(
                        "Segment queue full ({}), dropping segment {} ({} dropped so far)",
                        self.capacity,
                        oldest.sequence,
                        state.dropped
                    );
                }
            }
            state.queue.push_back(segment);
        }
        self.notify.notify_waiters();
    }

    /// Close the channel with a terminal error. The first close wins.
    pub fn close(&self, reason: SegmenterError) {
        {
            let mut state = self.state.lock();
            if state.terminal.is_none() {
                state.terminal = Some(reason);
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next segment without waiting.
    pub fn try_recv(&self) -> Option<Result<Segment>> {
        let mut state = self.state.lock();
        if let Some(segment) = state.queue.pop_front() {
            return Some(Ok(segment));
        }
        state.terminal.clone().map(Err)
    }

    /// Wait for the next segment.
    ///
    /// Dropping the returned future only detaches this waiter.
    pub async fn recv(&self) -> Result<Segment> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a send between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(result) = self.try_recv() {
                return result;
            }
            notified.await;
        }
    }
}

/// Clonable consumer handle that outlives borrows of the segmenter.
#[derive(Debug, Clone)]
pub struct SegmentReceiver {
    channel: Arc<SegmentChannel>,
}

impl SegmentReceiver {
    pub(crate) fn new(channel: Arc<SegmentChannel>) -> Self {
        Self { channel }
    }

    pub async fn recv(&self) -> Result<Segment> {
        self.channel.recv().await
    }

    pub fn try_recv(&self) -> Option<Result<Segment>> {
        self.channel.try_recv()
    }

    /// Segments dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.channel.dropped()
    }
}
