//! Public value types shared by the segmenter and its consumers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Media type of an input or output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl MediaType {
    /// Only video and audio packets take part in timestamp normalization.
    pub fn is_av(self) -> bool {
        matches!(self, MediaType::Video | MediaType::Audio)
    }

    pub fn name(self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
            MediaType::Attachment => "attachment",
            MediaType::Unknown => "unknown",
        }
    }
}

/// A completed, self-contained fMP4 segment.
///
/// `init` holds the `ftyp` + `moov` boxes captured when the header was written
/// and is the same buffer for every segment of a run. `data` holds exactly one
/// `moof` box followed by its `mdat` box, so `init + data` is independently
/// playable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Run-scoped sequence number, starting at 0.
    pub sequence: u64,
    pub init: Bytes,
    pub data: Bytes,
    /// Wall-clock distance between the first and last video packet, in microseconds.
    pub duration_micros: i64,
    /// Wall-clock time of the first video packet, in microseconds since the Unix epoch.
    pub timestamp_utc: i64,
    /// Producer reference time of the first video packet, if the source sent one.
    pub timestamp_provided: Option<i64>,
    pub frame_count: Option<i64>,
}

impl Segment {
    /// Concatenate init and data into one playable buffer.
    pub fn to_playable(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.init.len() + self.data.len());
        out.extend_from_slice(&self.init);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Wall-clock source for per-packet timestamps.
pub trait Clock: Send + Sync + 'static {
    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}
