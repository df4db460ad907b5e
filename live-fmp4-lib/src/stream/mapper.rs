//! Input-to-output stream mapping and per-stream bookkeeping.

use std::collections::BTreeMap;

use crate::engine::{InputStream, MediaOutput};
use crate::error::{Result, SegmenterError};
use crate::types::MediaType;

/// Bookkeeping for one mapped input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub output_index: usize,
    pub media_type: MediaType,
    /// Last DTS handed to the muxer. Run-scoped.
    pub last_dts: Option<i64>,
    /// Last PTS handed to the muxer. Run-scoped.
    pub last_pts: Option<i64>,
    pub segment: SegmentAccumulators,
}

/// Per-segment counters, reset whenever a segment is emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentAccumulators {
    pub first_utc: Option<i64>,
    pub last_utc: Option<i64>,
    pub first_provided: Option<i64>,
    pub last_provided: Option<i64>,
    pub frame_count: Option<i64>,
}

impl SegmentAccumulators {
    pub fn is_empty(&self) -> bool {
        self.first_utc.is_none() && self.frame_count.is_none()
    }
}

impl StreamInfo {
    pub fn new(output_index: usize, media_type: MediaType) -> Self {
        Self {
            output_index,
            media_type,
            last_dts: None,
            last_pts: None,
            segment: SegmentAccumulators::default(),
        }
    }

    /// Record one packet written to the muxer at wall-clock `now_micros`.
    pub fn record_packet(&mut self, now_micros: i64, provided: Option<i64>) {
        let acc = &mut self.segment;
        acc.first_utc.get_or_insert(now_micros);
        acc.last_utc = Some(now_micros);
        if let Some(provided) = provided {
            acc.first_provided.get_or_insert(provided);
            acc.last_provided = Some(provided);
        }
        if self.media_type == MediaType::Video {
            *acc.frame_count.get_or_insert(0) += 1;
        }
    }
}

/// Metadata of a finished segment, taken from one video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMetadata {
    pub duration_micros: i64,
    pub timestamp_utc: i64,
    pub timestamp_provided: Option<i64>,
    pub frame_count: Option<i64>,
}

/// Mapped streams keyed by input stream index, iterated in input order.
#[derive(Debug, Clone, Default)]
pub struct StreamMap {
    streams: BTreeMap<usize, StreamInfo>,
}

impl StreamMap {
    pub fn get(&self, input_index: usize) -> Option<&StreamInfo> {
        self.streams.get(&input_index)
    }

    pub fn get_mut(&mut self, input_index: usize) -> Option<&mut StreamInfo> {
        self.streams.get_mut(&input_index)
    }

    pub fn insert(&mut self, input_index: usize, info: StreamInfo) {
        self.streams.insert(input_index, info);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn has_video(&self) -> bool {
        self.streams
            .values()
            .any(|s| s.media_type == MediaType::Video)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &StreamInfo)> {
        self.streams.iter()
    }

    /// Metadata of the current segment, from the first video stream that
    /// recorded packets since the last boundary.
    pub fn segment_metadata(&self) -> Option<SegmentMetadata> {
        self.streams
            .values()
            .filter(|s| s.media_type == MediaType::Video)
            .find_map(|s| {
                let acc = &s.segment;
                let first = acc.first_utc?;
                let last = acc.last_utc?;
                acc.frame_count?;
                Some(SegmentMetadata {
                    duration_micros: last - first,
                    timestamp_utc: first,
                    timestamp_provided: acc.first_provided,
                    frame_count: acc.frame_count,
                })
            })
    }

    /// Start a new segment on every stream.
    pub fn reset_segment(&mut self) {
        for info in self.streams.values_mut() {
            info.segment = SegmentAccumulators::default();
        }
    }
}

/// Decide which input streams go to the output and create their output streams.
///
/// Video is always carried. Audio is carried when `allow_audio` is set and
/// the output container supports the codec. Everything else is dropped.
pub fn map_streams<O: MediaOutput>(
    inputs: &[InputStream<O::CodecParams>],
    output: &mut O,
    allow_audio: bool,
) -> Result<StreamMap> {
    let mut map = StreamMap::default();

    for input in inputs {
        let carried = match input.media_type {
            MediaType::Video => true,
            MediaType::Audio => allow_audio && output.supports_codec(&input.params),
            _ => false,
        };
        if !carried {
            tracing::debug!(
                "Skipping {} stream {}",
                input.media_type.name(),
                input.index
            );
            continue;
        }

        let output_index = output.add_stream(&input.params)?;
        tracing::debug!(
            "Mapped {} stream: input {} -> output {}",
            input.media_type.name(),
            input.index,
            output_index
        );
        map.insert(input.index, StreamInfo::new(output_index, input.media_type));
    }

    if !map.has_video() {
        return Err(SegmenterError::NoVideoStream);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ByteSink, MediaPacket};

    /// Output that only records which streams were added.
    #[derive(Default)]
    struct RecordingOutput {
        supported_audio: Vec<&'static str>,
        added: Vec<&'static str>,
    }

    struct NoPacket;

    impl MediaPacket for NoPacket {
        fn stream_index(&self) -> usize {
            0
        }
        fn set_stream_index(&mut self, _index: usize) {}
        fn dts(&self) -> Option<i64> {
            None
        }
        fn set_dts(&mut self, _dts: i64) {}
        fn pts(&self) -> Option<i64> {
            None
        }
        fn set_pts(&mut self, _pts: i64) {}
        fn provided_timestamp(&self) -> Option<i64> {
            None
        }
    }

    impl MediaOutput for RecordingOutput {
        type Packet = NoPacket;
        type CodecParams = &'static str;

        fn supports_codec(&self, params: &&'static str) -> bool {
            self.supported_audio.contains(params)
        }

        fn add_stream(&mut self, params: &&'static str) -> Result<usize> {
            self.added.push(*params);
            Ok(self.added.len() - 1)
        }

        fn write_header(&mut self, _sink: &mut dyn ByteSink) -> Result<()> {
            Ok(())
        }

        fn write_packet(&mut self, _packet: &mut NoPacket, _sink: &mut dyn ByteSink) -> Result<()> {
            Ok(())
        }
    }

    fn stream(index: usize, media_type: MediaType, codec: &'static str) -> InputStream<&'static str> {
        InputStream {
            index,
            media_type,
            params: codec,
        }
    }

    fn inputs() -> Vec<InputStream<&'static str>> {
        vec![
            stream(0, MediaType::Data, "onvif"),
            stream(1, MediaType::Video, "h264"),
            stream(2, MediaType::Audio, "aac"),
            stream(3, MediaType::Audio, "pcm_alaw"),
            stream(4, MediaType::Subtitle, "mov_text"),
        ]
    }

    #[test]
    fn test_maps_video_and_supported_audio() {
        let mut output = RecordingOutput {
            supported_audio: vec!["aac"],
            ..Default::default()
        };
        let map = map_streams(&inputs(), &mut output, true).unwrap();

        assert_eq!(output.added, vec!["h264", "aac"]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1).unwrap().output_index, 0);
        assert_eq!(map.get(2).unwrap().output_index, 1);
        assert_eq!(map.get(2).unwrap().media_type, MediaType::Audio);
        assert!(map.get(0).is_none());
        assert!(map.get(3).is_none());
        assert!(map.get(4).is_none());
    }

    #[test]
    fn test_audio_disallowed() {
        let mut output = RecordingOutput {
            supported_audio: vec!["aac"],
            ..Default::default()
        };
        let map = map_streams(&inputs(), &mut output, false).unwrap();
        assert_eq!(output.added, vec!["h264"]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_no_video_is_error() {
        let mut output = RecordingOutput {
            supported_audio: vec!["aac"],
            ..Default::default()
        };
        let audio_only = vec![stream(0, MediaType::Audio, "aac")];
        let err = map_streams(&audio_only, &mut output, true).unwrap_err();
        assert_eq!(err, SegmenterError::NoVideoStream);
    }

    #[test]
    fn test_record_and_metadata() {
        let mut map = StreamMap::default();
        map.insert(0, StreamInfo::new(0, MediaType::Audio));
        map.insert(1, StreamInfo::new(1, MediaType::Video));

        map.get_mut(0).unwrap().record_packet(50, None);
        map.get_mut(1).unwrap().record_packet(100, Some(7));
        map.get_mut(1).unwrap().record_packet(140, None);
        map.get_mut(1).unwrap().record_packet(180, Some(9));

        let audio = &map.get(0).unwrap().segment;
        assert_eq!(audio.frame_count, None);
        assert_eq!(audio.first_utc, Some(50));

        let meta = map.segment_metadata().unwrap();
        assert_eq!(
            meta,
            SegmentMetadata {
                duration_micros: 80,
                timestamp_utc: 100,
                timestamp_provided: Some(7),
                frame_count: Some(3),
            }
        );
        assert_eq!(map.get(1).unwrap().segment.last_provided, Some(9));

        map.reset_segment();
        assert!(map.get(1).unwrap().segment.is_empty());
        assert!(map.get(0).unwrap().segment.is_empty());
        assert!(map.segment_metadata().is_none());
    }

    #[test]
    fn test_metadata_skips_idle_video_stream() {
        let mut map = StreamMap::default();
        map.insert(0, StreamInfo::new(0, MediaType::Video));
        map.insert(1, StreamInfo::new(1, MediaType::Video));
        map.get_mut(1).unwrap().record_packet(10, None);

        let meta = map.segment_metadata().unwrap();
        assert_eq!(meta.timestamp_utc, 10);
        assert_eq!(meta.frame_count, Some(1));
    }

    #[test]
    fn test_reset_keeps_last_timestamps() {
        let mut info = StreamInfo::new(0, MediaType::Video);
        info.last_dts = Some(10);
        info.last_pts = Some(12);
        info.record_packet(1, None);
        let mut map = StreamMap::default();
        map.insert(0, info);
        map.reset_segment();
        assert_eq!(map.get(0).unwrap().last_dts, Some(10));
        assert_eq!(map.get(0).unwrap().last_pts, Some(12));
    }
}
