//! Stream mapping and timestamp handling for the worker loop.

pub mod mapper;
pub mod timestamp;

pub use mapper::{map_streams, SegmentAccumulators, SegmentMetadata, StreamInfo, StreamMap};
