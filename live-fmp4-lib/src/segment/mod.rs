//! Segment assembly module
//!
//! This module turns the muxer's chunked fMP4 output into segments and hands
//! them to consumers.

pub mod channel;
pub mod isobmff;
pub mod reassembler;
pub mod writer;

pub use channel::{SegmentChannel, SegmentReceiver};
pub use reassembler::{BoxReassembler, Fragment};
