//! Integration testing module
//!
//! End-to-end tests for the live segmenter, driven by a scripted in-memory
//! engine that muxes real fMP4 boxes:
//! - Segment assembly from chunked muxer output
//! - Stream mapping and timestamp normalization as seen by the muxer
//! - Start/stop lifecycle, error propagation and resource release
//! - Structural validation of every produced segment

pub mod validation;
