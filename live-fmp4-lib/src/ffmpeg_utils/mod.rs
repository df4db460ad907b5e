//! FFmpeg module - the media engine used in production
//!
//! This module handles:
//! - FFmpeg initialization and log filtering
//! - Input context management for live sources
//! - Fragmented MP4 output through a custom AVIOContext

pub mod context;
pub mod engine;
pub mod helpers;
pub mod io;

pub use context::{InputContext, OutputContext, StreamParams};
pub use engine::FfmpegEngine;
pub use ffmpeg_next as ffmpeg;

use crate::error::{Result, SegmenterError};

/// Initialize the FFmpeg library.
///
/// Call once at application startup, before the first segmenter is started.
pub fn init() -> Result<()> {
    ffmpeg::init().map_err(|e| SegmenterError::Setup(format!("ffmpeg::init() failed: {}", e)))?;
    // Network sources (rtsp, http) need the network layer.
    ffmpeg::format::network::init();

    tracing::info!("FFmpeg initialized");

    Ok(())
}

/// Install a custom FFmpeg log callback that suppresses known-noisy messages.
///
/// Fragmented output with `empty_moov` and live sources whose first packets
/// do not start at zero make the muxer warn on every run. Those warnings are
/// expected with this configuration and are dropped.
///
/// **Safety & Ordering:** Must be called after `init()` and before any
/// segmenter starts, because altering the global log callback is not
/// thread-safe.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are safe to call
    // after `ffmpeg::init()`. They are called once at startup before any
    // worker thread exists.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected side-effects of the muxer setup.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "No meaningful edit list will be written when using empty_moov without delay_moov",
    "starts with a nonzero dts",
    "Set the delay_moov flag to handle this case",
    "Non-monotonous DTS in output stream",
    "Timestamps are unset in a packet",
];

fn is_suppressed(msg: &str) -> bool {
    SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s))
}

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    if is_suppressed(&msg) {
        return;
    }

    let msg = msg.trim_end();
    if level <= ffmpeg::ffi::AV_LOG_ERROR as i32 {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    }
}

/// Version of the linked libavformat, e.g. `libavformat 61.7.100`.
pub fn version_info() -> String {
    // SAFETY: returns a constant packed into an unsigned int.
    let v = unsafe { ffmpeg::ffi::avformat_version() };
    format!("libavformat {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
