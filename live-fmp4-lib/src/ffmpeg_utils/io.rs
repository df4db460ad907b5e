//! Write-only AVIOContext that forwards the muxer's output to a [`ByteSink`].
//!
//! The context owns a fixed-size buffer; FFmpeg hands it over in chunks of at
//! most that size whenever it fills up or the muxer flushes. The chunks have
//! no relation to box boundaries.
//!
//! The sink is not owned by the context. It is bound with
//! [`AvioWriter::with_sink`] for the duration of one header or packet write
//! and unbound afterwards, so the context never holds a dangling reference.
//!
//! # Thread safety
//! Single-threaded use only. The context is created, written and freed on the
//! worker thread.

use ffmpeg_next as ffmpeg;
use std::ffi::c_void;
use std::ptr;

use crate::engine::ByteSink;
use crate::error::{Result, SegmenterError};

/// Target of the AVIO opaque pointer. `current` points at a
/// `&mut dyn ByteSink` on the stack of [`AvioWriter::with_sink`], or is null.
struct SinkSlot {
    current: *mut c_void,
}

pub struct AvioWriter {
    ctx: *mut ffmpeg::ffi::AVIOContext,
    slot: *mut SinkSlot,
}

impl AvioWriter {
    /// Allocate the context and its `buffer_size` byte buffer.
    pub fn new(buffer_size: usize) -> Result<Self> {
        let buffer_len = i32::try_from(buffer_size).map_err(|_| {
            SegmenterError::Setup(format!("output buffer size {} is too large", buffer_size))
        })?;

        let slot = Box::into_raw(Box::new(SinkSlot {
            current: ptr::null_mut(),
        }));

        // SAFETY: every pointer allocated here is either stored in the
        // returned value, whose Drop frees it, or freed on the error path.
        unsafe {
            let buffer = ffmpeg::ffi::av_malloc(buffer_size) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(slot));
                return Err(SegmenterError::Setup(
                    "Failed to allocate AVIO buffer".to_string(),
                ));
            }

            let ctx = ffmpeg::ffi::avio_alloc_context(
                buffer,
                buffer_len,
                1,
                slot as *mut c_void,
                None,
                Some(write_packet),
                None,
            );
            if ctx.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(slot));
                return Err(SegmenterError::Setup(
                    "Failed to allocate AVIO context".to_string(),
                ));
            }
            // Live output, never seekable.
            (*ctx).seekable = 0;

            Ok(Self { ctx, slot })
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut ffmpeg::ffi::AVIOContext {
        self.ctx
    }

    /// Run `f` with `sink` receiving every chunk the context writes, flushing
    /// whatever is still buffered before the sink is unbound.
    pub fn with_sink<R>(&mut self, sink: &mut dyn ByteSink, f: impl FnOnce() -> R) -> R {
        let mut bound: &mut dyn ByteSink = sink;
        // SAFETY: `slot` is valid until Drop. `bound` outlives both `f` and
        // the flush below, and the pointer to it is cleared before returning.
        unsafe {
            (*self.slot).current = &mut bound as *mut &mut dyn ByteSink as *mut c_void;
        }
        let result = f();
        unsafe {
            ffmpeg::ffi::avio_flush(self.ctx);
            (*self.slot).current = ptr::null_mut();
        }
        result
    }

    /// Take the sticky write error of the context, if any.
    pub fn take_error(&mut self) -> Option<ffmpeg::Error> {
        // SAFETY: `ctx` is valid until Drop.
        unsafe {
            let code = (*self.ctx).error;
            if code < 0 {
                (*self.ctx).error = 0;
                Some(ffmpeg::Error::from(code))
            } else {
                None
            }
        }
    }
}

impl Drop for AvioWriter {
    fn drop(&mut self) {
        // SAFETY: the context may have replaced its buffer, so it is freed
        // through the context, then the context itself, then the slot.
        unsafe {
            if !self.ctx.is_null() {
                ffmpeg::ffi::av_freep(&mut (*self.ctx).buffer as *mut *mut u8 as *mut c_void);
                ffmpeg::ffi::avio_context_free(&mut self.ctx);
            }
            drop(Box::from_raw(self.slot));
        }
    }
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: i32) -> i32 {
    let slot = &mut *(opaque as *mut SinkSlot);
    if slot.current.is_null() {
        tracing::warn!("Dropping {} output bytes written outside a sink binding", buf_size);
        return -1;
    }
    let sink = &mut *(slot.current as *mut &mut dyn ByteSink);
    let chunk = if buf.is_null() || buf_size <= 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(buf, buf_size as usize)
    };
    match sink.write_chunk(chunk) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}
