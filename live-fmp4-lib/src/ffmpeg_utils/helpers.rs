//! Safe wrappers around FFmpeg FFI calls.
//!
//! All `unsafe` blocks needed by the engine are contained here with explicit
//! safety arguments. Callers outside this module should never need to write
//! `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream. `codecpar` is set by `set_parameters` and is non-null.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Returns `true` if the output context's container can store `codec_id`.
pub fn output_supports_codec(
    output: &ffmpeg::format::context::Output,
    codec_id: ffmpeg::codec::Id,
) -> bool {
    // SAFETY: `output.as_ptr()` is valid for the lifetime of `output` and an
    // allocated output context always carries its `oformat`.
    unsafe {
        let oformat = (*output.as_ptr()).oformat;
        if oformat.is_null() {
            return false;
        }
        ffmpeg::ffi::avformat_query_codec(oformat, codec_id.into(), FF_COMPLIANCE_NORMAL) == 1
    }
}

const FF_COMPLIANCE_NORMAL: i32 = 0;

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` by setting it to
/// null, so dropping the `Output` neither closes nor frees it.
///
/// Call this before dropping an `Output` whose `pb` is owned separately.
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

/// Attach a custom `AVIOContext` to an output context.
pub fn attach_avio(
    output: &mut ffmpeg::format::context::Output,
    pb: *mut ffmpeg::ffi::AVIOContext,
) {
    // SAFETY: `output.as_mut_ptr()` is valid. The caller keeps `pb` alive
    // and detaches it before either side is freed.
    unsafe {
        let ctx = output.as_mut_ptr();
        (*ctx).pb = pb;
        (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;
    }
}

/// Wall-clock time from the packet's producer reference time (PRFT) side
/// data, in microseconds since the Unix epoch.
pub fn producer_reference_time(packet: &ffmpeg::Packet) -> Option<i64> {
    let mut size: usize = 0;
    // SAFETY: `packet.as_ptr()` is valid for the lifetime of `packet`. The
    // returned pointer is owned by the packet and only read while it lives.
    // PRFT side data starts with the 64-bit `wallclock` field.
    unsafe {
        let data = ffmpeg::ffi::av_packet_get_side_data(
            packet.as_ptr(),
            ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_PRFT,
            &mut size,
        );
        if data.is_null() || size < std::mem::size_of::<i64>() {
            return None;
        }
        Some(std::ptr::read_unaligned(data as *const i64))
    }
}

/// Convert FFmpeg's media type to ours.
pub fn media_type(medium: ffmpeg::media::Type) -> crate::types::MediaType {
    use crate::types::MediaType;
    match medium {
        ffmpeg::media::Type::Video => MediaType::Video,
        ffmpeg::media::Type::Audio => MediaType::Audio,
        ffmpeg::media::Type::Subtitle => MediaType::Subtitle,
        ffmpeg::media::Type::Data => MediaType::Data,
        ffmpeg::media::Type::Attachment => MediaType::Attachment,
        ffmpeg::media::Type::Unknown => MediaType::Unknown,
    }
}
