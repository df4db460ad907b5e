//! Per-stream decode timestamp normalization.
//!
//! The mp4 muxer rejects packets whose DTS does not increase. Live sources
//! repeat or stall timestamps, so every audio/video packet is pushed to at
//! least `last_dts + 1` before it is muxed, the same way the ffmpeg CLI does
//! when remuxing.

use crate::engine::MediaPacket;
use crate::types::MediaType;

/// Adjust `packet` so its DTS is greater than `last_dts`.
///
/// Packets of other media types are left alone. A packet without DTS is
/// treated as DTS 0, then adjusted like any other.
pub fn normalize<P: MediaPacket + ?Sized>(packet: &mut P, media_type: MediaType, last_dts: Option<i64>) {
    if !media_type.is_av() {
        return;
    }

    let Some(last_dts) = last_dts else {
        // First packet of the stream
        packet.set_dts(packet.dts().unwrap_or(0));
        packet.set_pts(packet.pts().unwrap_or(0));
        return;
    };

    let dts = packet.dts().unwrap_or(0);
    let pts = packet.pts().unwrap_or(dts);
    let next_dts = last_dts.saturating_add(1);

    if dts < next_dts {
        if pts >= dts {
            packet.set_pts(pts.max(next_dts));
        } else {
            packet.set_pts(pts);
        }
        packet.set_dts(next_dts);
    } else {
        packet.set_dts(dts);
        packet.set_pts(pts);
    }
}
