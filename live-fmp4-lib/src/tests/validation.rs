//! Structural validation of fragmented MP4 segments

use crate::segment::isobmff::walk_boxes;

/// Container boxes whose children are checked.
const CONTAINERS: &[&[u8; 4]] = &[b"moov", b"trak", b"mvex", b"moof", b"traf"];

/// Result of validating one playable segment.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// `mfhd` sequence number of the fragment.
    pub fragment_sequence: Option<u32>,
    /// `tfdt` base decode time per track id.
    pub base_decode_times: Vec<(u32, u64)>,
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8).map(|b| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        u64::from_be_bytes(raw)
    })
}

/// Validate `init + data` as a self-contained fragmented MP4.
///
/// Checks the top-level layout (`ftyp`, `moov`, `moof`, `mdat`), that every
/// track fragment refers to a track declared in the init payload, and that
/// the sample sizes in `trun` add up to the `mdat` payload.
pub fn validate_fmp4_segment(init: &[u8], data: &[u8]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut playable = init.to_vec();
    playable.extend_from_slice(data);

    let mut top_level = Vec::new();
    let mut track_ids = Vec::new();
    let mut trex_ids = Vec::new();
    let mut has_mvhd = false;
    let mut fragment_sequence = None;
    let mut traf_ids = Vec::new();
    let mut base_decode_times = Vec::new();
    let mut sample_bytes: u64 = 0;
    let mut mdat_payload: u64 = 0;
    let mut malformed = Vec::new();

    let trailing = walk_boxes(&playable, CONTAINERS, &mut |box_type, payload, depth| {
        let name = String::from_utf8_lossy(box_type).into_owned();
        if depth == 0 {
            top_level.push(name.clone());
        }
        match box_type {
            b"mvhd" => has_mvhd = true,
            b"tkhd" => {
                // version/flags, then two 32-bit times in version 0
                match be_u32(payload, 12) {
                    Some(id) => track_ids.push(id),
                    None => malformed.push(name),
                }
            }
            b"trex" => match be_u32(payload, 4) {
                Some(id) => trex_ids.push(id),
                None => malformed.push(name),
            },
            b"mfhd" => match be_u32(payload, 4) {
                Some(seq) => fragment_sequence = Some(seq),
                None => malformed.push(name),
            },
            b"tfhd" => match be_u32(payload, 4) {
                Some(id) => traf_ids.push(id),
                None => malformed.push(name),
            },
            b"tfdt" => {
                let version = payload.first().copied().unwrap_or(0);
                let time = if version == 1 {
                    be_u64(payload, 4)
                } else {
                    be_u32(payload, 4).map(u64::from)
                };
                match (time, traf_ids.last()) {
                    (Some(t), Some(&id)) => base_decode_times.push((id, t)),
                    _ => malformed.push(name),
                }
            }
            b"trun" => {
                let flags = be_u32(payload, 0).unwrap_or(0) & 0x00ff_ffff;
                let count = be_u32(payload, 4).unwrap_or(0) as usize;
                if flags != 0x00_0200 {
                    malformed.push(format!("trun with flags {:#08x}", flags));
                    return;
                }
                for i in 0..count {
                    match be_u32(payload, 8 + i * 4) {
                        Some(size) => sample_bytes += size as u64,
                        None => {
                            malformed.push(name.clone());
                            break;
                        }
                    }
                }
            }
            b"mdat" if depth == 0 => mdat_payload += payload.len() as u64,
            _ => {}
        }
    });

    if trailing != 0 {
        errors.push(format!("{} trailing bytes do not form a box", trailing));
    }
    let expected = ["ftyp", "moov", "moof", "mdat"];
    if top_level != expected {
        errors.push(format!("Top-level boxes {:?}, expected {:?}", top_level, expected));
    }
    if !has_mvhd {
        errors.push("moov has no mvhd".to_string());
    }
    if track_ids.is_empty() {
        errors.push("moov declares no tracks".to_string());
    }
    if trex_ids != track_ids {
        errors.push(format!("trex ids {:?} do not match tracks {:?}", trex_ids, track_ids));
    }
    if fragment_sequence.is_none() {
        errors.push("moof has no mfhd".to_string());
    }
    if traf_ids.is_empty() {
        errors.push("moof has no track fragments".to_string());
    }
    for id in &traf_ids {
        if !track_ids.contains(id) {
            errors.push(format!("traf refers to undeclared track {}", id));
        }
    }
    if base_decode_times.len() != traf_ids.len() {
        warnings.push("Not every traf carries a tfdt".to_string());
    }
    if sample_bytes != mdat_payload {
        errors.push(format!(
            "trun sample sizes add up to {}, mdat holds {}",
            sample_bytes, mdat_payload
        ));
    }
    for name in malformed {
        errors.push(format!("Malformed {} box", name));
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        fragment_sequence,
        base_decode_times,
    }
}

/// Validate a run: every segment on its own, plus the properties that only
/// hold across segments (shared init, increasing fragment sequence numbers,
/// non-decreasing decode times per track).
pub fn validate_run(segments: &[crate::types::Segment]) -> ValidationResult {
    let mut result = ValidationResult {
        is_valid: true,
        ..Default::default()
    };
    let mut last_sequence = None;
    let mut last_times: Vec<(u32, u64)> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let single = validate_fmp4_segment(&segment.init, &segment.data);
        result
            .errors
            .extend(single.errors.iter().map(|e| format!("segment {}: {}", i, e)));
        result.warnings.extend(single.warnings);

        if segment.init != segments[0].init {
            result.errors.push(format!("segment {}: init differs from segment 0", i));
        }
        if let Some(seq) = single.fragment_sequence {
            if last_sequence.is_some_and(|last| seq <= last) {
                result
                    .errors
                    .push(format!("segment {}: fragment sequence {} not increasing", i, seq));
            }
            last_sequence = Some(seq);
        }
        for (track, time) in single.base_decode_times {
            if let Some(entry) = last_times.iter_mut().find(|(t, _)| *t == track) {
                if time < entry.1 {
                    result.errors.push(format!(
                        "segment {}: track {} decode time {} goes back from {}",
                        i, track, time, entry.1
                    ));
                }
                entry.1 = time;
            } else {
                last_times.push((track, time));
            }
        }
    }

    result.is_valid = result.errors.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{boxed, init_bytes};

    #[test]
    fn test_rejects_missing_moov() {
        let init = init_bytes(1, true);
        let data = boxed(b"moof", &[]);
        let result = validate_fmp4_segment(&init, &data);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_rejects_truncated_fragment() {
        let init = init_bytes(1, false);
        let mut data = boxed(b"moof", &[]);
        data.extend(boxed(b"mdat", &[1; 10]));
        data.truncate(data.len() - 3);
        let result = validate_fmp4_segment(&init, &data);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("trailing")));
    }
}
