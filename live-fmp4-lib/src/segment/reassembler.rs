//! Reassembly of fMP4 boxes from the muxer's chunked output.
//!
//! The muxer hands over its output in chunks whose boundaries are decided by
//! the output buffer, not by the box layout. The reassembler collects three
//! kinds of regions out of that byte stream:
//!
//! - the `ftyp` box, then the `moov` box directly after it. Together they form
//!   the init payload, frozen once per run.
//! - one `moof` box plus the `mdat` box that follows it, handed out as a
//!   [`Fragment`] once complete.
//!
//! Box headers are only looked for at box boundaries: at the start of a chunk
//! while no region is being collected, or right after a region completes
//! inside a chunk. A header cut off by the end of a chunk is carried over and
//! completed by the next one. Bytes outside tracked boxes (e.g. the trailer)
//! are dropped.
//!
//! Once bytes were dropped, the rest of that box keeps arriving in later
//! chunks. Until a chunk starts with a tracked box again, a short tail is
//! dropped too instead of being carried, so it cannot be glued in front of
//! the next valid box.

use bytes::Bytes;

use super::isobmff::{BoxHeader, FTYP, MDAT, MOOF, MOOV};
use crate::error::{Result, SegmenterError};

/// A fixed-size region being collected.
#[derive(Debug)]
struct Region {
    expected: usize,
    buf: Vec<u8>,
}

impl Region {
    fn new(expected: u64) -> Result<Self> {
        let expected = usize::try_from(expected).map_err(|_| {
            SegmenterError::Allocation(format!("box of {} bytes does not fit in memory", expected))
        })?;
        Ok(Self {
            expected,
            buf: Vec::new(),
        })
    }

    fn remaining(&self) -> usize {
        self.expected - self.buf.len()
    }

    fn is_complete(&self) -> bool {
        self.buf.len() == self.expected
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    fn fill(&mut self, data: &[u8]) -> Result<usize> {
        let take = self.remaining().min(data.len());
        self.buf.try_reserve(take).map_err(|e| {
            SegmenterError::Allocation(format!(
                "growing {} byte buffer by {}: {}",
                self.buf.len(),
                take,
                e
            ))
        })?;
        self.buf.extend_from_slice(&data[..take]);
        Ok(take)
    }
}

/// Which region, if any, is being collected.
#[derive(Debug)]
enum Accumulator {
    Idle,
    FileType(Region),
    AwaitingMetadata,
    Metadata(Region),
    Fragment(Region),
}

impl Accumulator {
    fn name(&self) -> &'static str {
        match self {
            Accumulator::Idle => "idle",
            Accumulator::FileType(_) => "collecting ftyp",
            Accumulator::AwaitingMetadata => "awaiting moov",
            Accumulator::Metadata(_) => "collecting moov",
            Accumulator::Fragment(_) => "collecting fragment",
        }
    }
}

/// One complete `moof` + `mdat` pair and the init payload it plays with.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub init: Bytes,
    pub data: Bytes,
}

/// Outcome of looking for a box header at a boundary.
enum Boundary {
    /// A new region starts here.
    Start(Accumulator),
    /// Nothing tracked starts here; drop the rest of the chunk.
    Discard(&'static str),
}

#[derive(Debug)]
pub struct BoxReassembler {
    state: Accumulator,
    file_type: Option<Bytes>,
    init: Option<Bytes>,
    /// Start of a box header that did not fit in the previous chunk.
    carry: Vec<u8>,
    /// Bytes were dropped and no tracked box has started since.
    resync: bool,
}

impl Default for BoxReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxReassembler {
    pub fn new() -> Self {
        Self {
            state: Accumulator::Idle,
            file_type: None,
            init: None,
            carry: Vec::new(),
            resync: false,
        }
    }

    /// The frozen `ftyp` + `moov` payload, once both boxes were seen.
    pub fn init(&self) -> Option<&Bytes> {
        self.init.as_ref()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Consume one output chunk and return the fragments it completed.
    ///
    /// The whole chunk is always consumed on success. A chunk that cannot be
    /// framed is an error and leaves the reassembler unusable for this run.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>> {
        if self.carry.is_empty() {
            return self.push_bytes(chunk);
        }
        let mut joined = std::mem::take(&mut self.carry);
        joined.try_reserve(chunk.len()).map_err(|e| {
            SegmenterError::Allocation(format!("joining carried header bytes: {}", e))
        })?;
        joined.extend_from_slice(chunk);
        self.push_bytes(&joined)
    }

    fn push_bytes(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        let mut consumed = 0;

        while consumed < chunk.len() {
            let rest = &chunk[consumed..];

            if matches!(self.state, Accumulator::Idle | Accumulator::AwaitingMetadata) {
                if header_incomplete(rest) {
                    if self.resync {
                        tracing::trace!("Dropping {} output bytes while resyncing", rest.len());
                    } else {
                        self.carry.extend_from_slice(rest);
                    }
                    consumed = chunk.len();
                    break;
                }
                match self.next_state(rest)? {
                    Boundary::Start(next) => {
                        self.resync = false;
                        self.state = next;
                    }
                    Boundary::Discard(reason) => {
                        tracing::trace!("Dropping {} output bytes: {}", rest.len(), reason);
                        self.resync = true;
                        consumed = chunk.len();
                        break;
                    }
                }
            }

            let region = match &mut self.state {
                Accumulator::FileType(r) | Accumulator::Metadata(r) | Accumulator::Fragment(r) => r,
                Accumulator::Idle | Accumulator::AwaitingMetadata => {
                    return Err(SegmenterError::Framing(format!(
                        "no region active at offset {}",
                        consumed
                    )));
                }
            };
            consumed += region.fill(rest)?;

            if region.is_complete() {
                if let Some(fragment) = self.complete_region()? {
                    fragments.push(fragment);
                }
            }
        }

        if consumed != chunk.len() {
            return Err(SegmenterError::Framing(format!(
                "consumed {} of {} bytes",
                consumed,
                chunk.len()
            )));
        }
        Ok(fragments)
    }

    /// Decide what starts at a box boundary, given the current state.
    fn next_state(&self, rest: &[u8]) -> Result<Boundary> {
        let header = BoxHeader::parse(rest);

        match (&self.state, header) {
            (Accumulator::Idle, Some(h)) if h.is(&FTYP) && self.init.is_none() => {
                tracing::debug!("ftyp box started ({} bytes)", h.size);
                Ok(Boundary::Start(Accumulator::FileType(Region::new(h.size)?)))
            }
            (Accumulator::AwaitingMetadata, Some(h)) if h.is(&MOOV) => {
                tracing::debug!("moov box started ({} bytes)", h.size);
                Ok(Boundary::Start(Accumulator::Metadata(Region::new(h.size)?)))
            }
            (Accumulator::AwaitingMetadata, other) => Err(SegmenterError::Framing(format!(
                "expected moov after ftyp, found {}",
                other
                    .map(|h| h.type_str())
                    .unwrap_or_else(|| "a malformed header".to_string())
            ))),
            (Accumulator::Idle, Some(h)) if h.is(&MOOF) => {
                if self.init.is_none() {
                    return Err(SegmenterError::Framing(
                        "moof box before the init boxes".to_string(),
                    ));
                }
                let mdat = usize::try_from(h.size)
                    .ok()
                    .and_then(|offset| rest.get(offset..))
                    .and_then(BoxHeader::parse)
                    .filter(|m| m.is(&MDAT));
                match mdat {
                    Some(m) => {
                        let total = h.size.checked_add(m.size).ok_or_else(|| {
                            SegmenterError::Framing("fragment size overflows".to_string())
                        })?;
                        tracing::trace!("fragment started: moof {} + mdat {} bytes", h.size, m.size);
                        Ok(Boundary::Start(Accumulator::Fragment(Region::new(total)?)))
                    }
                    None => {
                        tracing::warn!(
                            "moof box ({} bytes) without an mdat header in the same write, fragment dropped",
                            h.size
                        );
                        Ok(Boundary::Discard("moof without visible mdat"))
                    }
                }
            }
            (Accumulator::Idle, Some(h)) if h.is(&FTYP) => {
                tracing::warn!("Ignoring repeated ftyp box, init payload is already fixed");
                Ok(Boundary::Discard("repeated ftyp"))
            }
            (Accumulator::Idle, _) => Ok(Boundary::Discard("not a tracked box")),
            (state, _) => Err(SegmenterError::Framing(format!(
                "header lookup while {}",
                state.name()
            ))),
        }
    }

    /// Move on from a completed region. Returns the fragment if one completed.
    fn complete_region(&mut self) -> Result<Option<Fragment>> {
        match std::mem::replace(&mut self.state, Accumulator::Idle) {
            Accumulator::FileType(region) => {
                self.file_type = Some(Bytes::from(region.buf));
                self.state = Accumulator::AwaitingMetadata;
                Ok(None)
            }
            Accumulator::Metadata(region) => {
                let file_type = self.file_type.take().unwrap_or_default();
                let mut init = Vec::new();
                init.try_reserve_exact(file_type.len() + region.buf.len())
                    .map_err(|e| SegmenterError::Allocation(format!("init payload: {}", e)))?;
                init.extend_from_slice(&file_type);
                init.extend_from_slice(&region.buf);
                tracing::debug!("Init payload complete ({} bytes)", init.len());
                self.init = Some(Bytes::from(init));
                Ok(None)
            }
            Accumulator::Fragment(region) => {
                let init = self.init.clone().ok_or_else(|| {
                    SegmenterError::Framing("fragment completed without init payload".to_string())
                })?;
                Ok(Some(Fragment {
                    init,
                    data: Bytes::from(region.buf),
                }))
            }
            other => {
                let name = other.name();
                self.state = other;
                Err(SegmenterError::Framing(format!("no region to complete while {}", name)))
            }
        }
    }
}

/// True when `rest` ends before the box header starting at it does.
fn header_incomplete(rest: &[u8]) -> bool {
    match rest.get(0..4) {
        None => true,
        Some(size) => rest.len() < 8 || (size == &[0u8, 0, 0, 1][..] && rest.len() < 16),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    fn init_bytes() -> Vec<u8> {
        let mut out = boxed(b"ftyp", b"isom\0\0\x02\0isomiso6");
        out.extend(boxed(b"moov", &boxed(b"mvhd", &[7; 100])));
        out
    }

    fn fragment_bytes(fill: u8, len: usize) -> Vec<u8> {
        let mut out = boxed(b"moof", &boxed(b"mfhd", &[0, 0, 0, 0, 0, 0, 0, fill]));
        out.extend(boxed(b"mdat", &vec![fill; len]));
        out
    }

    fn push_in_chunks(r: &mut BoxReassembler, data: &[u8], chunk: usize) -> Vec<Fragment> {
        let mut out = Vec::new();
        for piece in data.chunks(chunk) {
            out.extend(r.push(piece).unwrap());
        }
        out
    }

    #[test]
    fn test_init_then_fragment_aligned() {
        let mut r = BoxReassembler::new();
        let ftyp = boxed(b"ftyp", b"isom");
        let moov = boxed(b"moov", &[1; 32]);
        assert!(r.push(&ftyp).unwrap().is_empty());
        assert_eq!(r.state_name(), "awaiting moov");
        assert!(r.push(&moov).unwrap().is_empty());
        assert_eq!(r.init().unwrap().len(), ftyp.len() + moov.len());

        let frag = fragment_bytes(3, 50);
        let out = r.push(&frag).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &frag[..]);
        assert_eq!(&out[0].init[..4 + 4], &ftyp[..8]);
        assert_eq!(r.state_name(), "idle");
    }

    #[test]
    fn test_init_boxes_in_one_chunk() {
        let mut r = BoxReassembler::new();
        let init = init_bytes();
        assert!(r.push(&init).unwrap().is_empty());
        assert_eq!(&r.init().unwrap()[..], &init[..]);
    }

    #[test]
    fn test_small_chunks_reassemble_same_bytes() {
        let init = init_bytes();
        // The first fragment chunk must carry the mdat header
        let frag = fragment_bytes(9, 300);

        let mut r = BoxReassembler::new();
        let out = push_in_chunks(&mut r, &init, 1);
        assert!(out.is_empty());
        let out = push_in_chunks(&mut r, &frag, 64);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &frag[..]);
        assert_eq!(&out[0].init[..], &init[..]);
    }

    #[test]
    fn test_two_fragments_in_one_chunk() {
        let mut r = BoxReassembler::new();
        r.push(&init_bytes()).unwrap();

        let mut both = fragment_bytes(1, 10);
        both.extend(fragment_bytes(2, 20));
        let out = r.push(&both).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.len(), fragment_bytes(1, 10).len());
        assert_eq!(out[1].data.len(), fragment_bytes(2, 20).len());
        // Both share the same init buffer
        assert_eq!(out[0].init, out[1].init);
    }

    #[test]
    fn test_large_size_mdat() {
        let mut r = BoxReassembler::new();
        r.push(&init_bytes()).unwrap();

        let moof = boxed(b"moof", &[0; 16]);
        let payload = vec![5u8; 40];
        let mut mdat = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        mdat.extend_from_slice(&((16 + payload.len()) as u64).to_be_bytes());
        mdat.extend_from_slice(&payload);

        let mut frag = moof.clone();
        frag.extend_from_slice(&mdat);
        let out = r.push(&frag).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), moof.len() + mdat.len());
    }

    #[test]
    fn test_trailing_bytes_while_idle_are_dropped() {
        let mut r = BoxReassembler::new();
        r.push(&init_bytes()).unwrap();
        let mfra = boxed(b"mfra", &[0; 24]);
        assert!(r.push(&mfra).unwrap().is_empty());
        assert_eq!(r.state_name(), "idle");
    }

    #[test]
    fn test_moof_without_visible_mdat_is_dropped() {
        let mut r = BoxReassembler::new();
        r.push(&init_bytes()).unwrap();
        let frag = fragment_bytes(4, 10);
        let moof_len = u32::from_be_bytes(frag[0..4].try_into().unwrap()) as usize;

        // moof alone, mdat header in the next write
        assert!(r.push(&frag[..moof_len]).unwrap().is_empty());
        assert!(r.push(&frag[moof_len..]).unwrap().is_empty());
        assert_eq!(r.state_name(), "idle");
    }

    #[test]
    fn test_tail_of_dropped_fragment_does_not_swallow_next() {
        let mut r = BoxReassembler::new();
        r.push(&init_bytes()).unwrap();

        // 100 byte moof, so its mdat header is not in the first write
        let mut dropped = boxed(b"moof", &[0; 92]);
        dropped.extend(boxed(b"mdat", &[1; 23]));
        assert_eq!(dropped.len(), 131);
        for piece in [&dropped[..64], &dropped[64..128], &dropped[128..]] {
            assert!(r.push(piece).unwrap().is_empty());
        }

        let frag = fragment_bytes(2, 10);
        let out = r.push(&frag).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &frag[..]);
    }

    #[test]
    fn test_non_moov_after_ftyp_is_framing_error() {
        let mut r = BoxReassembler::new();
        r.push(&boxed(b"ftyp", b"isom")).unwrap();
        let err = r.push(&boxed(b"free", &[0; 4])).unwrap_err();
        assert!(matches!(err, SegmenterError::Framing(_)));
    }

    #[test]
    fn test_malformed_header_after_ftyp_is_framing_error() {
        let mut r = BoxReassembler::new();
        r.push(&boxed(b"ftyp", b"isom")).unwrap();
        let err = r.push(&[0, 0, 0, 2, b'm', b'o', b'o', b'v']).unwrap_err();
        assert!(matches!(err, SegmenterError::Framing(_)));
    }

    #[test]
    fn test_moof_before_init_is_framing_error() {
        let mut r = BoxReassembler::new();
        let err = r.push(&fragment_bytes(1, 4)).unwrap_err();
        assert!(matches!(err, SegmenterError::Framing(_)));
    }

    #[test]
    fn test_repeated_ftyp_does_not_change_init() {
        let mut r = BoxReassembler::new();
        let init = init_bytes();
        r.push(&init).unwrap();
        r.push(&boxed(b"ftyp", b"other")).unwrap();
        assert_eq!(&r.init().unwrap()[..], &init[..]);
        assert_eq!(r.state_name(), "idle");
    }

    #[test]
    fn test_header_split_across_chunks() {
        let mut r = BoxReassembler::new();
        let init = init_bytes();
        let frag = fragment_bytes(6, 20);
        let mut stream = init.clone();
        stream.extend_from_slice(&frag);

        // ftyp header cut after 3 bytes, moov header cut in the next piece
        let cuts = [3, init.len() - 2, init.len() + 5];
        let mut out = Vec::new();
        let mut start = 0;
        for end in cuts.into_iter().chain([stream.len()]) {
            out.extend(r.push(&stream[start..end]).unwrap());
            start = end;
        }
        assert_eq!(&r.init().unwrap()[..], &init[..]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &frag[..]);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut r = BoxReassembler::new();
        assert!(r.push(&[]).unwrap().is_empty());
        assert_eq!(r.state_name(), "idle");
    }
}
