//! ISOBMFF (MP4) box header parsing and box-tree traversal.

/// Box type codes the segmenter reacts to.
pub const FTYP: [u8; 4] = *b"ftyp";
pub const MOOV: [u8; 4] = *b"moov";
pub const MOOF: [u8; 4] = *b"moof";
pub const MDAT: [u8; 4] = *b"mdat";

/// Parsed box header: total box size (header included) and type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub size: u64,
    pub box_type: [u8; 4],
    /// 8 for a compact header, 16 when a 64-bit large size follows the type.
    pub header_len: usize,
}

impl BoxHeader {
    /// Parse a box header from the start of `data`.
    ///
    /// Returns `None` when there are not enough bytes, when the size field is
    /// 0 ("extends to end of file", which a live stream cannot have), or when
    /// the size is smaller than the header itself.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let box_type = [data[4], data[5], data[6], data[7]];

        let (size, header_len) = match size {
            0 => return None,
            1 => {
                let large: [u8; 8] = data.get(8..16)?.try_into().ok()?;
                (u64::from_be_bytes(large), 16)
            }
            n => (n, 8),
        };
        if size < header_len as u64 {
            return None;
        }

        Some(Self {
            size,
            box_type,
            header_len,
        })
    }

    pub fn is(&self, box_type: &[u8; 4]) -> bool {
        &self.box_type == box_type
    }

    /// Printable type code for logs.
    pub fn type_str(&self) -> String {
        String::from_utf8_lossy(&self.box_type).into_owned()
    }
}

/// Walk all top-level boxes in a buffer, and recursively traverse specified container boxes.
/// `callback` is invoked for EVERY box in pre-order traversal with the box
/// type, its payload and its nesting depth.
///
/// Returns the number of trailing bytes that did not form a complete box
/// (0 for well-formed input).
pub fn walk_boxes<'a, F>(data: &'a [u8], containers: &[&[u8; 4]], callback: &mut F) -> usize
where
    F: FnMut(&[u8; 4], &'a [u8], usize),
{
    walk_at_depth(data, containers, callback, 0)
}

fn walk_at_depth<'a, F>(
    data: &'a [u8],
    containers: &[&[u8; 4]],
    callback: &mut F,
    depth: usize,
) -> usize
where
    F: FnMut(&[u8; 4], &'a [u8], usize),
{
    let mut pos = 0;
    while pos < data.len() {
        let Some(header) = BoxHeader::parse(&data[pos..]) else {
            break;
        };
        let Ok(size) = usize::try_from(header.size) else {
            break;
        };
        if pos + size > data.len() {
            break;
        }
        let payload = &data[pos + header.header_len..pos + size];

        callback(&header.box_type, payload, depth);

        if containers.contains(&&header.box_type) {
            walk_at_depth(payload, containers, callback, depth + 1);
        }

        pos += size;
    }
    data.len() - pos
}
