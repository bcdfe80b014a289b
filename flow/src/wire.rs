//! Cross-process bridge wire protocol (§6 "Wire protocol for cross-process
//! bridges"). Only the frame codec is implemented here; the socket transport
//! itself is out of scope per §1 and left to callers (or, in this crate, to
//! the in-process [`crate::testing`] bridge standing in for it).

/// The six frame kinds a cross-process bridge exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// A buffer payload.
    Buffer,
    /// A label.
    Label,
    /// A message.
    Message,
    /// A `DType` announcement (sent once per edge before the first buffer).
    DType,
    /// A packet header (chunk metadata plus its labels).
    PacketHeader,
    /// A packet's raw buffer payload.
    PacketPayload,
}

impl Tag {
    fn byte(self) -> u8 {
        match self {
            Tag::Buffer => b'B',
            Tag::Label => b'L',
            Tag::Message => b'M',
            Tag::DType => b'D',
            Tag::PacketHeader => b'H',
            Tag::PacketPayload => b'P',
        }
    }

    fn from_byte(b: u8) -> Option<Tag> {
        match b {
            b'B' => Some(Tag::Buffer),
            b'L' => Some(Tag::Label),
            b'M' => Some(Tag::Message),
            b'D' => Some(Tag::DType),
            b'H' => Some(Tag::PacketHeader),
            b'P' => Some(Tag::PacketPayload),
            _ => None,
        }
    }
}

/// Encodes a frame: a 16-bit tag, a 64-bit absolute index, then `payload` verbatim.
pub fn encode_frame(tag: Tag, index: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    out.extend_from_slice(&(tag.byte() as u16).to_be_bytes());
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes a frame produced by [`encode_frame`], returning the tag, index,
/// and a slice over the remaining payload bytes.
pub fn decode_frame(bytes: &[u8]) -> Option<(Tag, u64, &[u8])> {
    if bytes.len() < 10 {
        return None;
    }
    let tag_code = u16::from_be_bytes([bytes[0], bytes[1]]);
    let tag = Tag::from_byte(tag_code as u8)?;
    let index = u64::from_be_bytes(bytes[2..10].try_into().ok()?);
    Some((tag, index, &bytes[10..]))
}
