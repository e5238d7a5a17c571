//! Wire frame codec.
//!
//! Frames are bencoded dictionaries `{v: version4, n: name1, a: args}`. `v` is
//! a one-byte frame-kind letter followed by major/minor/tiny version bytes;
//! only the kind letter and major byte are checked on decode. Bencode is the
//! wire's fixed shape, not a free implementation choice.

use bendy::decoding::{Decoder, Object};
use bendy::encoding::{AsString, Error as EncodeError, SingleItemEncoder, ToBencode};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

pub const BLOB_SEG_MTU: usize = 950;
pub const RELAY_MSG_MTU: usize = 950;
pub const BLOB_MTU: usize = 45_000;
pub const INDEX_HASH_COUNT: usize = 45;
pub const HASH_LEN: usize = 20;

const PROTOCOL_MAJOR: u8 = 1;
const PROTOCOL_MINOR: u8 = 0;
const PROTOCOL_TINY: u8 = 0;

/// A 20-byte content hash, URI, or segment-hash value — the three identifier
/// kinds in the data model share this representation.
pub type Hash20 = [u8; HASH_LEN];
pub type SegHash = Hash20;
pub type Uri = Hash20;
pub type PublicKey = [u8; 32];

/// Hash a byte string down to the 20-byte identifiers this protocol uses for
/// segment salts and relay message ids. There is no 20-byte hash primitive in
/// this crate's dependency stack, so it takes the first 20 bytes of SHA-256.
/// Documented as a deliberate choice in DESIGN.md rather than left implicit.
pub fn hash20(data: &[u8]) -> Hash20 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest[..HASH_LEN]);
    out
}

/// One of the four wire frame kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Segment { payload: Vec<u8> },
    Index { hashes: Vec<SegHash> },
    RelayUri { sender: PublicKey, uri: Uri, timestamp: i64 },
    RelayMsg { payload: Vec<u8> },
}

impl Frame {
    fn kind_letter(&self) -> u8 {
        match self {
            Frame::Segment { .. } => b'S',
            Frame::Index { .. } => b'I',
            Frame::RelayUri { .. } => b'U',
            Frame::RelayMsg { .. } => b'M',
        }
    }

    fn name_byte(&self) -> u8 {
        match self {
            Frame::Segment { .. } => b's',
            Frame::Index { .. } => b'i',
            Frame::RelayUri { .. } => b'u',
            Frame::RelayMsg { .. } => b'm',
        }
    }

    fn version_tag(&self) -> [u8; 4] {
        [self.kind_letter(), PROTOCOL_MAJOR, PROTOCOL_MINOR, PROTOCOL_TINY]
    }

    /// Encode to bencoded bytes. Encoding a well-formed `Frame` cannot fail.
    pub fn encode(&self) -> Vec<u8> {
        self.to_bencode().expect("frame encoding is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_frame(bytes)
    }
}

impl ToBencode for Frame {
    const MAX_DEPTH: usize = 3;

    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), EncodeError> {
        let version = self.version_tag();
        let name = [self.name_byte()];
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"a", ArgsEncoder(self))?;
            e.emit_pair(b"n", AsString(&name[..]))?;
            e.emit_pair(b"v", AsString(&version[..]))
        })
    }
}

struct ArgsEncoder<'a>(&'a Frame);

impl ToBencode for ArgsEncoder<'_> {
    const MAX_DEPTH: usize = 2;

    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), EncodeError> {
        match self.0 {
            Frame::Segment { payload } => {
                encoder.emit_dict(|mut e| e.emit_pair(b"v", AsString(payload)))
            }
            Frame::Index { hashes } => {
                let mut concatenated = Vec::with_capacity(hashes.len() * HASH_LEN);
                for hash in hashes {
                    concatenated.extend_from_slice(hash);
                }
                encoder.emit_dict(|mut e| e.emit_pair(b"h", AsString(&concatenated)))
            }
            Frame::RelayUri { sender, uri, timestamp } => encoder.emit_dict(|mut e| {
                e.emit_pair(b"s", AsString(&sender[..]))?;
                e.emit_pair(b"ts", *timestamp)?;
                e.emit_pair(b"u", AsString(&uri[..]))
            }),
            Frame::RelayMsg { payload } => {
                encoder.emit_dict(|mut e| e.emit_pair(b"m", AsString(payload)))
            }
        }
    }
}

/// A decoded dictionary value before we know which frame kind it belongs to.
/// `a` is parsed generically because it appears (alphabetically) before `n`
/// in the outer dict, so the decoder cannot know the expected shape yet.
enum ArgValue {
    Bytes(Vec<u8>),
    Int(i64),
}

fn decode_arg_value(object: Object<'_, '_>) -> Result<ArgValue, CodecError> {
    match object {
        Object::Bytes(b) => Ok(ArgValue::Bytes(b.to_vec())),
        Object::Integer(s) => s.parse::<i64>().map(ArgValue::Int).map_err(|_| CodecError::FormatError),
        _ => Err(CodecError::FormatError),
    }
}

fn decode_args_dict(object: Object<'_, '_>) -> Result<Vec<(Vec<u8>, ArgValue)>, CodecError> {
    let mut dict = match object {
        Object::Dict(d) => d,
        _ => return Err(CodecError::FormatError),
    };
    let mut out = Vec::new();
    while let Some((key, value)) = dict.next_pair().map_err(|_| CodecError::FormatError)? {
        out.push((key.to_vec(), decode_arg_value(value)?));
    }
    Ok(out)
}

fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let mut decoder = Decoder::new(bytes);
    let object = decoder
        .next_object()
        .map_err(|_| CodecError::FormatError)?
        .ok_or(CodecError::FormatError)?;

    let mut outer = match object {
        Object::Dict(d) => d,
        _ => return Err(CodecError::FormatError),
    };

    let mut args_raw: Option<Vec<(Vec<u8>, ArgValue)>> = None;
    let mut name_byte: Option<u8> = None;
    let mut version: Option<[u8; 4]> = None;

    while let Some((key, value)) = outer.next_pair().map_err(|_| CodecError::FormatError)? {
        match key {
            b"a" => args_raw = Some(decode_args_dict(value)?),
            b"n" => {
                let n = match value {
                    Object::Bytes(b) => b,
                    _ => return Err(CodecError::NameError),
                };
                if n.len() != 1 {
                    return Err(CodecError::NameError);
                }
                name_byte = Some(n[0]);
            }
            b"v" => {
                let v = match value {
                    Object::Bytes(b) => b,
                    _ => return Err(CodecError::VersionError),
                };
                if v.len() != 4 {
                    return Err(CodecError::VersionError);
                }
                let mut tag = [0u8; 4];
                tag.copy_from_slice(v);
                version = Some(tag);
            }
            _ => {}
        }
    }

    let version = version.ok_or(CodecError::VersionError)?;
    let name_byte = name_byte.ok_or(CodecError::NameError)?;
    let args_raw = args_raw.ok_or(CodecError::FormatError)?;

    let expected_kind = match name_byte {
        b's' => b'S',
        b'i' => b'I',
        b'u' => b'U',
        b'm' => b'M',
        _ => return Err(CodecError::NameError),
    };

    if version[0] != expected_kind || version[1] != PROTOCOL_MAJOR {
        return Err(CodecError::VersionMismatch);
    }

    let find = |key: &[u8]| args_raw.iter().find(|(k, _)| k.as_slice() == key).map(|(_, v)| v);

    match name_byte {
        b's' => {
            let payload = match find(b"v") {
                Some(ArgValue::Bytes(b)) if b.len() <= BLOB_SEG_MTU => b.clone(),
                _ => return Err(CodecError::FormatError),
            };
            Ok(Frame::Segment { payload })
        }
        b'i' => {
            let h = match find(b"h") {
                Some(ArgValue::Bytes(b)) if b.len() % HASH_LEN == 0 => b.clone(),
                _ => return Err(CodecError::FormatError),
            };
            let hashes = h
                .chunks(HASH_LEN)
                .map(|chunk| {
                    let mut hash = [0u8; HASH_LEN];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect();
            Ok(Frame::Index { hashes })
        }
        b'u' => {
            let sender = match find(b"s") {
                Some(ArgValue::Bytes(b)) if b.len() == 32 => {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(b);
                    key
                }
                _ => return Err(CodecError::FormatError),
            };
            let uri = match find(b"u") {
                Some(ArgValue::Bytes(b)) if b.len() == HASH_LEN => {
                    let mut uri = [0u8; HASH_LEN];
                    uri.copy_from_slice(b);
                    uri
                }
                _ => return Err(CodecError::FormatError),
            };
            let timestamp = match find(b"ts") {
                Some(ArgValue::Int(ts)) => *ts,
                _ => return Err(CodecError::FormatError),
            };
            Ok(Frame::RelayUri { sender, uri, timestamp })
        }
        b'm' => {
            let payload = match find(b"m") {
                Some(ArgValue::Bytes(b)) if b.len() <= RELAY_MSG_MTU => b.clone(),
                _ => return Err(CodecError::FormatError),
            };
            Ok(Frame::RelayMsg { payload })
        }
        _ => unreachable!("name byte already validated above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_roundtrip() {
        let frame = Frame::Segment { payload: vec![1, 2, 3, 4] };
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn index_roundtrip() {
        let frame = Frame::Index { hashes: vec![hash20(b"a"), hash20(b"b")] };
        let decoded = Frame::decode(&frame.encode()).expect("decode failed");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn relay_uri_roundtrip() {
        let frame = Frame::RelayUri { sender: [7u8; 32], uri: [9u8; HASH_LEN], timestamp: 42 };
        let decoded = Frame::decode(&frame.encode()).expect("decode failed");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn relay_msg_roundtrip() {
        let frame = Frame::RelayMsg { payload: b"hello".to_vec() };
        let decoded = Frame::decode(&frame.encode()).expect("decode failed");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn corrupted_version_byte_is_mismatch() {
        let frame = Frame::Segment { payload: vec![1] };
        let mut encoded = frame.encode();
        // Flip the kind letter inside the bencoded `v` value so it no longer
        // matches the decoded name's expected kind.
        let pos = encoded.windows(4).position(|w| w == b"4:S\x01\x00").unwrap();
        encoded[pos + 2] = b'I';
        let err = Frame::decode(&encoded).unwrap_err();
        assert_eq!(err, CodecError::VersionMismatch);
    }

    #[test]
    fn truncated_bytes_is_format_error() {
        let err = Frame::decode(b"not bencode").unwrap_err();
        assert_eq!(err, CodecError::FormatError);
    }

    #[test]
    fn empty_index_decodes_to_empty_hash_list() {
        let frame = Frame::Index { hashes: Vec::new() };
        let decoded = Frame::decode(&frame.encode()).expect("decode failed");
        assert_eq!(decoded, Frame::Index { hashes: Vec::new() });
    }
}
