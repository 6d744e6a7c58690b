//! Persisted hotkey store
//!
//! Only the logical bindings are stored, never registration IDs. Layout:
//!
//! ```text
//! magic "CCHK" | version u8 | crc32 u32 (LE, of body) | body
//! ```
//!
//! The body is DEFLATE compressed and holds a `u32` record count followed
//! by tagged records `tag u8 | len u32 | payload[len]`. Readers skip tags
//! they do not know, so record kinds can be added without a version bump.
//! A binding record payload is `modifiers u8 | key u32 | command (utf-8)`.
//! All integers are little endian.

use super::{Chord, HotkeyBinding, HotkeyCollection, KeyCode, Modifiers};
use crc::{Crc, CRC_32_ISO_HDLC};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use num_enum::TryFromPrimitive;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

const MAGIC_SIZE: usize = 4;
const MAGIC: &[u8; MAGIC_SIZE] = b"CCHK";
pub const VERSION: u8 = 1;
const HEADER_SIZE: usize = MAGIC_SIZE + 1 + std::mem::size_of::<u32>();

/// Bodies larger than this are rejected before decompression completes.
const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum RecordTag {
    Binding = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not a hotkey store")]
    BadMagic,
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u8),
    #[error("checksum mismatch")]
    Checksum,
    #[error("truncated store")]
    Truncated,
    #[error("invalid binding record: {0}")]
    InvalidRecord(&'static str),
    #[error(transparent)]
    IO(#[from] io::Error),
}

fn binding_payload(binding: &HotkeyBinding) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5 + binding.command.len());
    payload.push(binding.chord.modifiers.bits());
    payload.extend_from_slice(&binding.chord.key.0.to_le_bytes());
    payload.extend_from_slice(binding.command.as_bytes());
    payload
}

fn encode_body(collection: &HotkeyCollection) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(collection.len() as u32).to_le_bytes());
    for binding in &collection.bindings {
        let payload = binding_payload(binding);
        body.push(RecordTag::Binding as u8);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(&payload);
    }
    body
}

fn compress(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Serializes `collection` into the versioned store format.
pub fn encode(collection: &HotkeyCollection) -> Vec<u8> {
    // Compressing into a Vec cannot fail.
    let compressed = compress(&encode_body(collection)).unwrap_or_default();
    let crc = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(&compressed);
    let mut out = Vec::with_capacity(HEADER_SIZE + compressed.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&compressed);
    out
}

/// Cursor over the decompressed body.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], StoreError> {
        if self.data.len() < len {
            return Err(StoreError::Truncated);
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        // take() returned exactly 4 bytes.
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| StoreError::Truncated)?;
        Ok(u32::from_le_bytes(bytes))
    }
}

fn decode_binding(payload: &[u8]) -> Result<HotkeyBinding, StoreError> {
    let mut rd = Reader { data: payload };
    let modifiers = Modifiers::from_bits(rd.u8()?)
        .ok_or(StoreError::InvalidRecord("unknown modifier bits"))?;
    let key = KeyCode(rd.u32()?);
    let command = std::str::from_utf8(rd.data)
        .map_err(|_| StoreError::InvalidRecord("command is not utf-8"))?;
    Ok(HotkeyBinding::new(Chord::new(modifiers, key), command))
}

/// Parses data produced by `encode`.
pub fn decode(data: &[u8]) -> Result<HotkeyCollection, StoreError> {
    if data.len() < HEADER_SIZE {
        return Err(StoreError::Truncated);
    }
    if &data[..MAGIC_SIZE] != MAGIC {
        return Err(StoreError::BadMagic);
    }
    let version = data[MAGIC_SIZE];
    if version != VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }
    let crc_bytes: [u8; 4] = data[MAGIC_SIZE + 1..HEADER_SIZE]
        .try_into()
        .map_err(|_| StoreError::Truncated)?;
    let compressed = &data[HEADER_SIZE..];
    if u32::from_le_bytes(crc_bytes) != Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(compressed) {
        return Err(StoreError::Checksum);
    }

    let mut body = Vec::new();
    DeflateDecoder::new(compressed)
        .take(MAX_BODY_SIZE)
        .read_to_end(&mut body)?;

    let mut rd = Reader { data: &body };
    let count = rd.u32()?;
    let mut collection = HotkeyCollection::new();
    for _ in 0..count {
        let tag = rd.u8()?;
        let len = rd.u32()? as usize;
        let payload = rd.take(len)?;
        match RecordTag::try_from(tag) {
            Ok(RecordTag::Binding) => collection.bindings.push(decode_binding(payload)?),
            Err(_) => tracing::debug!(tag, "skipping unknown store record"),
        }
    }
    Ok(collection)
}

/// Reads the store at `path`. A missing or unreadable store yields an empty
/// collection; only the latter is logged.
pub fn load(path: &Path) -> HotkeyCollection {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return HotkeyCollection::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read hotkey store");
            return HotkeyCollection::new();
        }
    };
    match decode(&data) {
        Ok(collection) => collection,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "corrupt hotkey store, starting empty"
            );
            HotkeyCollection::new()
        }
    }
}

/// Writes `collection` to `path`, replacing it atomically where the
/// platform allows.
pub fn save(path: &Path, collection: &HotkeyCollection) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, encode(collection))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HotkeyCollection {
        HotkeyCollection {
            bindings: vec![
                HotkeyBinding::new("ctrl+alt+r".parse().unwrap(), "RESET"),
                HotkeyBinding::new("f7".parse().unwrap(), "read 0x10\tverbose"),
                HotkeyBinding::new("win+shift+0".parse().unwrap(), "łódź"),
            ],
        }
    }

    #[test]
    fn decode_restores_bindings_in_order() {
        let collection = sample();
        assert_eq!(decode(&encode(&collection)).unwrap(), collection);
        assert_eq!(decode(&encode(&HotkeyCollection::new())).unwrap().len(), 0);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode(&sample()), encode(&sample()));
    }

    #[test]
    fn header_is_checked() {
        let mut data = encode(&sample());
        assert!(matches!(decode(&data[..6]), Err(StoreError::Truncated)));

        data[MAGIC_SIZE] = VERSION + 1;
        assert!(matches!(
            decode(&data),
            Err(StoreError::UnsupportedVersion(v)) if v == VERSION + 1
        ));

        data[0] = b'X';
        assert!(matches!(decode(&data), Err(StoreError::BadMagic)));
    }

    #[test]
    fn flipped_body_bit_fails_checksum() {
        let mut data = encode(&sample());
        let last = data.len() - 1;
        data[last] ^= 0x40;
        assert!(matches!(decode(&data), Err(StoreError::Checksum)));
    }

    /// Builds a store around an uncompressed body, with a valid checksum.
    fn wrap(body: &[u8]) -> Vec<u8> {
        let compressed = compress(body).unwrap();
        let mut out = MAGIC.to_vec();
        out.push(VERSION);
        let crc = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(&compressed);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&compressed);
        out
    }

    #[test]
    fn unknown_records_are_skipped() {
        let binding = HotkeyBinding::new("f1".parse().unwrap(), "go");
        let payload = binding_payload(&binding);
        let mut body = 2u32.to_le_bytes().to_vec();
        body.push(0x7E);
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(b"new");
        body.push(RecordTag::Binding as u8);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(&payload);

        let collection = decode(&wrap(&body)).unwrap();
        assert_eq!(collection.bindings, vec![binding]);
    }

    #[test]
    fn short_body_is_truncated() {
        let mut body = 1u32.to_le_bytes().to_vec();
        body.push(RecordTag::Binding as u8);
        body.extend_from_slice(&10u32.to_le_bytes());
        body.extend_from_slice(&[0, 0x41]);
        assert!(matches!(decode(&wrap(&body)), Err(StoreError::Truncated)));
    }

    #[test]
    fn bad_modifier_bits_are_rejected() {
        let mut body = 1u32.to_le_bytes().to_vec();
        body.push(RecordTag::Binding as u8);
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(&[0x80, 0x41, 0, 0, 0]);
        assert!(matches!(
            decode(&wrap(&body)),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn load_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.dat");
        assert!(load(&missing).is_empty());

        let corrupt = dir.path().join("corrupt.dat");
        fs::write(&corrupt, b"garbage that is not a store").unwrap();
        assert!(load(&corrupt).is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.dat");
        save(&path, &sample()).unwrap();
        assert_eq!(load(&path), sample());

        save(&path, &HotkeyCollection::new()).unwrap();
        assert!(load(&path).is_empty());
    }
}
