//! On-disk framing shared by the index and metadata blobs.
//!
//! A blob is a `bincode` payload followed by the 32-byte `blake3` digest of that payload.
//! The payload is an envelope carrying a four-byte magic tag and a format version in front
//! of the actual body, so a metadata file handed to the index loader (or the other way
//! round) is rejected instead of being misread.
//!
//! Writes go through [`stage`], which fills a temporary file next to the destination;
//! the caller decides when to [`commit`] it. That lets the catalog put both files in place
//! only after both were written.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs,
    io::{self, Write},
    path::Path,
};
use tempfile::NamedTempFile;

pub(crate) const FORMAT_VERSION: u16 = 1;
const DIGEST_LEN: usize = blake3::OUT_LEN;

#[derive(Serialize, Deserialize)]
struct Envelope<B> {
    magic: [u8; 4],
    version: u16,
    body: B,
}

/// Encode `body` under `magic` and append its digest.
pub(crate) fn encode<T: Serialize>(magic: [u8; 4], body: &T) -> Result<Vec<u8>, String> {
    let envelope = Envelope {
        magic,
        version: FORMAT_VERSION,
        body,
    };
    let mut bytes = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
        .map_err(|e| e.to_string())?;
    let digest = blake3::hash(&bytes);
    bytes.extend_from_slice(digest.as_bytes());
    Ok(bytes)
}

/// Verify and decode a blob produced by [`encode`]. The error is a human-readable reason.
pub(crate) fn decode<T: DeserializeOwned>(magic: [u8; 4], bytes: &[u8]) -> Result<T, String> {
    if bytes.len() < DIGEST_LEN {
        return Err(format!("blob is only {} bytes long", bytes.len()));
    }
    let (payload, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if blake3::hash(payload).as_bytes() != digest {
        return Err("checksum mismatch".to_string());
    }

    let (envelope, read): (Envelope<T>, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| e.to_string())?;
    if read != payload.len() {
        return Err(format!("{} trailing bytes", payload.len() - read));
    }
    if envelope.magic != magic {
        return Err(format!(
            "unexpected magic {:?}, expected {:?}",
            String::from_utf8_lossy(&envelope.magic),
            String::from_utf8_lossy(&magic)
        ));
    }
    if envelope.version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", envelope.version));
    }
    Ok(envelope.body)
}

/// Write `bytes` to a temporary file in the directory of `path`.
pub(crate) fn stage(path: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Move a staged file over `path`.
pub(crate) fn commit(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = *b"TEST";

    #[test]
    fn test_decode_rejects_flipped_byte() {
        let mut bytes = encode(MAGIC, &vec![1u32, 2, 3]).unwrap();
        bytes[0] ^= 0xff;
        let err = decode::<Vec<u32>>(MAGIC, &bytes).unwrap_err();
        assert_eq!(err, "checksum mismatch");
    }

    #[test]
    fn test_decode_rejects_wrong_magic() {
        let bytes = encode(*b"AAAA", &"hello".to_string()).unwrap();
        let err = decode::<String>(*b"BBBB", &bytes).unwrap_err();
        assert!(err.contains("magic"), "{err}");
    }

    #[test]
    fn test_decode_rejects_short_blob() {
        assert!(decode::<String>(MAGIC, b"tiny").is_err());
    }

    #[test]
    fn test_stage_then_commit_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"old").unwrap();

        let tmp = stage(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old");
        commit(tmp, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}
