//! Snapshot file format
//!
//! A snapshot holds every retained version chain and every blob they
//! reference, as of one checkpoint version. All integers little endian.
//!
//! - Magic `AKVSNAP1` (8 bytes)
//! - Format version (u32)
//! - Checkpoint version (u64)
//! - Blob count (u64), then per blob: address (32), length (u32), bytes
//! - Key count (u64), then per key: key length (u32), key, entry count
//!   (u32), then per entry: version (u64), tag (u8: 0 tombstone, 1 value),
//!   address (32) for values
//! - CRC32 (u32) over every preceding byte

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use super::errors::{CheckpointError, CheckpointResult};
use crate::content::{ContentAddress, CONTENT_ADDRESS_LEN};
use crate::mvcc::{IndexEntry, Version, VersionChain, VersionedValue};
use crate::wal::compute_checksum;

pub const SNAPSHOT_MAGIC: &[u8; 8] = b"AKVSNAP1";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const TAG_TOMBSTONE: u8 = 0;
const TAG_VALUE: u8 = 1;

/// File name of the snapshot for `version`
pub fn snapshot_file_name(version: Version) -> String {
    format!("snapshot-{}.dat", version.value())
}

/// Decoded snapshot contents
#[derive(Debug, Default)]
pub struct LoadedSnapshot {
    pub version: Version,
    pub blobs: Vec<(ContentAddress, Vec<u8>)>,
    pub chains: Vec<(Vec<u8>, VersionChain)>,
}

/// Serializes one snapshot. `chains` must be in ascending key order.
///
/// Fails with `AERO_CHECKPOINT_FAILED` if a blob, key or chain is too long
/// for its u32 length field.
pub fn encode_snapshot<I>(
    version: Version,
    blobs: &[(ContentAddress, Arc<[u8]>)],
    chains: I,
) -> CheckpointResult<Vec<u8>>
where
    I: IntoIterator<Item = (Vec<u8>, Arc<VersionChain>)>,
{
    let mut buf = Vec::new();
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&version.value().to_le_bytes());

    buf.extend_from_slice(&(blobs.len() as u64).to_le_bytes());
    for (address, bytes) in blobs {
        buf.extend_from_slice(address.as_bytes());
        buf.extend_from_slice(&length_field("blob", bytes.len())?);
        buf.extend_from_slice(bytes);
    }

    let count_offset = buf.len();
    buf.extend_from_slice(&0u64.to_le_bytes());
    let mut key_count = 0u64;
    for (key, chain) in chains {
        buf.extend_from_slice(&length_field("key", key.len())?);
        buf.extend_from_slice(&key);
        buf.extend_from_slice(&length_field("version chain", chain.len())?);
        for entry in chain.entries() {
            buf.extend_from_slice(&entry.version.value().to_le_bytes());
            match entry.value {
                VersionedValue::Tombstone => buf.push(TAG_TOMBSTONE),
                VersionedValue::Value(address) => {
                    buf.push(TAG_VALUE);
                    buf.extend_from_slice(address.as_bytes());
                }
            }
        }
        key_count += 1;
    }
    buf[count_offset..count_offset + 8].copy_from_slice(&key_count.to_le_bytes());

    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

fn length_field(what: &str, len: usize) -> CheckpointResult<[u8; 4]> {
    u32::try_from(len).map(u32::to_le_bytes).map_err(|_| {
        CheckpointError::failed(format!(
            "{} length {} does not fit a u32 length field",
            what, len
        ))
    })
}

/// Parses and validates a snapshot image.
///
/// Fails with `AERO_CHECKPOINT_CORRUPT` on a bad magic, format version or
/// checksum, on truncation, on keys out of order and on chains whose
/// versions do not ascend or exceed the snapshot version.
pub fn decode_snapshot(data: &[u8]) -> CheckpointResult<LoadedSnapshot> {
    if data.len() < SNAPSHOT_MAGIC.len() + 4 + 8 + 4 {
        return Err(CheckpointError::corrupt("snapshot file truncated"));
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = compute_checksum(body);
    if stored != computed {
        return Err(CheckpointError::corrupt(format!(
            "snapshot checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored, computed
        )));
    }

    let mut cursor = Cursor::new(body);
    let mut magic = [0u8; 8];
    read_exact(&mut cursor, &mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(CheckpointError::corrupt("bad snapshot magic"));
    }
    let format = read_u32(&mut cursor)?;
    if format != SNAPSHOT_FORMAT_VERSION {
        return Err(CheckpointError::corrupt(format!(
            "unsupported snapshot format version {}",
            format
        )));
    }
    let version = Version::new(read_u64(&mut cursor)?);

    let blob_count = read_u64(&mut cursor)?;
    let mut blobs = Vec::new();
    for _ in 0..blob_count {
        let address = read_address(&mut cursor)?;
        let bytes = read_bytes(&mut cursor)?;
        blobs.push((address, bytes));
    }

    let key_count = read_u64(&mut cursor)?;
    let mut chains: Vec<(Vec<u8>, VersionChain)> = Vec::new();
    for _ in 0..key_count {
        let key = read_bytes(&mut cursor)?;
        if chains.last().is_some_and(|(prev, _)| prev >= &key) {
            return Err(CheckpointError::corrupt("snapshot keys out of order"));
        }

        let entry_count = read_u32(&mut cursor)?;
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let entry_version = Version::new(read_u64(&mut cursor)?);
            if entry_version > version {
                return Err(CheckpointError::corrupt(format!(
                    "entry version {} beyond snapshot version {}",
                    entry_version, version
                )));
            }
            let mut tag = [0u8; 1];
            read_exact(&mut cursor, &mut tag)?;
            let entry = match tag[0] {
                TAG_TOMBSTONE => IndexEntry::tombstone(entry_version),
                TAG_VALUE => IndexEntry::value(entry_version, read_address(&mut cursor)?),
                other => {
                    return Err(CheckpointError::corrupt(format!(
                        "invalid entry tag {}",
                        other
                    )))
                }
            };
            entries.push(entry);
        }

        let chain = VersionChain::from_entries(entries).ok_or_else(|| {
            CheckpointError::corrupt("snapshot chain versions do not ascend")
        })?;
        chains.push((key, chain));
    }

    if cursor.position() as usize != body.len() {
        return Err(CheckpointError::corrupt("trailing bytes in snapshot"));
    }

    Ok(LoadedSnapshot {
        version,
        blobs,
        chains,
    })
}

/// Reads and decodes `path`, also returning the CRC32 of the whole file.
pub fn read_snapshot(path: &Path) -> CheckpointResult<(LoadedSnapshot, u32)> {
    let data = std::fs::read(path).map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to read snapshot file: {}", path.display()),
            e,
        )
    })?;
    let file_checksum = compute_checksum(&data);
    Ok((decode_snapshot(&data)?, file_checksum))
}

fn truncated(e: io::Error) -> CheckpointError {
    CheckpointError::corrupt(format!("snapshot truncated: {}", e))
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> CheckpointResult<()> {
    cursor.read_exact(buf).map_err(truncated)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> CheckpointResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(cursor, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> CheckpointResult<u64> {
    let mut buf = [0u8; 8];
    read_exact(cursor, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_address(cursor: &mut Cursor<&[u8]>) -> CheckpointResult<ContentAddress> {
    let mut buf = [0u8; CONTENT_ADDRESS_LEN];
    read_exact(cursor, &mut buf)?;
    Ok(ContentAddress::from_bytes(buf))
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> CheckpointResult<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(CheckpointError::corrupt(format!(
            "snapshot truncated: field of {} bytes, {} remaining",
            len, remaining
        )));
    }
    let mut buf = vec![0u8; len];
    read_exact(cursor, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointErrorCode;

    fn sample() -> Vec<u8> {
        let a = ContentAddress::of(b"alice");
        let b = ContentAddress::of(b"bob");
        let blobs: Vec<(ContentAddress, Arc<[u8]>)> = vec![
            (a, Arc::from(&b"alice"[..])),
            (b, Arc::from(&b"bob"[..])),
        ];

        let mut first = VersionChain::new();
        first.push(IndexEntry::value(Version::new(1), a));
        first.push(IndexEntry::value(Version::new(3), b));
        let mut second = VersionChain::new();
        second.push(IndexEntry::value(Version::new(2), b));
        second.push(IndexEntry::tombstone(Version::new(4)));

        encode_snapshot(
            Version::new(4),
            &blobs,
            vec![
                (b"user:1".to_vec(), Arc::new(first)),
                (b"user:2".to_vec(), Arc::new(second)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_starts_with_magic() {
        assert_eq!(&sample()[..8], SNAPSHOT_MAGIC);
    }

    #[test]
    fn test_decode_restores_chains_and_blobs() {
        let loaded = decode_snapshot(&sample()).unwrap();

        assert_eq!(loaded.version, Version::new(4));
        assert_eq!(loaded.blobs.len(), 2);
        assert_eq!(loaded.chains.len(), 2);
        assert_eq!(loaded.chains[0].0, b"user:1".to_vec());
        assert_eq!(loaded.chains[0].1.len(), 2);
        assert!(loaded.chains[1].1.latest().unwrap().is_tombstone());
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode_snapshot(Version::ZERO, &[], Vec::new()).unwrap();
        let loaded = decode_snapshot(&bytes).unwrap();
        assert!(loaded.blobs.is_empty());
        assert!(loaded.chains.is_empty());
    }

    #[test]
    fn test_bit_flip_is_corrupt() {
        let mut bytes = sample();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;

        let err = decode_snapshot(&bytes).unwrap_err();
        assert_eq!(err.code(), CheckpointErrorCode::AeroCheckpointCorrupt);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = sample();
        for cut in [0, 7, 20, bytes.len() - 1] {
            let err = decode_snapshot(&bytes[..cut]).unwrap_err();
            assert_eq!(err.code(), CheckpointErrorCode::AeroCheckpointCorrupt);
        }
    }

    #[test]
    fn test_entry_newer_than_snapshot_is_corrupt() {
        let mut chain = VersionChain::new();
        chain.push(IndexEntry::tombstone(Version::new(9)));
        let bytes =
            encode_snapshot(Version::new(2), &[], vec![(b"k".to_vec(), Arc::new(chain))]).unwrap();

        assert!(decode_snapshot(&bytes).is_err());
    }

    #[test]
    fn test_length_field_rejects_past_u32() {
        assert_eq!(length_field("key", 3).unwrap(), 3u32.to_le_bytes());
        let err = length_field("blob", u32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.code(), CheckpointErrorCode::AeroCheckpointFailed);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(snapshot_file_name(Version::new(17)), "snapshot-17.dat");
    }
}
