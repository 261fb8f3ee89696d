//! WAL record types and framing
//!
//! Each record on disk:
//! - Record Length (u32 LE), total length including this field and the checksum
//! - Record Type (u8): PUT / DELETE / COMMIT
//! - Sequence Number (u64 LE), starts at 1 after every truncation
//! - Commit Version (u64 LE)
//! - Payload (variable)
//! - Checksum (u32 LE), CRC32 over every preceding byte of the record
//!
//! A commit is written as its mutation records followed by one COMMIT
//! record carrying the same version. Mutations without a durable COMMIT
//! record never become visible.

use std::io::{self, Cursor, Read};

use crate::content::{ContentAddress, CONTENT_ADDRESS_LEN};
use crate::mvcc::Version;
use crate::wal::checksum::compute_checksum;

/// Fixed bytes of every record: length, type, sequence, version, checksum
pub const RECORD_OVERHEAD: usize = 4 + 1 + 8 + 8 + 4;

/// Largest key plus value a PUT record can frame under its u32 length
pub const MAX_ENTRY_BYTES: usize =
    u32::MAX as usize - RECORD_OVERHEAD - 4 - CONTENT_ADDRESS_LEN - 4;

/// WAL record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Key bound to a value
    Put = 1,
    /// Key tombstoned
    Delete = 2,
    /// Closes the group of mutation records of one commit
    Commit = 3,
}

impl RecordType {
    /// Convert from u8, returns None for invalid values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Put),
            2 => Some(RecordType::Delete),
            3 => Some(RecordType::Commit),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Operation carried by a record.
///
/// Put records carry the value inline together with its content address so
/// that replay can rebuild the content store and verify every blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOperation {
    Put {
        key: Vec<u8>,
        address: ContentAddress,
        value: Vec<u8>,
    },
    Delete {
        key: Vec<u8>,
    },
    Commit {
        /// Number of mutation records preceding this marker
        write_count: u32,
    },
}

impl WalOperation {
    /// Record type tag for this operation
    pub fn record_type(&self) -> RecordType {
        match self {
            WalOperation::Put { .. } => RecordType::Put,
            WalOperation::Delete { .. } => RecordType::Delete,
            WalOperation::Commit { .. } => RecordType::Commit,
        }
    }

    /// Key touched by a mutation record
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            WalOperation::Put { key, .. } | WalOperation::Delete { key } => Some(key),
            WalOperation::Commit { .. } => None,
        }
    }

    fn write_payload(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            WalOperation::Put {
                key,
                address,
                value,
            } => {
                buf.extend_from_slice(&length_prefix(key.len())?);
                buf.extend_from_slice(key);
                buf.extend_from_slice(address.as_bytes());
                buf.extend_from_slice(&length_prefix(value.len())?);
                buf.extend_from_slice(value);
            }
            WalOperation::Delete { key } => {
                buf.extend_from_slice(&length_prefix(key.len())?);
                buf.extend_from_slice(key);
            }
            WalOperation::Commit { write_count } => {
                buf.extend_from_slice(&write_count.to_le_bytes());
            }
        }
        Ok(())
    }

    fn read_payload(record_type: RecordType, payload: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(payload);
        let operation = match record_type {
            RecordType::Put => {
                let key = read_bytes(&mut cursor)?;
                let mut address = [0u8; CONTENT_ADDRESS_LEN];
                cursor.read_exact(&mut address)?;
                let value = read_bytes(&mut cursor)?;
                WalOperation::Put {
                    key,
                    address: ContentAddress::from_bytes(address),
                    value,
                }
            }
            RecordType::Delete => WalOperation::Delete {
                key: read_bytes(&mut cursor)?,
            },
            RecordType::Commit => {
                let mut count = [0u8; 4];
                cursor.read_exact(&mut count)?;
                WalOperation::Commit {
                    write_count: u32::from_le_bytes(count),
                }
            }
        };

        if cursor.position() as usize != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "trailing bytes in record payload",
            ));
        }
        Ok(operation)
    }
}

/// u32 LE length field; lengths past `u32::MAX` fail with `InvalidInput`
pub(crate) fn length_prefix(len: usize) -> io::Result<[u8; 4]> {
    u32::try_from(len).map(u32::to_le_bytes).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {} does not fit a u32 length field", len),
        )
    })
}

/// Frame one record into `buf` without taking ownership of the operation.
///
/// On error `buf` is restored to its length before the call.
pub(crate) fn encode_record(
    sequence_number: u64,
    version: Version,
    operation: &WalOperation,
    buf: &mut Vec<u8>,
) -> io::Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(operation.record_type().as_u8());
    buf.extend_from_slice(&sequence_number.to_le_bytes());
    buf.extend_from_slice(&version.value().to_le_bytes());

    let framed = operation
        .write_payload(buf)
        .and_then(|()| length_prefix(buf.len() - start + 4));
    let record_length = match framed {
        Ok(bytes) => bytes,
        Err(e) => {
            buf.truncate(start);
            return Err(e);
        }
    };
    buf[start..start + 4].copy_from_slice(&record_length);

    let checksum = compute_checksum(&buf[start..]);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Complete WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Position in the log, starting at 1
    pub sequence_number: u64,
    /// Commit version the record belongs to
    pub version: Version,
    pub operation: WalOperation,
}

impl WalRecord {
    /// Create a new WAL record
    pub fn new(sequence_number: u64, version: Version, operation: WalOperation) -> Self {
        Self {
            sequence_number,
            version,
            operation,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.operation.record_type()
    }

    /// Returns true for the marker closing a commit
    pub fn is_commit_marker(&self) -> bool {
        matches!(self.operation, WalOperation::Commit { .. })
    }

    /// Append the framed record to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        encode_record(self.sequence_number, self.version, &self.operation, buf)
    }

    /// Serialize the complete record to bytes
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Deserialize a record from bytes, verifying checksum
    ///
    /// Returns the record and the number of bytes consumed. A short buffer
    /// fails with `UnexpectedEof`; a bad length, checksum, type or payload
    /// fails with `InvalidData`.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "record length prefix truncated",
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < RECORD_OVERHEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid record length: {}", record_length),
            ));
        }

        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = compute_checksum(&data[..checksum_offset]);
        if stored != computed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "checksum mismatch: stored {:#010x}, computed {:#010x}",
                    stored, computed
                ),
            ));
        }

        let record_type = RecordType::from_u8(data[4]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid record type: {}", data[4]),
            )
        })?;

        let mut word = [0u8; 8];
        word.copy_from_slice(&data[5..13]);
        let sequence_number = u64::from_le_bytes(word);
        word.copy_from_slice(&data[13..21]);
        let version = Version::new(u64::from_le_bytes(word));

        let operation = WalOperation::read_payload(record_type, &data[21..checksum_offset])?;

        Ok((
            Self {
                sequence_number,
                version,
                operation,
            },
            record_length,
        ))
    }
}
