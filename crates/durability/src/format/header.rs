//! Store file header.
//!
//! ```text
//! ┌──────────────────┬─────────────────────┬──────────────────┐
//! │ Magic (8 bytes)  │ First version (8)   │ Separator (16)   │
//! └──────────────────┴─────────────────────┴──────────────────┘
//! ```

use byteorder::{BigEndian, ByteOrder};
use k2v_core::{Error, Result};

/// Magic number: `\x89irT\r\n\x1A\n`.
pub const MAGIC: u64 = 0x8969_7254_0D0A_1A0A;

/// Size of the commit separator in bytes.
pub const SEPARATOR_SIZE: usize = 16;

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 8 + 8 + SEPARATOR_SIZE;

/// Per-store random pattern repeated in every commit footer.
pub type Separator = [u8; SEPARATOR_SIZE];

/// Store file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Version number the store started from
    pub first_version: u64,

    /// Random pattern identifying this store's commit footers
    pub separator: Separator,
}

impl FileHeader {
    /// Create a new header.
    pub fn new(first_version: u64, separator: Separator) -> Self {
        FileHeader {
            first_version,
            separator,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        BigEndian::write_u64(&mut bytes[0..8], MAGIC);
        BigEndian::write_u64(&mut bytes[8..16], self.first_version);
        bytes[16..].copy_from_slice(&self.separator);
        bytes
    }

    /// Deserialize header from bytes, checking the magic number.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let magic = BigEndian::read_u64(&bytes[0..8]);
        if magic != MAGIC {
            return Err(Error::format(format!("bad magic number {magic:#018x}")));
        }
        let mut separator = [0u8; SEPARATOR_SIZE];
        separator.copy_from_slice(&bytes[16..HEADER_SIZE]);
        Ok(FileHeader {
            first_version: BigEndian::read_u64(&bytes[8..16]),
            separator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::new(1_300_000_000_000, [0xAB; SEPARATOR_SIZE]);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], b"\x89irT\r\n\x1a\n");
        assert_eq!(FileHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut bytes = FileHeader::new(1, [0; SEPARATOR_SIZE]).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::from_bytes(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_header_too_short() {
        let bytes = FileHeader::new(1, [0; SEPARATOR_SIZE]).to_bytes();
        assert!(FileHeader::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
    }
}
