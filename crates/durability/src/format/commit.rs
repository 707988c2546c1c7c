//! Commit footer.
//!
//! Every commit ends with a footer. Recovery finds the newest footer whose
//! separator matches the header and whose seal holds.
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬──────────────────────────┐
//! │ Prior file length (8)│ Separator (16)   │ CRC32 or marker (4)      │
//! └──────────────────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! The CRC32 covers every byte from the prior file length up to, but not
//! including, the seal itself.

use super::header::{Separator, SEPARATOR_SIZE};
use byteorder::{BigEndian, ByteOrder};

/// Size of the seal in bytes.
pub const SEAL_SIZE: usize = 4;

/// Size of a commit footer in bytes.
pub const FOOTER_SIZE: usize = 8 + SEPARATOR_SIZE + SEAL_SIZE;

/// Seal value meaning "validity is proven by two ordered syncs".
pub const DOUBLE_SYNC_MARKER: u32 = 0x512C_512C;

/// How a commit proves it is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seal {
    /// CRC32 of the commit's bytes
    Checksum(u32),
    /// Body was synced before the footer was written
    DoubleSync,
}

impl Seal {
    /// Decode a raw seal.
    pub fn from_raw(raw: u32) -> Self {
        if raw == DOUBLE_SYNC_MARKER {
            Seal::DoubleSync
        } else {
            Seal::Checksum(raw)
        }
    }

    /// Encode to the raw on-disk value.
    pub fn to_raw(self) -> u32 {
        match self {
            Seal::Checksum(crc) => crc,
            Seal::DoubleSync => DOUBLE_SYNC_MARKER,
        }
    }
}

/// Commit footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitFooter {
    /// File length before this commit started writing
    pub prior_file_length: u64,

    /// Store separator
    pub separator: Separator,

    /// Completion proof
    pub seal: Seal,
}

impl CommitFooter {
    /// Serialize the part of the footer covered by the checksum.
    pub fn unsealed_bytes(prior_file_length: u64, separator: &Separator) -> [u8; 8 + SEPARATOR_SIZE] {
        let mut bytes = [0u8; 8 + SEPARATOR_SIZE];
        BigEndian::write_u64(&mut bytes[0..8], prior_file_length);
        bytes[8..].copy_from_slice(separator);
        bytes
    }

    /// Serialize footer to bytes.
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[..8 + SEPARATOR_SIZE]
            .copy_from_slice(&Self::unsealed_bytes(self.prior_file_length, &self.separator));
        BigEndian::write_u32(&mut bytes[8 + SEPARATOR_SIZE..], self.seal.to_raw());
        bytes
    }

    /// Deserialize footer from bytes.
    pub fn from_bytes(bytes: &[u8; FOOTER_SIZE]) -> Self {
        let mut separator = [0u8; SEPARATOR_SIZE];
        separator.copy_from_slice(&bytes[8..8 + SEPARATOR_SIZE]);
        CommitFooter {
            prior_file_length: BigEndian::read_u64(&bytes[0..8]),
            separator,
            seal: Seal::from_raw(BigEndian::read_u32(&bytes[8 + SEPARATOR_SIZE..])),
        }
    }
}
