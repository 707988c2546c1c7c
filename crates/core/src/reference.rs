//! Tagged record references.
//!
//! A reference is a `u64` whose high two bytes are a type code and whose low
//! six bytes are normally the file position of the *end* of the referenced
//! record, so records are read backward from their reference.
//!
//! Almost all type codes are negative when read as `i16`, so code that forgets
//! to strip the type code before using a reference as an offset fails loudly
//! instead of reading the wrong bytes.
//!
//! # Type code space
//!
//! ```text
//! 0xFF01..=0xFFFF  Map, arity = low byte + 1 (2..=256)
//! 0xFF00           Null
//! 0xFE00..=0xFEFF  Run, length = low byte + 1 (1..=256)
//! 0xFDFF           Leaf
//! 0xFDFE           Folder
//! 0xFDFD           Document with an 8-byte length trailer
//! 0x0007..=0xFDFC  small Document, the code is the length
//! 0x0000..=0x0006  micro Document, the bytes live in the data field
//! ```
//!
//! Every 16-bit value falls in exactly one of these ranges.

use std::fmt;

/// The 16-bit type half of a [`Reference`].
pub type TypeCode = u16;

/// Bits used by the type code.
pub const TYPE_BITS: u32 = 16;
/// Bits used by the data field.
pub const DATA_BITS: u32 = 64 - TYPE_BITS;
/// Bytes available in the data field.
pub const DATA_BYTES: usize = (DATA_BITS / 8) as usize;
/// Mask selecting the data field.
pub const DATA_MASK: u64 = (1u64 << DATA_BITS) - 1;
/// Largest addressable file offset.
pub const MAX_ADDRESS: u64 = DATA_MASK;

const MAP_MAJOR: u16 = 0xFF;
const RUN_MAJOR: u16 = 0xFE;

/// Type code of the Null sentinel.
pub const NULL_TYPE: TypeCode = MAP_MAJOR << 8;
/// Type code of a Leaf record.
pub const LEAF_TYPE: TypeCode = (RUN_MAJOR << 8) - 1;
/// Type code of a Folder record.
pub const FOLDER_TYPE: TypeCode = LEAF_TYPE - 1;
/// Type code of a Document carrying an explicit length trailer.
pub const DOCUMENT_TYPE: TypeCode = FOLDER_TYPE - 1;

/// Largest Map arity.
pub const MAP_MAX_ARITY: usize = 1 << 8;
/// Longest Run literal.
pub const RUN_MAX_LENGTH: usize = 1 << 8;
/// Largest document embedded in the reference itself.
pub const MICRO_DOCUMENT_MAX: usize = DATA_BYTES;
/// Largest document whose length is carried by the type code.
pub const SMALL_DOCUMENT_MAX: usize = (DOCUMENT_TYPE - 1) as usize;

/// Type code for a Map of `arity` children.
pub fn map_type(arity: usize) -> TypeCode {
    assert!(
        (2..=MAP_MAX_ARITY).contains(&arity),
        "map arity out of range: {arity}"
    );
    (MAP_MAJOR << 8) | (arity - 1) as u16
}

/// Type code for a Run of `length` literal bytes.
pub fn run_type(length: usize) -> TypeCode {
    assert!(
        (1..=RUN_MAX_LENGTH).contains(&length),
        "run length out of range: {length}"
    );
    (RUN_MAJOR << 8) | (length - 1) as u16
}

/// Type code for a small document of `length` bytes.
pub fn small_document_type(length: usize) -> TypeCode {
    assert!(
        length > MICRO_DOCUMENT_MAX && length <= SMALL_DOCUMENT_MAX,
        "small document length out of range: {length}"
    );
    length as u16
}

/// What a type code denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// No value on this path
    Null,
    /// Branch on the next key byte
    Map {
        /// Number of children (2..=256)
        arity: usize,
    },
    /// Literal key segment
    Run {
        /// Literal length (1..=256)
        length: usize,
    },
    /// Splits the value at a key from values below it
    Leaf,
    /// Nested folder record
    Folder,
    /// Document with a length trailer
    Document,
    /// Document whose length is the type code
    SmallDocument {
        /// Document length
        length: usize,
    },
    /// Document stored inside the reference
    MicroDocument {
        /// Document length (0..=6)
        length: usize,
    },
}

impl Kind {
    /// Classify a type code.
    pub fn of(ty: TypeCode) -> Kind {
        match ty {
            NULL_TYPE => Kind::Null,
            LEAF_TYPE => Kind::Leaf,
            FOLDER_TYPE => Kind::Folder,
            DOCUMENT_TYPE => Kind::Document,
            _ if ty >> 8 == MAP_MAJOR => Kind::Map {
                arity: (ty & 0xFF) as usize + 1,
            },
            _ if ty >> 8 == RUN_MAJOR => Kind::Run {
                length: (ty & 0xFF) as usize + 1,
            },
            _ if (ty as usize) <= MICRO_DOCUMENT_MAX => Kind::MicroDocument {
                length: ty as usize,
            },
            _ => Kind::SmallDocument {
                length: ty as usize,
            },
        }
    }

    /// True for the structural node kinds (Map, Run, Leaf).
    pub fn is_branch(self) -> bool {
        matches!(self, Kind::Map { .. } | Kind::Run { .. } | Kind::Leaf)
    }

    /// True for any of the three document encodings.
    pub fn is_document(self) -> bool {
        matches!(
            self,
            Kind::Document | Kind::SmallDocument { .. } | Kind::MicroDocument { .. }
        )
    }
}

/// A 64-bit tagged pointer: 16-bit type code, 48-bit data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(u64);

impl Reference {
    /// "No value here". A prior version might still hold one.
    pub const NULL: Reference = Reference((NULL_TYPE as u64) << DATA_BITS);

    /// The empty micro document.
    pub const EMPTY_DOCUMENT: Reference = Reference(0);

    /// Build a reference from a type code and a data field.
    ///
    /// # Panics
    ///
    /// Panics if `data` does not fit in 48 bits.
    pub fn new(ty: TypeCode, data: u64) -> Self {
        assert!(
            data & !DATA_MASK == 0,
            "reference data exceeds {DATA_BITS} bits: {data:#x}"
        );
        Reference(((ty as u64) << DATA_BITS) | data)
    }

    /// Reinterpret raw bits read from a record.
    pub const fn from_bits(bits: u64) -> Self {
        Reference(bits)
    }

    /// Raw bits for writing into a record.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Type code half.
    pub const fn ty(self) -> TypeCode {
        (self.0 >> DATA_BITS) as TypeCode
    }

    /// Data half, normally the end offset of the record.
    pub const fn data(self) -> u64 {
        self.0 & DATA_MASK
    }

    /// Classification of the type code.
    pub fn kind(self) -> Kind {
        Kind::of(self.ty())
    }

    /// True for the Null sentinel.
    pub fn is_null(self) -> bool {
        self.ty() == NULL_TYPE
    }

    /// Same type code, different data.
    pub fn with_data(self, data: u64) -> Self {
        Reference::new(self.ty(), data)
    }

    /// Embed up to six bytes directly in a reference.
    ///
    /// The first byte lands in the most significant byte of the data field.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than [`MICRO_DOCUMENT_MAX`].
    pub fn micro(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() <= MICRO_DOCUMENT_MAX,
            "micro document too long: {}",
            bytes.len()
        );
        let mut data = 0u64;
        for (i, b) in bytes.iter().enumerate() {
            data |= (*b as u64) << ((DATA_BYTES - i - 1) * 8);
        }
        Reference::new(bytes.len() as TypeCode, data)
    }

    /// Byte `index` of a micro document.
    pub fn micro_byte(self, index: usize) -> u8 {
        debug_assert!(index < DATA_BYTES);
        (self.data() >> ((DATA_BYTES - index - 1) * 8)) as u8
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({:?} @ {:#x})", self.kind(), self.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constants_match_layout() {
        assert_eq!(NULL_TYPE, 0xFF00);
        assert_eq!(LEAF_TYPE, 0xFDFF);
        assert_eq!(FOLDER_TYPE, 0xFDFE);
        assert_eq!(DOCUMENT_TYPE, 0xFDFD);
        assert_eq!(SMALL_DOCUMENT_MAX, 0xFDFC);
        assert_eq!(MICRO_DOCUMENT_MAX, 6);
        assert_eq!(MAX_ADDRESS, 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn test_type_codes_are_negative() {
        for ty in [NULL_TYPE, LEAF_TYPE, FOLDER_TYPE, DOCUMENT_TYPE, map_type(2), run_type(1)] {
            assert!((ty as i16) < 0, "{ty:#x} should be negative");
        }
    }

    #[test]
    fn test_null_reference() {
        assert!(Reference::NULL.is_null());
        assert_eq!(Reference::NULL.data(), 0);
        assert_eq!(Reference::NULL.kind(), Kind::Null);
        assert!(!Reference::EMPTY_DOCUMENT.is_null());
        assert_eq!(
            Reference::EMPTY_DOCUMENT.kind(),
            Kind::MicroDocument { length: 0 }
        );
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Kind::of(map_type(2)), Kind::Map { arity: 2 });
        assert_eq!(Kind::of(map_type(256)), Kind::Map { arity: 256 });
        assert_eq!(Kind::of(run_type(1)), Kind::Run { length: 1 });
        assert_eq!(Kind::of(run_type(256)), Kind::Run { length: 256 });
        assert_eq!(Kind::of(LEAF_TYPE), Kind::Leaf);
        assert_eq!(Kind::of(FOLDER_TYPE), Kind::Folder);
        assert_eq!(Kind::of(DOCUMENT_TYPE), Kind::Document);
        assert_eq!(Kind::of(6), Kind::MicroDocument { length: 6 });
        assert_eq!(Kind::of(7), Kind::SmallDocument { length: 7 });
        assert_eq!(
            Kind::of(small_document_type(SMALL_DOCUMENT_MAX)),
            Kind::SmallDocument {
                length: SMALL_DOCUMENT_MAX
            }
        );
    }

    #[test]
    fn test_micro_bytes_are_big_endian() {
        let r = Reference::micro(b"abc");
        assert_eq!(r.ty(), 3);
        assert_eq!(r.data(), 0x6162_6300_0000);
        assert_eq!(r.micro_byte(0), b'a');
        assert_eq!(r.micro_byte(2), b'c');
        assert_eq!(Reference::micro(&[]), Reference::EMPTY_DOCUMENT);
    }

    #[test]
    #[should_panic(expected = "reference data exceeds")]
    fn test_data_overflow_panics() {
        Reference::new(FOLDER_TYPE, 1 << 48);
    }

    #[test]
    #[should_panic(expected = "map arity out of range")]
    fn test_map_arity_one_rejected() {
        map_type(1);
    }

    proptest! {
        #[test]
        fn prop_fields_survive_packing(ty in any::<u16>(), data in 0..=MAX_ADDRESS) {
            let r = Reference::new(ty, data);
            prop_assert_eq!(r.ty(), ty);
            prop_assert_eq!(r.data(), data);
            prop_assert_eq!(Reference::from_bits(r.to_bits()), r);
        }

        #[test]
        fn prop_micro_documents_decode(bytes in proptest::collection::vec(any::<u8>(), 0..=6)) {
            let r = Reference::micro(&bytes);
            let decoded: Vec<u8> = (0..bytes.len()).map(|i| r.micro_byte(i)).collect();
            prop_assert_eq!(decoded, bytes);
        }
    }
}
