//! Streaming document reads.

use crate::value::Document;
use k2v_core::Reference;
use k2v_durability::RecordFile;
use std::io::{self, Read};

enum Source<'q> {
    Inline(Reference),
    File { file: &'q RecordFile, start: u64 },
}

/// Reads the bytes of one document.
///
/// Supports [`mark`](Self::mark) and [`reset`](Self::reset) to re-read from
/// a saved position.
pub struct DocumentReader<'q> {
    source: Source<'q>,
    length: u64,
    position: u64,
    mark: u64,
}

impl<'q> DocumentReader<'q> {
    pub(crate) fn inline(document: &Document) -> Self {
        DocumentReader {
            source: Source::Inline(document.reference()),
            length: document.len(),
            position: 0,
            mark: 0,
        }
    }

    pub(crate) fn stored(file: &'q RecordFile, document: &Document) -> Self {
        let span = document.span();
        DocumentReader {
            source: Source::File {
                file,
                start: span.start,
            },
            length: span.length,
            position: 0,
            mark: 0,
        }
    }

    /// Total document length.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True for an empty document.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    /// Remember the current position.
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    /// Go back to the last mark (or the start).
    pub fn reset(&mut self) {
        self.position = self.mark;
    }
}

impl Read for DocumentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining() as usize);
        if n == 0 {
            return Ok(0);
        }
        match self.source {
            Source::Inline(reference) => {
                let from = self.position as usize;
                for (i, byte) in buf[..n].iter_mut().enumerate() {
                    *byte = reference.micro_byte(from + i);
                }
            }
            Source::File { file, start } => {
                file.read_at(&mut buf[..n], start + self.position)?;
            }
        }
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Document;

    #[test]
    fn test_inline_read_with_mark_and_reset() {
        let doc = Document::micro(Reference::micro(b"abcdef"), 1);
        let mut reader = DocumentReader::inline(&doc);
        let mut two = [0u8; 2];

        reader.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"ab");
        reader.mark();
        reader.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"cd");
        assert_eq!(reader.remaining(), 2);

        reader.reset();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cdef");
        assert_eq!(reader.read(&mut two).unwrap(), 0);
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::micro(Reference::EMPTY_DOCUMENT, 1);
        let mut reader = DocumentReader::inline(&doc);
        assert!(reader.is_empty());
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
    }
}
