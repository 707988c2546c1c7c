//! Values stored under keys.

use crate::folder::Folder;
use k2v_core::{Kind, Reference};
use k2v_durability::DocumentSpan;

/// How sure a lookup is that nothing exists at a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    /// Nothing exists at the key in this version or any earlier one that
    /// this store would merge in.
    Definite,
    /// Nothing exists at the key in this version; an older version that
    /// this one is layered on might still hold a value.
    Indefinite,
}

/// A value found at a key.
#[derive(Debug, Clone)]
pub enum Value {
    /// No value
    Null(Absence),
    /// A byte blob
    Document(Document),
    /// A nested namespace
    Folder(Folder),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// The document, if this is one.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// The folder, if this is one.
    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Value::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    /// Consume into a folder, if this is one.
    pub fn into_folder(self) -> Option<Folder> {
        match self {
            Value::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    /// The absence tag, if this is null.
    pub fn absence(&self) -> Option<Absence> {
        match self {
            Value::Null(absence) => Some(*absence),
            _ => None,
        }
    }
}

/// Handle to a stored byte blob. Read it with
/// [`Query::read`](crate::Query::read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    reference: Reference,
    span: DocumentSpan,
    store: u64,
}

impl Document {
    pub(crate) fn micro(reference: Reference, store: u64) -> Self {
        let length = match reference.kind() {
            Kind::MicroDocument { length } => length as u64,
            _ => 0,
        };
        Document {
            reference,
            span: DocumentSpan { start: 0, length },
            store,
        }
    }

    pub(crate) fn stored(reference: Reference, span: DocumentSpan, store: u64) -> Self {
        Document {
            reference,
            span,
            store,
        }
    }

    pub(crate) fn reference(&self) -> Reference {
        self.reference
    }

    pub(crate) fn span(&self) -> DocumentSpan {
        self.span
    }

    pub(crate) fn store(&self) -> u64 {
        self.store
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.span.length
    }

    /// True for a zero-length document.
    pub fn is_empty(&self) -> bool {
        self.span.length == 0
    }

    /// True if the bytes live inside the reference rather than the file.
    pub fn is_inline(&self) -> bool {
        matches!(self.reference.kind(), Kind::MicroDocument { .. })
    }
}
