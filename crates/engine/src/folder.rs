//! Folder handles.
//!
//! A [`Folder`] names a namespace by its path from the root and carries a
//! snapshot of the folder record it was read from. The snapshot is only
//! trusted by the Query that produced it (or a later Query on the same
//! store); everyone else re-resolves the folder by walking its path.

use k2v_core::Reference;
use k2v_durability::FolderRecord;
use std::fmt;
use std::sync::Arc;

/// Identity of whoever produced a handle.
///
/// Committed data carries `transaction == 0`. Every Update gets its own
/// transaction number, so folders returned by an Update are never mistaken
/// for committed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Brand {
    pub(crate) store: u64,
    pub(crate) transaction: u64,
}

impl Brand {
    pub(crate) fn committed(store: u64) -> Self {
        Brand {
            store,
            transaction: 0,
        }
    }
}

struct FolderInner {
    brand: Brand,
    parent: Option<Folder>,
    key: Vec<u8>,
    record: FolderRecord<Reference>,
}

/// Handle to a folder: a nested namespace of keys.
#[derive(Clone)]
pub struct Folder {
    inner: Arc<FolderInner>,
}

impl Folder {
    pub(crate) fn root(brand: Brand, record: FolderRecord<Reference>) -> Self {
        Folder {
            inner: Arc::new(FolderInner {
                brand,
                parent: None,
                key: Vec::new(),
                record,
            }),
        }
    }

    /// Handle for the folder at `key` inside `parent`.
    pub(crate) fn nested(
        parent: &Folder,
        key: &[u8],
        brand: Brand,
        record: FolderRecord<Reference>,
    ) -> Self {
        Folder {
            inner: Arc::new(FolderInner {
                brand,
                parent: Some(parent.clone()),
                key: key.to_vec(),
                record,
            }),
        }
    }

    /// Same path, new snapshot.
    pub(crate) fn reissue(&self, brand: Brand, record: FolderRecord<Reference>) -> Self {
        Folder {
            inner: Arc::new(FolderInner {
                brand,
                parent: self.inner.parent.clone(),
                key: self.inner.key.clone(),
                record,
            }),
        }
    }

    pub(crate) fn brand(&self) -> Brand {
        self.inner.brand
    }

    pub(crate) fn top(&self) -> Reference {
        self.inner.record.top
    }

    /// Enclosing folder, or `None` for the root.
    pub fn parent(&self) -> Option<&Folder> {
        self.inner.parent.as_ref()
    }

    /// Key of this folder inside its parent (empty for the root).
    pub fn key(&self) -> &[u8] {
        &self.inner.key
    }

    /// True for the store's root folder.
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Keys from the root down to this folder.
    pub fn path(&self) -> Vec<Vec<u8>> {
        let mut path = Vec::new();
        let mut at = Some(self);
        while let Some(folder) = at {
            if folder.inner.parent.is_some() {
                path.push(folder.inner.key.clone());
            }
            at = folder.inner.parent.as_ref();
        }
        path.reverse();
        path
    }

    /// Version of the last change to this folder, as of this snapshot.
    pub fn version(&self) -> u64 {
        self.inner.record.version
    }

    /// True if the folder hides whatever earlier versions held at its path.
    pub fn is_absolute(&self) -> bool {
        self.inner.record.is_absolute()
    }

    /// Non-null values directly inside the folder.
    pub fn count(&self) -> u64 {
        self.inner.record.count
    }

    /// Live bytes reachable from the folder, its own record included.
    pub fn bytes(&self) -> u64 {
        self.inner.record.bytes
    }
}

impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Folder")
            .field("path", &self.path())
            .field("version", &self.version())
            .field("count", &self.count())
            .field("bytes", &self.bytes())
            .field("absolute", &self.is_absolute())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k2v_durability::FOLDER_ABSOLUTE;

    #[test]
    fn test_path_walks_to_root() {
        let brand = Brand::committed(1);
        let root = Folder::root(brand, FolderRecord::empty(1, 0));
        let a = Folder::nested(&root, b"a", brand, FolderRecord::empty(2, 0));
        let b = Folder::nested(&a, b"bb", brand, FolderRecord::empty(3, FOLDER_ABSOLUTE));

        assert!(root.is_root());
        assert!(root.path().is_empty());
        assert_eq!(b.path(), vec![b"a".to_vec(), b"bb".to_vec()]);
        assert_eq!(b.parent().map(|p| p.key().to_vec()), Some(b"a".to_vec()));
        assert!(b.is_absolute());
        assert_eq!(b.version(), 3);
    }

    #[test]
    fn test_reissue_keeps_path() {
        let brand = Brand::committed(1);
        let root = Folder::root(brand, FolderRecord::empty(1, 0));
        let a = Folder::nested(&root, b"a", brand, FolderRecord::empty(2, 0));
        let staged = Brand {
            store: 1,
            transaction: 7,
        };
        let again = a.reissue(staged, FolderRecord::empty(9, 0));
        assert_eq!(again.path(), a.path());
        assert_eq!(again.version(), 9);
        assert_eq!(again.brand(), staged);
    }
}
