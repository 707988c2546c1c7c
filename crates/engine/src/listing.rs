//! Ordered iteration over a folder.

use crate::folder::Folder;
use crate::query::Query;
use crate::value::Value;
use k2v_core::{Kind, Reference, Result};

/// Pending children of one trie node.
struct Frame {
    /// Key length at the node
    prefix: usize,
    /// Head byte (if any) and child, in key order
    entries: Vec<(Option<u8>, Reference)>,
    next: usize,
}

/// Iterator over the values of one folder in ascending key order.
///
/// Yields `(key, value)` pairs. Nulls stored in the folder are yielded too,
/// as [`Absence::Definite`](crate::Absence::Definite). Stops after the
/// first error.
pub struct Listing<'q> {
    query: &'q Query,
    folder: Option<Folder>,
    key: Vec<u8>,
    stack: Vec<Frame>,
}

impl<'q> Listing<'q> {
    pub(crate) fn new(query: &'q Query, folder: Folder) -> Self {
        let top = folder.top();
        let stack = if top.is_null() {
            Vec::new()
        } else {
            vec![Frame {
                prefix: 0,
                entries: vec![(None, top)],
                next: 0,
            }]
        };
        Listing {
            query,
            folder: Some(folder),
            key: Vec::new(),
            stack,
        }
    }

    pub(crate) fn empty(query: &'q Query) -> Self {
        Listing {
            query,
            folder: None,
            key: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// The folder being listed, or `None` if it did not exist.
    pub fn folder(&self) -> Option<&Folder> {
        self.folder.as_ref()
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Value)>> {
        let file = self.query.file();
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(&(head, mut node)) = frame.entries.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            self.key.truncate(frame.prefix);
            if let Some(head) = head {
                self.key.push(head);
            }

            while let Kind::Run { .. } = node.kind() {
                let run = file.read_run(node)?;
                self.key.extend_from_slice(&run.bytes);
                node = run.branch;
            }

            let terminal = match node.kind() {
                Kind::Map { .. } => {
                    let map = file.read_map(node)?;
                    self.stack.push(Frame {
                        prefix: self.key.len(),
                        entries: map.heads.iter().copied().map(Some).zip(map.children).collect(),
                        next: 0,
                    });
                    continue;
                }
                Kind::Leaf => {
                    let leaf = file.read_leaf(node)?;
                    if !leaf.branch.is_null() {
                        self.stack.push(Frame {
                            prefix: self.key.len(),
                            entries: vec![(None, leaf.branch)],
                            next: 0,
                        });
                    }
                    leaf.child
                }
                _ => node,
            };

            let Some(folder) = self.folder.as_ref() else {
                return Ok(None);
            };
            let value = self.query.entry(folder, &self.key, terminal)?;
            return Ok(Some((self.key.clone(), value)));
        }
    }
}

impl Iterator for Listing<'_> {
    type Item = Result<(Vec<u8>, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}
