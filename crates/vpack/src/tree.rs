//! Tree scanner: captures a directory as an [`FsNode`] tree.

use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::fs::{DirEntryInfo, Filesystem};
use crate::{FsNode, FsNodeKind};

/// Listing a directory failed; the scan stops at the first failure and
/// returns no partial tree.
#[derive(Error, Debug)]
#[error("cannot list {path}: {source}")]
pub struct ScanError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

struct Frame {
    path: PathBuf,
    /// Listing still to visit, popped from the back.
    pending: Vec<DirEntryInfo>,
    children: Vec<FsNode>,
}

impl Frame {
    fn open<F: Filesystem>(fs: &F, path: PathBuf) -> Result<Self, ScanError> {
        let mut pending = fs.list_entries(&path).map_err(|source| ScanError {
            path: path.clone(),
            source,
        })?;
        debug!("scanned {} ({} entries)", path.display(), pending.len());
        pending.reverse();
        Ok(Frame {
            path,
            pending,
            children: Vec::new(),
        })
    }

    fn close(self) -> FsNode {
        FsNode {
            path: self.path,
            kind: FsNodeKind::Dir {
                children: self.children,
            },
        }
    }
}

/// Builds the tree rooted at `root`, which must be listable.
///
/// Traversal runs on an explicit frame stack, so depth costs heap, not
/// call stack. Children stay in the order the capability listed them;
/// [`crate::toc::linearize`] orders them later. Sizes and mtimes are the
/// listing's values, frozen into the tree.
pub fn scan<F: Filesystem>(fs: &F, root: &Path) -> Result<FsNode, ScanError> {
    let mut stack = vec![Frame::open(fs, root.to_path_buf())?];
    while let Some(frame) = stack.last_mut() {
        if let Some(entry) = frame.pending.pop() {
            let path = frame.path.join(&entry.name);
            if entry.is_dir {
                stack.push(Frame::open(fs, path)?);
            } else {
                frame.children.push(FsNode {
                    path,
                    kind: FsNodeKind::File {
                        size: entry.size,
                        modified: entry.modified,
                    },
                });
            }
        } else if let Some(done) = stack.pop() {
            let node = done.close();
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => return Ok(node),
            }
        }
    }
    unreachable!("root frame leaves the stack only through the return above")
}
