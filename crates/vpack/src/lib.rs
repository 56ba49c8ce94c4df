pub mod archive;
pub mod fs;
pub mod toc;
pub mod tree;

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

/// Signature opening every archive.
pub const MAGIC: [u8; 4] = *b"VPVP";
/// Container version written into every header.
pub const VERSION: i32 = 2;
/// Bytes taken by magic, version, total size and entry count.
pub const HEADER_LEN: i32 = 16;
/// Full width of the name field in a TOC record.
pub const NAME_FIELD_LEN: usize = 32;
/// Longest name the field holds next to its terminating NUL.
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;
/// Width of one TOC record: offset, size, name field, timestamp.
pub const TOC_RECORD_LEN: usize = NAME_FIELD_LEN + 12;
/// Name of the synthetic entry closing a directory scope.
pub const DIR_END_NAME: &str = "..";
/// Payload budget per archive when the caller does not pick one.
pub const DEFAULT_MAX_PAYLOAD: i32 = 1_000_000_000;

/// One filesystem object captured by [`tree::scan`].
///
/// Sizes and mtimes are frozen at scan time; the encoder later verifies
/// files against them before admitting their bytes into an archive.
#[derive(Debug, PartialEq, Serialize, Clone)]
pub struct FsNode {
    pub path: PathBuf,
    pub kind: FsNodeKind,
}

#[derive(Debug, PartialEq, Serialize, Clone)]
pub enum FsNodeKind {
    File { size: u64, modified: SystemTime },
    /// Children are kept in listing order; ordering happens at TOC time.
    Dir { children: Vec<FsNode> },
}

impl FsNode {
    /// Display name of the node, lossy for non-UTF-8 paths.
    pub fn display_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.to_string_lossy().into_owned(),
        }
    }

    /// Sum of the file sizes in this subtree.
    pub fn payload_bytes(&self) -> u64 {
        match &self.kind {
            FsNodeKind::File { size, .. } => *size,
            FsNodeKind::Dir { children } => children.iter().map(FsNode::payload_bytes).sum(),
        }
    }

    /// Number of nodes in this subtree, the node itself included.
    pub fn node_count(&self) -> u64 {
        match &self.kind {
            FsNodeKind::File { .. } => 1,
            FsNodeKind::Dir { children } => 1 + children.iter().map(FsNode::node_count).sum::<u64>(),
        }
    }
}

/// One line item of an archive table of contents, produced by
/// [`toc::linearize`]. `size` and `timestamp` are zero for both marker
/// kinds; the `size` of a file has already been checked against the
/// 32-bit field it is written into.
#[derive(Debug, PartialEq, Clone)]
pub struct TocEntry {
    pub size: i32,
    pub name: String,
    pub timestamp: i32,
    pub kind: TocEntryKind,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TocEntryKind {
    /// Regular file; `source` is opened again at encode time.
    File { source: PathBuf },
    DirBegin,
    DirEnd,
}

impl TocEntry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, TocEntryKind::File { .. })
    }
}

/// The entries of exactly one physical archive, in write order.
#[derive(Debug, PartialEq, Clone)]
pub struct ArchiveGroup {
    pub entries: Vec<TocEntry>,
}

impl ArchiveGroup {
    /// Sum of the file sizes in this group. Marker entries add nothing.
    pub fn payload_bytes(&self) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.is_file())
            .map(|e| i64::from(e.size))
            .sum()
    }
}
