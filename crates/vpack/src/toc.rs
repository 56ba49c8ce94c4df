//! TOC linearizer and archive splitter.
//!
//! [`linearize`] flattens a scanned tree into the entry order an archive
//! stores: a begin marker per directory, its children sorted by name,
//! then a `".."` end marker. [`split`] cuts that order into groups small
//! enough for the format's 32-bit size field, re-opening still-open
//! directories at the head of every new group so each group remains a
//! well-formed nested sequence on its own.

use std::path::Path;
use std::time::SystemTime;

use thiserror::Error;

use crate::{ArchiveGroup, FsNode, FsNodeKind, TocEntry, TocEntryKind, DIR_END_NAME, MAX_NAME_LEN};

/// A node cannot be represented in a TOC record. The 32-byte name field
/// and 32-bit size field narrow here, at entry creation, so the encoder
/// never sees an entry it cannot write.
#[derive(Error, Debug, PartialEq)]
pub enum TocError {
    #[error("name {0:?} is not valid UTF-8")]
    InvalidName(String),
    #[error("name {name:?} is {len} bytes, over the {MAX_NAME_LEN}-byte limit")]
    NameTooLong { name: String, len: usize },
    #[error("{name:?} is {size} bytes, over the 32-bit size field")]
    FileTooLarge { name: String, size: u64 },
}

fn entry_name(path: &Path) -> Result<String, TocError> {
    let name = path.file_name().unwrap_or(path.as_os_str());
    let name = name
        .to_str()
        .ok_or_else(|| TocError::InvalidName(name.to_string_lossy().into_owned()))?;
    if name.len() > MAX_NAME_LEN {
        return Err(TocError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    Ok(name.to_string())
}

/// Seconds since the epoch, clamped to the TOC's 32-bit field. Times
/// before 1970 or past 2038 saturate instead of wrapping.
fn unix_seconds(t: SystemTime) -> i32 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) => i32::try_from(since.as_secs()).unwrap_or(i32::MAX),
        Err(before) => match i32::try_from(before.duration().as_secs()) {
            Ok(secs) => secs.saturating_neg(),
            Err(_) => i32::MIN,
        },
    }
}

enum Task<'a> {
    Visit { node: &'a FsNode, name: String },
    CloseDir,
}

/// Flattens `node` into archive entry order.
///
/// `name_override` relabels the root's own entry; children always carry
/// their path basenames. Children are visited in byte-wise ascending
/// name order, so two scans of the same contents linearize identically
/// no matter how the filesystem listed them.
pub fn linearize(node: &FsNode, name_override: Option<&str>) -> Result<Vec<TocEntry>, TocError> {
    let root_name = match name_override {
        Some(name) => name.to_string(),
        None => entry_name(&node.path)?,
    };
    let mut out = Vec::new();
    let mut tasks = vec![Task::Visit {
        node,
        name: root_name,
    }];
    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit { node, name } => match &node.kind {
                FsNodeKind::File { size, modified } => {
                    let size = i32::try_from(*size).map_err(|_| TocError::FileTooLarge {
                        name: name.clone(),
                        size: *size,
                    })?;
                    out.push(TocEntry {
                        size,
                        name,
                        timestamp: unix_seconds(*modified),
                        kind: TocEntryKind::File {
                            source: node.path.clone(),
                        },
                    });
                }
                FsNodeKind::Dir { children } => {
                    out.push(TocEntry {
                        size: 0,
                        name,
                        timestamp: 0,
                        kind: TocEntryKind::DirBegin,
                    });
                    let mut named: Vec<(String, &FsNode)> = children
                        .iter()
                        .map(|c| Ok((entry_name(&c.path)?, c)))
                        .collect::<Result<_, TocError>>()?;
                    named.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
                    // tasks pop from the back, so push the close first
                    // and the children reversed
                    tasks.push(Task::CloseDir);
                    for (name, child) in named.into_iter().rev() {
                        tasks.push(Task::Visit { node: child, name });
                    }
                }
            },
            Task::CloseDir => out.push(TocEntry {
                size: 0,
                name: DIR_END_NAME.to_string(),
                timestamp: 0,
                kind: TocEntryKind::DirEnd,
            }),
        }
    }
    Ok(out)
}

/// Cuts `entries` into groups whose payload stays within `max_payload`.
///
/// Never fails and always returns at least one group. A file that would
/// push the running payload over the budget closes the current group and
/// opens the next one, seeded with a copy of every directory-begin
/// marker whose end has not been emitted yet. A single file larger than
/// the whole budget gets a group of its own; splitting again could not
/// make it smaller.
pub fn split(entries: Vec<TocEntry>, max_payload: i32) -> Vec<ArchiveGroup> {
    let budget = i64::from(max_payload);
    let mut groups = Vec::new();
    let mut current: Vec<TocEntry> = Vec::new();
    let mut open_dirs: Vec<TocEntry> = Vec::new();
    let mut payload: i64 = 0;
    for entry in entries {
        let size = if entry.is_file() {
            i64::from(entry.size)
        } else {
            0
        };
        if payload > 0 && payload + size > budget {
            groups.push(ArchiveGroup {
                entries: std::mem::take(&mut current),
            });
            payload = 0;
            current.extend(open_dirs.iter().cloned());
        }
        payload += size;
        match entry.kind {
            TocEntryKind::DirBegin => open_dirs.push(entry.clone()),
            TocEntryKind::DirEnd => {
                open_dirs.pop();
            }
            TocEntryKind::File { .. } => {}
        }
        current.push(entry);
    }
    groups.push(ArchiveGroup { entries: current });
    groups
}


#[cfg(test)]
mod test_split {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str, size: i32) -> TocEntry {
        TocEntry {
            size,
            name: name.to_string(),
            timestamp: 0,
            kind: TocEntryKind::File {
                source: PathBuf::from(name),
            },
        }
    }

    fn begin(name: &str) -> TocEntry {
        TocEntry {
            size: 0,
            name: name.to_string(),
            timestamp: 0,
            kind: TocEntryKind::DirBegin,
        }
    }

    fn end() -> TocEntry {
        TocEntry {
            size: 0,
            name: DIR_END_NAME.to_string(),
            timestamp: 0,
            kind: TocEntryKind::DirEnd,
        }
    }

    #[test]
    fn empty_input_yields_one_empty_group() {
        let groups = split(vec![], 100);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].entries.is_empty());
    }

    #[test]
    fn everything_under_budget_stays_in_one_group() {
        let entries = vec![begin("x"), file("a", 40), file("b", 40), end()];
        let groups = split(entries.clone(), 100);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries, entries);
    }

    #[test]
    fn overflowing_file_opens_the_next_group() {
        let entries = vec![begin("x"), file("a", 40), file("b", 40), file("c", 40), end()];
        let groups = split(entries, 100);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entries, vec![begin("x"), file("a", 40), file("b", 40)]);
        // the triggering entry lands in the new group, behind the
        // re-opened parent
        assert_eq!(groups[1].entries, vec![begin("x"), file("c", 40), end()]);
    }

    #[test]
    fn reopens_every_open_ancestor_after_a_split() {
        let entries = vec![
            begin("x"),
            begin("mid"),
            begin("deep"),
            file("a", 60),
            file("b", 60),
            end(),
            end(),
            end(),
        ];
        let groups = split(entries, 100);

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[1].entries,
            vec![begin("x"), begin("mid"), begin("deep"), file("b", 60), end(), end(), end()]
        );
    }

    #[test]
    fn closed_directories_are_not_reopened() {
        let entries = vec![
            begin("x"),
            begin("done"),
            file("a", 60),
            end(),
            begin("open"),
            file("b", 60),
            end(),
            end(),
        ];
        let groups = split(entries, 100);

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[1].entries,
            vec![begin("x"), begin("open"), file("b", 60), end(), end()]
        );
    }

    #[test]
    fn oversized_single_file_gets_its_own_group() {
        let entries = vec![begin("x"), file("small", 10), file("huge", 500), file("tail", 10), end()];
        let groups = split(entries, 100);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].entries, vec![begin("x"), file("small", 10)]);
        assert_eq!(groups[1].entries, vec![begin("x"), file("huge", 500)]);
        assert_eq!(groups[2].entries, vec![begin("x"), file("tail", 10), end()]);
    }

    #[test]
    fn oversized_file_first_in_sequence_does_not_loop() {
        let entries = vec![begin("x"), file("huge", 500), end()];
        let groups = split(entries.clone(), 100);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries, entries);
    }

    #[test]
    fn conserves_every_entry_in_order() {
        let entries = vec![
            begin("x"),
            file("a", 30),
            begin("sub"),
            file("b", 30),
            file("c", 30),
            end(),
            file("d", 30),
            end(),
        ];
        let groups = split(entries.clone(), 50);

        // strip the markers each later group was re-seeded with; what
        // remains must be the input, unchanged
        let mut rejoined = Vec::new();
        let mut open = 0usize;
        for (i, group) in groups.iter().enumerate() {
            let skip = if i == 0 { 0 } else { open };
            for e in group.entries.iter().skip(skip) {
                match e.kind {
                    TocEntryKind::DirBegin => open += 1,
                    TocEntryKind::DirEnd => open -= 1,
                    TocEntryKind::File { .. } => {}
                }
                rejoined.push(e.clone());
            }
        }
        assert_eq!(rejoined, entries);
    }

    #[test]
    fn every_group_stays_within_budget() {
        let entries = vec![
            begin("x"),
            file("a", 45),
            file("b", 45),
            file("c", 45),
            file("d", 45),
            file("e", 45),
            end(),
        ];
        let groups = split(entries, 100);

        assert!(groups.len() > 1);
        for group in &groups {
            let payload = group.payload_bytes();
            assert!((0..=100).contains(&payload), "group payload {payload}");
        }
    }
}
