//! Archive encoder: writes one [`ArchiveGroup`] as a VP container.
//!
//! Layout: `VPVP` magic, version, total size and entry count (all
//! little-endian i32), the concatenated file payloads in entry order,
//! then one 44-byte TOC record per entry. Header fields are validated
//! before the first byte goes out, so an overflow never leaves a header
//! that contradicts its payload.

use std::cmp::min;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use thiserror::Error;

use crate::fs::Filesystem;
use crate::{ArchiveGroup, TocEntryKind, HEADER_LEN, MAGIC, MAX_NAME_LEN, NAME_FIELD_LEN, VERSION};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write archive: {0}")]
    Write(#[from] io::Error),
    #[error("group payload of {total} bytes does not fit the 32-bit size field")]
    PayloadOverflow { total: i64 },
    #[error("{count} entries do not fit the 32-bit count field")]
    EntryCountOverflow { count: usize },
    #[error("name {name:?} does not fit the 31-byte name field")]
    NameTooLong { name: String },
    #[error("{path} is no longer {expected} bytes long")]
    SizeMismatch { path: PathBuf, expected: i32 },
}

/// Streams VP containers into `inner`, one per [`write_group`] call.
///
/// [`write_group`]: ArchiveWriter::write_group
pub struct ArchiveWriter<W: Write> {
    inner: W,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Encodes `group` as one complete archive, reading every file
    /// entry's bytes back through `fs`.
    ///
    /// TOC offsets are a running counter that starts at the header
    /// length and advances by each file's size, so they land exactly on
    /// the payload bytes written earlier in the same entry order. A
    /// file whose length changed since scan time fails the group; its
    /// recorded size is what the offsets were computed from.
    pub fn write_group<F: Filesystem>(
        &mut self,
        fs: &F,
        group: &ArchiveGroup,
    ) -> Result<(), EncodeError> {
        let total = group.payload_bytes();
        if total < 0 || total > i64::from(i32::MAX - HEADER_LEN) {
            return Err(EncodeError::PayloadOverflow { total });
        }
        let count = group.entries.len();
        let count = i32::try_from(count).map_err(|_| EncodeError::EntryCountOverflow { count })?;
        for entry in &group.entries {
            if entry.name.len() > MAX_NAME_LEN {
                return Err(EncodeError::NameTooLong {
                    name: entry.name.clone(),
                });
            }
        }

        self.inner.write_all(&MAGIC)?;
        self.inner.write_i32::<LittleEndian>(VERSION)?;
        self.inner.write_i32::<LittleEndian>(total as i32 + HEADER_LEN)?;
        self.inner.write_i32::<LittleEndian>(count)?;

        for entry in &group.entries {
            if let TocEntryKind::File { source } = &entry.kind {
                self.copy_file(fs, source, entry.size)?;
            }
        }

        let mut offset = HEADER_LEN;
        for entry in &group.entries {
            self.inner.write_i32::<LittleEndian>(offset)?;
            self.inner.write_i32::<LittleEndian>(entry.size)?;
            let mut field = [0u8; NAME_FIELD_LEN];
            field[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
            self.inner.write_all(&field)?;
            self.inner.write_i32::<LittleEndian>(entry.timestamp)?;
            if entry.is_file() {
                offset += entry.size;
            }
        }
        debug!("encoded group: {count} entries, {total} payload bytes");
        Ok(())
    }

    /// Copies exactly `expected` bytes of `path` into the payload
    /// block. Fewer available bytes, or any left over afterwards, mean
    /// the file changed since it was scanned.
    fn copy_file<F: Filesystem>(
        &mut self,
        fs: &F,
        path: &Path,
        expected: i32,
    ) -> Result<(), EncodeError> {
        let read_err = |source| EncodeError::Read {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = fs.open_for_read(path).map_err(read_err)?;
        let mut buf = [0u8; 64 * 1024];
        let mut remaining = expected as usize;
        while remaining > 0 {
            let want = min(buf.len(), remaining);
            let got = reader.read(&mut buf[..want]).map_err(read_err)?;
            if got == 0 {
                return Err(EncodeError::SizeMismatch {
                    path: path.to_path_buf(),
                    expected,
                });
            }
            self.inner.write_all(&buf[..got])?;
            remaining -= got;
        }
        if reader.read(&mut buf[..1]).map_err(read_err)? != 0 {
            return Err(EncodeError::SizeMismatch {
                path: path.to_path_buf(),
                expected,
            });
        }
        Ok(())
    }
}

/// File name for group `index` (zero-based) of a logical unit split
/// into `count` archives: `unit.vp` unsplit, `unit-NN.vp` otherwise.
pub fn archive_file_name(unit: &str, index: usize, count: usize) -> String {
    if count == 1 {
        format!("{unit}.vp")
    } else {
        format!("{unit}-{:02}.vp", index + 1)
    }
}
