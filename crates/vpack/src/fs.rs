//! Filesystem capability behind which the scanner and encoder run.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub is_dir: bool,
    /// Byte length; zero for directories.
    pub size: u64,
    pub modified: SystemTime,
}

/// The two filesystem operations packing needs: list a directory and
/// open a file. The scanner drives [`list_entries`]; the encoder comes
/// back through [`open_for_read`] for every file it writes out.
///
/// [`list_entries`]: Filesystem::list_entries
/// [`open_for_read`]: Filesystem::open_for_read
pub trait Filesystem {
    type Reader: Read;

    /// Immediate entries of `path`, in no particular order.
    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;

    /// Byte stream over one file's contents.
    fn open_for_read(&self, path: &Path) -> io::Result<Self::Reader>;
}

/// The process filesystem. Symlinks are reported as they are listed,
/// not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    type Reader = File;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(path)? {
            let dirent = dirent?;
            let metadata = dirent.metadata()?;
            let is_dir = metadata.is_dir();
            entries.push(DirEntryInfo {
                name: dirent.file_name(),
                is_dir,
                size: if is_dir { 0 } else { metadata.len() },
                modified: metadata.modified()?,
            });
        }
        Ok(entries)
    }

    fn open_for_read(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }
}

/// In-memory filesystem for tests and dry runs.
///
/// Directory listings keep insertion order, so callers can stage the
/// unordered listings a real filesystem may return. Missing ancestor
/// directories are created on the fly.
#[derive(Debug, Default)]
pub struct MemoryFs {
    listings: HashMap<PathBuf, Vec<OsString>>,
    files: HashMap<PathBuf, MemoryFile>,
}

#[derive(Debug)]
struct MemoryFile {
    data: Vec<u8>,
    modified: SystemTime,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.register_child(&path);
        self.listings.entry(path).or_default();
        self
    }

    /// Stores a file with `mtime_secs` seconds past the epoch as its
    /// modification time. Replaces any previous content at `path`.
    pub fn add_file(
        &mut self,
        path: impl Into<PathBuf>,
        mtime_secs: u64,
        data: impl Into<Vec<u8>>,
    ) -> &mut Self {
        let path = path.into();
        self.register_child(&path);
        self.files.insert(
            path,
            MemoryFile {
                data: data.into(),
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs),
            },
        );
        self
    }

    /// Drops a file's content but leaves it listed in its directory,
    /// like a file deleted between scan and encode.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.files.remove(path.as_ref());
        self
    }

    fn register_child(&mut self, path: &Path) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if !parent.as_os_str().is_empty() && !self.listings.contains_key(parent) {
            self.add_dir(parent.to_path_buf());
        }
        let children = self.listings.entry(parent.to_path_buf()).or_default();
        if !children.iter().any(|c| c.as_os_str() == name) {
            children.push(name.to_os_string());
        }
    }

    fn entry_for(&self, dir: &Path, name: &OsStr) -> DirEntryInfo {
        match self.files.get(&dir.join(name)) {
            Some(file) => DirEntryInfo {
                name: name.to_os_string(),
                is_dir: false,
                size: file.data.len() as u64,
                modified: file.modified,
            },
            None => DirEntryInfo {
                name: name.to_os_string(),
                is_dir: true,
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            },
        }
    }
}

impl Filesystem for MemoryFs {
    type Reader = Cursor<Vec<u8>>;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let names = self.listings.get(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", path.display()),
            )
        })?;
        Ok(names.iter().map(|n| self.entry_for(path, n)).collect())
    }

    fn open_for_read(&self, path: &Path) -> io::Result<Cursor<Vec<u8>>> {
        match self.files.get(path) {
            Some(file) => Ok(Cursor::new(file.data.clone())),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )),
        }
    }
}

#[cfg(test)]
mod test_memory_fs {
    use super::*;

    #[test]
    fn lists_children_in_insertion_order() {
        let mut fs = MemoryFs::new();
        fs.add_file("data/z.txt", 10, "z")
            .add_file("data/a.txt", 11, "a")
            .add_dir("data/m");

        let names: Vec<_> = fs
            .list_entries(Path::new("data"))
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["z.txt", "a.txt", "m"]);
    }

    #[test]
    fn creates_missing_ancestors() {
        let mut fs = MemoryFs::new();
        fs.add_file("data/x/y/a.txt", 0, "a");

        let top = fs.list_entries(Path::new("data")).unwrap();
        assert_eq!(top.len(), 1);
        assert!(top[0].is_dir);
        assert_eq!(top[0].name, OsString::from("x"));
        assert!(!fs.list_entries(Path::new("data/x/y")).unwrap()[0].is_dir);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let fs = MemoryFs::new();
        let err = fs.list_entries(Path::new("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn reads_back_file_bytes_and_mtime() {
        let mut fs = MemoryFs::new();
        fs.add_file("data/a.txt", 1000, "hello");

        let mut buf = Vec::new();
        fs.open_for_read(Path::new("data/a.txt"))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"hello");

        let listed = fs.list_entries(Path::new("data")).unwrap();
        assert_eq!(listed[0].size, 5);
        assert_eq!(
            listed[0].modified,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1000)
        );
    }

    #[test]
    fn removed_file_stays_listed_but_cannot_be_opened() {
        let mut fs = MemoryFs::new();
        fs.add_file("data/a.txt", 0, "hello");
        fs.remove_file("data/a.txt");

        assert_eq!(fs.list_entries(Path::new("data")).unwrap().len(), 1);
        let err = fs.open_for_read(Path::new("data/a.txt")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
