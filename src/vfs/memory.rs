//! In-memory filesystem.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::SystemTime;

use super::{not_found, DirectoryHandle, File, FileInfo, FileSystem, RootType};

/// A read-only [`FileSystem`] holding file contents in memory.
///
/// Directories are implied by the files beneath them.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, MemoryEntry>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Arc<[u8]>,
    modified: SystemTime,
}

struct MemoryFile(Cursor<Arc<[u8]>>);

impl io::Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl io::Seek for MemoryFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl File for MemoryFile {}

/// Normalize to `a/b/c` form: no leading or trailing slash, no `.` segments.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryFileSystem::insert`].
    pub fn with_file(mut self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: &str, contents: impl AsRef<[u8]>) {
        self.files.insert(
            normalize(path),
            MemoryEntry {
                data: Arc::from(contents.as_ref()),
                modified: SystemTime::now(),
            },
        );
    }

    fn is_dir(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }
        let prefix = format!("{key}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }

    fn lookup(&self, path: &str) -> io::Result<FileInfo> {
        let key = normalize(path);
        if let Some(entry) = self.files.get(&key) {
            return Ok(FileInfo::file(
                base_name(&key),
                entry.data.len() as u64,
                Some(entry.modified),
            ));
        }
        if self.is_dir(&key) {
            return Ok(FileInfo::directory(base_name(&key), None));
        }
        Err(not_found(path))
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &str) -> io::Result<Box<dyn File>> {
        let key = normalize(path);
        if let Some(entry) = self.files.get(&key) {
            return Ok(Box::new(MemoryFile(Cursor::new(entry.data.clone()))));
        }
        if self.is_dir(&key) {
            return Ok(Box::new(DirectoryHandle));
        }
        Err(not_found(path))
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        self.lookup(path)
    }

    fn lstat(&self, path: &str) -> io::Result<FileInfo> {
        self.lookup(path)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let key = normalize(path);
        if !self.is_dir(&key) {
            return Err(not_found(path));
        }
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };

        let mut entries: BTreeMap<&str, FileInfo> = BTreeMap::new();
        for (name, entry) in self.files.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    entries
                        .entry(child)
                        .or_insert_with(|| FileInfo::directory(child, None));
                }
                None => {
                    entries.insert(
                        rest,
                        FileInfo::file(rest, entry.data.len() as u64, Some(entry.modified)),
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    fn root_type(&self, _path: &str) -> RootType {
        RootType::Memory
    }
}

impl fmt::Display for MemoryFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory({} files)", self.files.len())
    }
}
