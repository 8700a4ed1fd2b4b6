//! Disk-backed filesystem rooted at a host directory.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{DirectoryHandle, File, FileInfo, FileSystem, RootType};

/// A [`FileSystem`] over a directory on the host.
///
/// Logical paths are joined under the root; parent-directory components are
/// rejected so no lookup can leave the root.
#[derive(Debug, Clone)]
pub struct OsFileSystem {
    root: PathBuf,
}

impl OsFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("path escapes filesystem root: {path}"),
                    ));
                }
            }
        }
        Ok(resolved)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn file_info(name: String, metadata: &fs::Metadata) -> FileInfo {
    let modified = metadata.modified().ok();
    if metadata.is_dir() {
        FileInfo::directory(name, modified)
    } else {
        FileInfo::file(name, metadata.len(), modified)
    }
}

impl FileSystem for OsFileSystem {
    fn open(&self, path: &str) -> io::Result<Box<dyn File>> {
        let resolved = self.resolve(path)?;
        if fs::metadata(&resolved)?.is_dir() {
            return Ok(Box::new(DirectoryHandle));
        }
        Ok(Box::new(fs::File::open(resolved)?))
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let resolved = self.resolve(path)?;
        let metadata = fs::metadata(&resolved)?;
        Ok(file_info(entry_name(&resolved), &metadata))
    }

    fn lstat(&self, path: &str) -> io::Result<FileInfo> {
        let resolved = self.resolve(path)?;
        let metadata = fs::symlink_metadata(&resolved)?;
        Ok(file_info(entry_name(&resolved), &metadata))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let resolved = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(resolved)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(file_info(
                entry.file_name().to_string_lossy().into_owned(),
                &metadata,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn root_type(&self, _path: &str) -> RootType {
        RootType::Os
    }
}

impl fmt::Display for OsFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os({})", self.root.display())
    }
}
