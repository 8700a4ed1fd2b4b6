//! Path-remapping filesystem.

use std::fmt;
use std::io;
use std::sync::Arc;

use super::{File, FileInfo, FileSystem, OsFileSystem, RootType, SharedFileSystem};

/// Entry document served for the site root.
pub const INDEX_DOCUMENT: &str = "/index.html";

/// Encloses a filesystem in a new one with a different root node.
///
/// Every lookup is rewritten to `root + path` and delegated. Remapping is plain
/// string concatenation with no normalization, so masks compose predictably:
/// `FileMask::wrap(FileMask::wrap(fs, "a"), "b")` opens `"x"` as `"abx"`.
/// `open` alone substitutes [`INDEX_DOCUMENT`] for an empty or `/` path.
#[derive(Debug, Clone)]
pub struct FileMask {
    inner: Option<SharedFileSystem>,
    root: String,
}

impl FileMask {
    pub fn wrap(inner: SharedFileSystem, root: impl Into<String>) -> Self {
        Self {
            inner: Some(inner),
            root: root.into(),
        }
    }

    /// A mask with no inner filesystem. Lookups go to the working directory.
    pub fn detached(root: impl Into<String>) -> Self {
        Self {
            inner: None,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn target(&self, path: &str) -> (SharedFileSystem, String) {
        let fs = self
            .inner
            .clone()
            .unwrap_or_else(|| Arc::new(OsFileSystem::new(".")));
        (fs, format!("{}{}", self.root, path))
    }
}

impl FileSystem for FileMask {
    fn open(&self, path: &str) -> io::Result<Box<dyn File>> {
        let path = if path.is_empty() || path == "/" {
            INDEX_DOCUMENT
        } else {
            path
        };
        let (fs, path) = self.target(path);
        fs.open(&path)
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let (fs, path) = self.target(path);
        fs.stat(&path)
    }

    fn lstat(&self, path: &str) -> io::Result<FileInfo> {
        let (fs, path) = self.target(path);
        fs.lstat(&path)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let (fs, path) = self.target(path);
        fs.read_dir(&path)
    }

    fn root_type(&self, path: &str) -> RootType {
        let (fs, path) = self.target(path);
        fs.root_type(&path)
    }
}

impl fmt::Display for FileMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fs, _) = self.target("");
        fmt::Display::fmt(&*fs, f)
    }
}
