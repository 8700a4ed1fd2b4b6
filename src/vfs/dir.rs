//! Adapters from a [`FileSystem`] to the shape the static file handler consumes.

use std::fmt;
use std::io;

use super::{File, FileInfo, SharedFileSystem};
use crate::error::VfsError;

/// A virtual directory over a filesystem.
///
/// The default value has no filesystem; every open on it fails with
/// [`VfsError::NilFilesystem`] instead of touching storage.
#[derive(Debug, Clone, Default)]
pub struct VirtualDirectory {
    fs: Option<SharedFileSystem>,
}

impl VirtualDirectory {
    pub fn new(fs: SharedFileSystem) -> Self {
        Self { fs: Some(fs) }
    }

    /// Open the file at `path`, remembering the path and filesystem for later
    /// stat and listing queries.
    pub fn open(&self, path: &str) -> Result<VirtualFile, VfsError> {
        let fs = self.fs.as_ref().ok_or(VfsError::NilFilesystem)?;
        let file = fs.open(path)?;
        Ok(VirtualFile {
            path: path.to_string(),
            file: Some(file),
            fs: Some(fs.clone()),
        })
    }
}

/// An open file plus the filesystem it came from.
///
/// The file handle alone cannot list its siblings, so listing and stat go back
/// through the owning filesystem at the remembered path.
pub struct VirtualFile {
    path: String,
    file: Option<Box<dyn File>>,
    fs: Option<SharedFileSystem>,
}

impl VirtualFile {
    /// Assemble a handle from parts. Missing parts surface as typed errors
    /// from the accessors rather than panics.
    pub fn from_parts(
        path: impl Into<String>,
        file: Option<Box<dyn File>>,
        fs: Option<SharedFileSystem>,
    ) -> Self {
        Self {
            path: path.into(),
            file,
            fs,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// List the directory at this handle's path.
    ///
    /// A non-zero `count` caps the number of entries returned; fewer entries
    /// than requested is normal exhaustion. Zero returns every entry.
    pub fn read_dir(&self, count: usize) -> Result<Vec<FileInfo>, VfsError> {
        let fs = self.fs.as_ref().ok_or(VfsError::NilFilesystem)?;
        let mut entries = fs.read_dir(&self.path)?;
        if count > 0 {
            entries.truncate(count);
        }
        Ok(entries)
    }

    /// Stat this handle's path.
    ///
    /// An empty path is never stat-able, not even as the root directory.
    pub fn stat(&self) -> Result<FileInfo, VfsError> {
        match &self.fs {
            Some(fs) if !self.path.is_empty() => Ok(fs.stat(&self.path)?),
            _ => Err(VfsError::NilFilesystem),
        }
    }

    /// Release the wrapped file. Closing a handle without a file, or closing
    /// twice, does nothing.
    pub fn close(&mut self) -> Result<(), VfsError> {
        match self.file.take() {
            Some(mut file) => Ok(file.close()?),
            None => Ok(()),
        }
    }

    fn file(&mut self) -> io::Result<&mut Box<dyn File>> {
        self.file.as_mut().ok_or_else(|| VfsError::NilFile.into())
    }
}

impl io::Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl io::Seek for VirtualFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }
}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .field("fs", &self.fs)
            .finish()
    }
}
