//! Storage-independent filesystem abstraction.
//!
//! The HTTP layer never touches a concrete store. It talks to a [`FileSystem`]
//! through the [`VirtualDirectory`] adapter, and the adapter chain is built up
//! by wrapping: a backing store ([`OsFileSystem`], [`MemoryFileSystem`] or
//! anything else implementing the trait), then a [`FileMask`] that remaps the
//! document root, then the directory adapter consumed by the static handler.

mod dir;
mod mask;
mod memory;
mod os;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

pub use dir::{VirtualDirectory, VirtualFile};
pub use mask::FileMask;
pub use memory::MemoryFileSystem;
pub use os::OsFileSystem;

/// Filesystem shared by every component below the server.
pub type SharedFileSystem = Arc<dyn FileSystem>;

/// Metadata for a single entry in a [`FileSystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

impl FileInfo {
    pub fn file(name: impl Into<String>, size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
            modified,
        }
    }

    pub fn directory(name: impl Into<String>, modified: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_dir: true,
            modified,
        }
    }
}

/// Kind of storage backing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootType {
    Os,
    Memory,
    Unknown,
}

/// An open, readable and seekable file.
pub trait File: io::Read + io::Seek + Send {
    /// Release the file. Dropping also releases it, but only `close` reports
    /// a failure to do so.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl File for std::fs::File {}

/// Capability set every backing store provides.
pub trait FileSystem: fmt::Display + fmt::Debug + Send + Sync {
    fn open(&self, path: &str) -> io::Result<Box<dyn File>>;

    fn stat(&self, path: &str) -> io::Result<FileInfo>;

    fn lstat(&self, path: &str) -> io::Result<FileInfo>;

    /// List the entries of a directory, sorted by name.
    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>>;

    fn root_type(&self, path: &str) -> RootType;
}

/// Handle returned when a directory is opened.
///
/// Directories have no byte content; listing and stat go through the owning
/// filesystem instead.
#[derive(Debug, Default)]
pub(crate) struct DirectoryHandle;

impl io::Read for DirectoryHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot read from a directory",
        ))
    }
}

impl io::Seek for DirectoryHandle {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

impl File for DirectoryHandle {}

pub(crate) fn not_found(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("file does not exist: {path}"),
    )
}
