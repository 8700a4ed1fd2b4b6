//! Extraction of the trusted script hash from the served index document.
//!
//! The build output embeds exactly one `'sha256-<44 base64 chars>'` token in
//! `index.html`. It is read once at startup and placed into every
//! Content-Security-Policy header the secure listener sends.

use std::fmt;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use crate::error::ScriptHashError;
use crate::vfs::{VirtualDirectory, VirtualFile};

/// Path of the index document, relative to the served root.
pub const INDEX_PATH: &str = "/index.html";

const TOKEN_PREFIX: &[u8] = b"'sha256-";
const DIGEST_LEN: usize = 44;

/// Length of a complete token, quotes included.
pub const TOKEN_LEN: usize = TOKEN_PREFIX.len() + DIGEST_LEN + 1;

/// A CSP source expression for a single trusted script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHash(String);

impl ScriptHash {
    /// The `'none'` source, sent where no exact hash is trusted.
    pub fn none() -> Self {
        Self("'none'".to_string())
    }

    /// Accept `token` only if it is exactly one well-formed hash token.
    pub fn parse(token: &str) -> Option<Self> {
        let bytes = token.as_bytes();
        let mut scanner = TokenScanner::default();
        let complete = bytes.len() == TOKEN_LEN
            && bytes
                .iter()
                .enumerate()
                .map(|(offset, &byte)| scanner.push(offset as u64, byte))
                .last()
                .flatten()
                == Some(0);
        complete.then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_digest_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=')
}

/// Incremental matcher for the token grammar.
///
/// Only the opening quote can begin a token and digest bytes never include a
/// quote, so on a mismatch the only possible restart point is the current byte.
#[derive(Debug, Default)]
struct TokenScanner {
    matched: usize,
    start: u64,
}

impl TokenScanner {
    fn accepts(&self, byte: u8) -> bool {
        match self.matched {
            n if n < TOKEN_PREFIX.len() => TOKEN_PREFIX[n] == byte,
            n if n < TOKEN_PREFIX.len() + DIGEST_LEN => is_digest_byte(byte),
            _ => byte == b'\'',
        }
    }

    /// Feed the byte at `offset`. Returns the start offset of the token that
    /// this byte completes, if any.
    fn push(&mut self, offset: u64, byte: u8) -> Option<u64> {
        if self.accepts(byte) {
            if self.matched == 0 {
                self.start = offset;
            }
            self.matched += 1;
            if self.matched == TOKEN_LEN {
                self.matched = 0;
                return Some(self.start);
            }
        } else if byte == b'\'' {
            self.start = offset;
            self.matched = 1;
        } else {
            self.matched = 0;
        }
        None
    }
}

/// Stream `reader` and return the byte offset of the first token.
fn find_token(reader: impl Read) -> io::Result<Option<u64>> {
    let mut scanner = TokenScanner::default();
    for (offset, byte) in reader.bytes().enumerate() {
        if let Some(start) = scanner.push(offset as u64, byte?) {
            return Ok(Some(start));
        }
    }
    Ok(None)
}

fn read_token(index: &mut VirtualFile) -> Result<ScriptHash, ScriptHashError> {
    let start = find_token(BufReader::new(&mut *index))
        .map_err(ScriptHashError::IndexReadFailed)?
        .ok_or(ScriptHashError::HashNotFound)?;

    index
        .seek(SeekFrom::Start(start))
        .map_err(ScriptHashError::HashRelocationFailed)?;
    let mut token = [0u8; TOKEN_LEN];
    index
        .read_exact(&mut token)
        .map_err(ScriptHashError::HashRelocationFailed)?;

    std::str::from_utf8(&token)
        .ok()
        .and_then(ScriptHash::parse)
        .ok_or_else(|| {
            ScriptHashError::HashRelocationFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                "index file changed while reading script hash",
            ))
        })
}

/// Find the script hash in the index document of `dir`.
///
/// The document is opened through `dir`, so it honours the same root
/// remapping as normal serving. The file is closed on every path out.
pub fn extract_script_hash(dir: &VirtualDirectory) -> Result<ScriptHash, ScriptHashError> {
    let mut index = dir
        .open(INDEX_PATH)
        .map_err(ScriptHashError::IndexOpenFailed)?;

    let result = read_token(&mut index);

    if let Err(err) = index.close() {
        tracing::warn!(error = %err, "Failed to close index file");
    }

    if let Ok(hash) = &result {
        tracing::debug!(hash = %hash, "Extracted script hash");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfsError;
    use crate::vfs::{File, FileInfo, FileMask, FileSystem, MemoryFileSystem, RootType};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const HASH: &str = "'sha256-AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA='";

    fn directory(contents: &str) -> VirtualDirectory {
        let fs = MemoryFileSystem::new().with_file("build/index.html", contents);
        VirtualDirectory::new(Arc::new(FileMask::wrap(Arc::new(fs), "build")))
    }

    #[test]
    fn test_extracts_exact_token() {
        let hash = extract_script_hash(&directory(HASH)).unwrap();
        assert_eq!(hash.as_str(), HASH);
        assert_eq!(hash.as_str().len(), 53);
    }

    #[test]
    fn test_extracts_token_from_document() {
        let html = format!(
            "<!doctype html><meta http-equiv=\"Content-Security-Policy\" \
             content=\"script-src {HASH}\"><script>run()</script>"
        );
        assert_eq!(extract_script_hash(&directory(&html)).unwrap().as_str(), HASH);
    }

    #[test]
    fn test_skips_malformed_candidates() {
        let other = "'sha256-BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB='";
        let html = format!("'sha256-short' 'sha256-{}' '{other}", "C".repeat(45));
        assert_eq!(extract_script_hash(&directory(&html)).unwrap().as_str(), other);
    }

    #[test]
    fn test_restarts_on_quote_inside_candidate() {
        let html = format!("'sha256-abc{HASH}");
        assert_eq!(extract_script_hash(&directory(&html)).unwrap().as_str(), HASH);
    }

    #[test]
    fn test_empty_index_has_no_hash() {
        assert!(matches!(
            extract_script_hash(&directory("")),
            Err(ScriptHashError::HashNotFound)
        ));
    }

    #[test]
    fn test_missing_index() {
        let dir = VirtualDirectory::new(Arc::new(MemoryFileSystem::new()));
        match extract_script_hash(&dir) {
            Err(ScriptHashError::IndexOpenFailed(VfsError::Io(err))) => {
                assert_eq!(err.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_filesystem() {
        assert!(matches!(
            extract_script_hash(&VirtualDirectory::default()),
            Err(ScriptHashError::IndexOpenFailed(VfsError::NilFilesystem))
        ));
    }

    #[test]
    fn test_parse() {
        assert!(ScriptHash::parse(HASH).is_some());
        assert!(ScriptHash::parse(&HASH[1..]).is_none());
        assert!(ScriptHash::parse(&format!("{HASH} ")).is_none());
        assert!(ScriptHash::parse("'none'").is_none());
        assert_eq!(ScriptHash::none().as_str(), "'none'");
    }

    /// Serves one scripted file and counts how often it is closed.
    #[derive(Debug)]
    struct ScriptedFs {
        contents: &'static str,
        seek_fails: bool,
        closes: Arc<AtomicUsize>,
    }

    struct ScriptedFile {
        data: Cursor<&'static str>,
        seek_fails: bool,
        closes: Arc<AtomicUsize>,
    }

    impl io::Read for ScriptedFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.read(buf)
        }
    }

    impl io::Seek for ScriptedFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if self.seek_fails {
                return Err(io::Error::other("seek failed"));
            }
            self.data.seek(pos)
        }
    }

    impl File for ScriptedFile {
        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl FileSystem for ScriptedFs {
        fn open(&self, _path: &str) -> io::Result<Box<dyn File>> {
            Ok(Box::new(ScriptedFile {
                data: Cursor::new(self.contents),
                seek_fails: self.seek_fails,
                closes: self.closes.clone(),
            }))
        }

        fn stat(&self, path: &str) -> io::Result<FileInfo> {
            Ok(FileInfo::file(path, self.contents.len() as u64, None))
        }

        fn lstat(&self, path: &str) -> io::Result<FileInfo> {
            self.stat(path)
        }

        fn read_dir(&self, _path: &str) -> io::Result<Vec<FileInfo>> {
            Ok(Vec::new())
        }

        fn root_type(&self, _path: &str) -> RootType {
            RootType::Unknown
        }
    }

    impl fmt::Display for ScriptedFs {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("scripted")
        }
    }

    fn scripted(contents: &'static str, seek_fails: bool) -> (VirtualDirectory, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let fs = ScriptedFs {
            contents,
            seek_fails,
            closes: closes.clone(),
        };
        (VirtualDirectory::new(Arc::new(fs)), closes)
    }

    #[test]
    fn test_seek_failure_is_relocation_error() {
        let (dir, closes) = scripted(HASH, true);
        assert!(matches!(
            extract_script_hash(&dir),
            Err(ScriptHashError::HashRelocationFailed(_))
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_index_closed_on_every_path() {
        let (dir, closes) = scripted(HASH, false);
        extract_script_hash(&dir).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let (dir, closes) = scripted("<html></html>", false);
        assert!(extract_script_hash(&dir).is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
