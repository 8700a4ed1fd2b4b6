//! Error types for every layer of the server.
//!
//! Adapter-level errors ([`VfsError`]) are local: the static file handler turns
//! them into HTTP error responses. Everything else is fatal to startup and is
//! returned from [`crate::http::Server::start`] as a [`ServerError`].

use std::io;

/// Failures of the virtual directory adapters.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("cannot access a file on a missing file system")]
    NilFilesystem,

    #[error("cannot operate on a missing file")]
    NilFile,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}

/// Failures extracting the script hash from the served index document.
#[derive(Debug, thiserror::Error)]
pub enum ScriptHashError {
    #[error("could not open index file: {0}")]
    IndexOpenFailed(#[source] VfsError),

    #[error("could not read index file: {0}")]
    IndexReadFailed(#[source] io::Error),

    #[error("could not find script hash in index file")]
    HashNotFound,

    #[error("could not navigate to specified location in index file: {0}")]
    HashRelocationFailed(#[source] io::Error),
}

/// Failures reported by a network layer while binding or serving.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("{0}")]
    Bind(#[source] io::Error),

    #[error("failed to load TLS certificates: {0}")]
    Tls(#[source] io::Error),

    #[error("{0}")]
    Serve(#[source] io::Error),
}

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("could not read script hash: {0}")]
    ScriptHashUnavailable(#[from] ScriptHashError),

    #[error("http server closed unexpectedly: {0}")]
    ClosedUnexpectedly(#[from] ListenError),

    #[error("invalid security header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
