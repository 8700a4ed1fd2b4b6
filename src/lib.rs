//! Bastion - HTTPS origin server for single-page application builds
//!
//! Serves a static site build over TLS with a fixed security posture, and
//! redirects plain HTTP to HTTPS. The script hash embedded in the site's
//! `index.html` is read once at startup and pinned into every
//! Content-Security-Policy header.

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod script_hash;
pub mod vfs;

pub use config::{Options, Settings};
pub use error::*;
pub use crate::http::{AxumServerLayer, NetworkLayer, Server};
pub use script_hash::{extract_script_hash, ScriptHash};
