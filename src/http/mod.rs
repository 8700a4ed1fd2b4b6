//! HTTP server module with TLS support.
//!
//! The server runs two listeners:
//! - **Secure**: HTTPS, serves static content from a virtual filesystem with
//!   a fixed set of security headers
//! - **Insecure**: plain HTTP, permanently redirects everything to HTTPS
//!
//! Also included:
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Certificate hot-reload via SIGHUP

mod headers;
mod layer;
mod redirect;
mod server;
mod shutdown;
mod static_files;

pub use headers::{is_script_path, set_security_headers, SecurityHeaders};
pub use layer::{AxumServerLayer, NetworkLayer};
pub use redirect::{https_location, redirect_router};
pub use server::Server;
pub use shutdown::setup_shutdown_handler;
pub use static_files::file_server;
