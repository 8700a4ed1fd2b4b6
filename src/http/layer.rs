//! Network layers the server listens through.
//!
//! The orchestrator only knows the [`NetworkLayer`] trait. Production uses
//! [`AxumServerLayer`]; tests substitute their own implementation.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::error::ListenError;
use crate::vfs::VirtualDirectory;

use super::shutdown;
use super::static_files;

/// A network on which to listen and serve HTTP.
#[async_trait]
pub trait NetworkLayer: Send + Sync {
    /// Serve plain HTTP on `addr` until the server stops.
    async fn listen_and_serve(&self, addr: &str, app: Router) -> Result<(), ListenError>;

    /// Serve HTTPS on `addr` with the PEM certificate and key until the server stops.
    async fn listen_and_serve_tls(
        &self,
        addr: &str,
        cert_file: &str,
        key_file: &str,
        app: Router,
    ) -> Result<(), ListenError>;

    /// Stop accepting connections and drain open ones for up to `grace`.
    async fn shutdown(&self, grace: Option<Duration>) -> Result<(), ListenError>;

    /// Build the handler that serves files out of `dir`.
    fn file_server(&self, dir: VirtualDirectory) -> Router {
        static_files::file_server(dir)
    }
}

/// [`NetworkLayer`] backed by `axum-server`.
///
/// Each layer owns one server handle, so use one layer per listener.
#[derive(Clone)]
pub struct AxumServerLayer {
    handle: Handle,
}

impl AxumServerLayer {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(),
        }
    }
}

impl Default for AxumServerLayer {
    fn default() -> Self {
        Self::new()
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, ListenError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(ListenError::Bind)?
        .next()
        .ok_or_else(|| {
            ListenError::Bind(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address found for {addr}"),
            ))
        })
}

#[async_trait]
impl NetworkLayer for AxumServerLayer {
    async fn listen_and_serve(&self, addr: &str, app: Router) -> Result<(), ListenError> {
        let addr = resolve(addr).await?;
        tracing::info!(%addr, "Starting HTTP server");

        axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(app.into_make_service())
            .await
            .map_err(ListenError::Serve)
    }

    async fn listen_and_serve_tls(
        &self,
        addr: &str,
        cert_file: &str,
        key_file: &str,
        app: Router,
    ) -> Result<(), ListenError> {
        let addr = resolve(addr).await?;
        tracing::info!(%addr, cert = %cert_file, key = %key_file, "Starting HTTPS server");

        let rustls_config = RustlsConfig::from_pem_file(cert_file, key_file)
            .await
            .map_err(ListenError::Tls)?;

        // Setup SIGHUP handler for certificate reload
        shutdown::setup_reload_handler(
            rustls_config.clone(),
            cert_file.to_string(),
            key_file.to_string(),
        );

        axum_server::bind_rustls(addr, rustls_config)
            .handle(self.handle.clone())
            .serve(app.into_make_service())
            .await
            .map_err(ListenError::Serve)
    }

    async fn shutdown(&self, grace: Option<Duration>) -> Result<(), ListenError> {
        self.handle.graceful_shutdown(grace);
        Ok(())
    }
}
