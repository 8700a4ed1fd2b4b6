//! Dual-listener server orchestration.
//!
//! One server owns two listeners sharing one configuration:
//! - **Insecure**: plain HTTP, redirects every request to HTTPS
//! - **Secure**: TLS, serves the site build with the security header set
//!
//! The script hash is read from the index document before either listener
//! binds, so no response can go out without it.

use std::sync::{Arc, OnceLock};

use axum::middleware;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{Options, Settings};
use crate::error::{ScriptHashError, ServerError};
use crate::middleware::request_id_layer;
use crate::script_hash::{extract_script_hash, ScriptHash};
use crate::vfs::{FileMask, SharedFileSystem, VirtualDirectory};

use super::headers::{script_content_type_layer, security_headers_layer, SecurityHeaders};
use super::redirect::redirect_router;
use super::NetworkLayer;

/// An HTTPS server for a static site plus its HTTP redirect listener.
pub struct Server {
    settings: Settings,
    script_hash: OnceLock<ScriptHash>,
    secure: Arc<dyn NetworkLayer>,
    insecure: Arc<dyn NetworkLayer>,
    directory: VirtualDirectory,
    file_server: Router,
}

impl Server {
    /// Resolve `options`, mask `fs` to the configured document root and build
    /// the file handler over it. Nothing is read or bound yet.
    pub fn new(
        options: &Options,
        fs: SharedFileSystem,
        secure: Arc<dyn NetworkLayer>,
        insecure: Arc<dyn NetworkLayer>,
    ) -> Self {
        let settings = options.resolve();
        let directory = VirtualDirectory::new(Arc::new(FileMask::wrap(
            fs,
            settings.static_content.clone(),
        )));
        let file_server = secure.file_server(directory.clone());

        tracing::debug!(
            address = %settings.address,
            port = settings.port,
            insecure_port = settings.insecure_port,
            static_content = %settings.static_content,
            "Server configured"
        );

        Self {
            settings,
            script_hash: OnceLock::new(),
            secure,
            insecure,
            directory,
            file_server,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The cached script hash, once [`Server::start`] has read it.
    pub fn script_hash(&self) -> Option<&ScriptHash> {
        self.script_hash.get()
    }

    /// Read the script hash on first use; later calls return the cached value.
    fn load_script_hash(&self) -> Result<ScriptHash, ScriptHashError> {
        if let Some(hash) = self.script_hash.get() {
            return Ok(hash.clone());
        }
        let hash = extract_script_hash(&self.directory)?;
        Ok(self.script_hash.get_or_init(|| hash).clone())
    }

    /// Router for the TLS listener.
    pub fn secure_router(&self, script_hash: &ScriptHash) -> Result<Router, ServerError> {
        let headers = SecurityHeaders::new(&self.settings.address, "https", script_hash)?;

        Ok(self
            .file_server
            .clone()
            .layer(middleware::from_fn(script_content_type_layer))
            .layer(middleware::from_fn_with_state(
                Arc::new(headers),
                security_headers_layer,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state("https", request_id_layer)))
    }

    /// Router for the redirect listener. It never trusts an exact script hash.
    pub fn insecure_router(&self) -> Result<Router, ServerError> {
        let headers = SecurityHeaders::new(&self.settings.address, "http", &ScriptHash::none())?;

        Ok(redirect_router(&self.settings.address)
            .layer(middleware::from_fn_with_state(
                Arc::new(headers),
                security_headers_layer,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state("http", request_id_layer)))
    }

    /// Read the script hash, then run both listeners.
    ///
    /// Returns when the secure listener stops. The redirect listener runs as a
    /// background task that is aborted at that point; its own failure is
    /// logged and otherwise ignored. If the script hash cannot be read, no
    /// listener is started.
    pub async fn start(&self) -> Result<(), ServerError> {
        let script_hash = self.load_script_hash().map_err(|e| {
            let err = ServerError::from(e);
            tracing::error!(error = %err, "Refusing to start");
            err
        })?;

        let (secure_app, insecure_app) = self
            .secure_router(&script_hash)
            .and_then(|secure| Ok((secure, self.insecure_router()?)))
            .map_err(|e| {
                tracing::error!(error = %e, "Refusing to start");
                e
            })?;

        let insecure = self.insecure.clone();
        let insecure_addr = self.settings.insecure_addr();
        let redirect_task = tokio::spawn(async move {
            tracing::info!(addr = %insecure_addr, "Starting HTTP->HTTPS redirect listener");
            match insecure.listen_and_serve(&insecure_addr, insecure_app).await {
                Ok(()) => tracing::debug!("HTTP redirect listener stopped"),
                Err(e) => tracing::error!(error = %e, "HTTP redirect listener failed"),
            }
        });

        let result = self
            .secure
            .listen_and_serve_tls(
                &self.settings.secure_addr(),
                &self.settings.cert_file,
                &self.settings.key_file,
                secure_app,
            )
            .await;

        redirect_task.abort();

        result.map_err(|e| {
            let err = ServerError::from(e);
            tracing::error!(error = %err, "HTTPS listener stopped");
            err
        })
    }
}
