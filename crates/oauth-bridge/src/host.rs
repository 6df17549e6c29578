//! Host backend handle.
//!
//! The host's store, collection schema and signer usually become available
//! only after the host finishes its own startup. Flow components hold a
//! [`HostHandle`] from construction; the backend is injected into it once,
//! and every request that needs it before then gets
//! [`BridgeError::NotInitialized`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::BridgeResult;
use crate::error::BridgeError;
use crate::minter::{SessionTokenMinter, TokenSigner};
use crate::schema::CollectionSchema;
use crate::store::UserStore;

/// Host collaborators needed at request time.
#[derive(Clone)]
pub struct HostBackend {
    /// User store.
    pub store: Arc<dyn UserStore>,

    /// Schema of the user collection, with bridge fields installed.
    pub schema: CollectionSchema,

    /// Session token minter bound to the host secret and cookie prefix.
    pub minter: SessionTokenMinter,
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackend")
            .field("schema", &self.schema.slug)
            .field("minter", &self.minter)
            .finish_non_exhaustive()
    }
}

impl HostBackend {
    /// Creates a backend.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        schema: CollectionSchema,
        signer: Arc<dyn TokenSigner>,
        cookie_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            schema,
            minter: SessionTokenMinter::new(signer, cookie_prefix),
        }
    }
}

/// Write-once slot for the [`HostBackend`].
///
/// Cloning shares the slot.
#[derive(Clone, Default)]
pub struct HostHandle {
    inner: Arc<OnceLock<Arc<HostBackend>>>,
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl HostHandle {
    /// Creates an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects the backend.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if a backend was already injected.
    pub fn inject(&self, backend: HostBackend) -> BridgeResult<()> {
        self.inner
            .set(Arc::new(backend))
            .map_err(|_| BridgeError::configuration("host backend already injected"))?;
        tracing::info!("Host backend injected");
        Ok(())
    }

    /// Returns the backend.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NotInitialized` until [`inject`](Self::inject)
    /// has been called.
    pub fn get(&self) -> BridgeResult<Arc<HostBackend>> {
        self.inner.get().cloned().ok_or(BridgeError::NotInitialized)
    }

    /// Returns `true` once the backend has been injected.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}
