//! # Extension API
//!
//! Types shared between the extension host and the extensions it loads.
//! An extension is compiled as a dynamic library against this crate, exports
//! a constructor with [`declare_extension!`], and is driven by the host
//! through the [`Extension`] trait.
//!
//! ## Lifecycle
//!
//! 1. **Load**: the host reads the extension's [`Descriptor`], checks its hard
//!    dependencies, opens the image, and binds the symbols the extension
//!    [imports](Extension::imports) via [`Extension::link`].
//! 2. **Enable**: [`Extension::on_enable`] runs, then every [`Listener`] returned
//!    by [`Extension::listeners`] is registered for dispatch.
//! 3. **Disable**: observers are told first, then [`Extension::on_disable`] runs
//!    and all of the extension's handlers and exported symbols are dropped.
//!
//! Failures in `on_enable`/`on_disable` are logged by the host and never stop
//! other extensions from changing state.
//!
//! ## Writing an extension
//!
//! ```rust
//! use extension_api::*;
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! impl Greeter {
//!     fn new() -> Self {
//!         Self
//!     }
//! }
//!
//! struct JoinListener;
//!
//! impl Listener for JoinListener {
//!     fn routines(&self) -> Vec<Routine> {
//!         vec![Routine::handler("announce", |occurrence: &mut ExtensionEnableOccurrence| {
//!             println!("{} is up", occurrence.extension);
//!             Ok(())
//!         })]
//!     }
//! }
//!
//! #[async_trait]
//! impl Extension for Greeter {
//!     async fn on_enable(&mut self, context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
//!         context.log(LogLevel::Info, "greeter ready");
//!         Ok(())
//!     }
//!
//!     fn listeners(&self) -> Vec<Arc<dyn Listener>> {
//!         vec![Arc::new(JoinListener)]
//!     }
//! }
//!
//! declare_extension!(Greeter);
//! ```

pub mod descriptor;
pub mod occurrence;
pub mod serialization;
pub mod symbols;

pub use async_trait::async_trait;
pub use descriptor::{Descriptor, DescriptorError};
pub use occurrence::{
    ExtensionDisableOccurrence, ExtensionEnableOccurrence, HandlerMarker, Listener, Occurrence,
    Priority, Routine, RoutineBody, ROOT_KIND,
};
pub use serialization::{Deserializer, SerializableType};
pub use symbols::{ResolvedImports, SymbolTable, SymbolValue};

use std::path::Path;
use std::sync::Arc;

#[doc(hidden)]
pub use tracing as __tracing;

/// ABI version of this crate. The native loader refuses images built against
/// a different version.
pub const EXTENSION_API_VERSION: u32 = 4;

/// Errors raised by extension code.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// Generic failure reported by the extension
    #[error("Extension failure: {0}")]
    Failed(String),
    /// A handler received an occurrence of a type it was not written for
    #[error("Expected occurrence '{expected}', got '{found}'")]
    OccurrenceMismatch { expected: String, found: String },
    /// A required import was not supplied at link time
    #[error("Missing import: {0}")]
    MissingImport(String),
    /// The extension panicked
    #[error("Extension panicked: {0}")]
    Panicked(String),
}

impl ExtensionError {
    /// Converts a panic payload into an error, keeping the message when it is a string.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ExtensionError::Panicked(message)
    }
}

/// Log levels extensions can report through their context.
#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Host services available to an extension while it is enabled or disabling.
pub trait ExtensionContext: Send + Sync {
    /// Descriptor the extension was loaded with.
    fn descriptor(&self) -> &Descriptor;

    /// The extension's data folder. It may not exist yet.
    fn data_folder(&self) -> &Path;

    /// Looks up a symbol exported by the host or by any loaded extension.
    /// Host internals may be named the way the extension was built against;
    /// the host translates them to their current names.
    fn lookup_symbol(&self, name: &str) -> Option<SymbolValue>;

    /// Logs a message attributed to the extension.
    fn log(&self, level: LogLevel, message: &str);
}

/// The contract every extension implements.
///
/// All methods have defaults so that an extension only overrides what it uses.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Host symbols this extension references, named in the naming scheme it
    /// was written against. The host resolves them before [`link`](Self::link).
    fn imports(&self) -> Vec<String> {
        Vec::new()
    }

    /// Symbols this extension defines. They form its private scope and are
    /// visible to other extensions through the host's global lookup.
    fn exports(&self) -> SymbolTable {
        SymbolTable::new()
    }

    /// Types this extension can restore from configuration. Registered
    /// host-wide from load until the extension is disabled.
    fn serializable_types(&self) -> Vec<SerializableType> {
        Vec::new()
    }

    /// Receives the resolved imports. Called once, during load.
    fn link(&mut self, _imports: &ResolvedImports) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_enable(&mut self, _context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_disable(&mut self, _context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Listeners to register once the extension is enabled.
    fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        Vec::new()
    }
}

/// Exports the C-linkage entry points the native loader looks for.
///
/// The type must provide `fn new() -> Self`. This generates:
/// - `extension_api_version()` returning [`EXTENSION_API_VERSION`]
/// - `create_extension()` returning a boxed instance, or null if construction panicked
#[macro_export]
macro_rules! declare_extension {
    ($extension_type:ty) => {
        #[no_mangle]
        pub extern "C" fn extension_api_version() -> u32 {
            $crate::EXTENSION_API_VERSION
        }

        /// # Safety
        ///
        /// The returned pointer must be reclaimed with `Box::from_raw` by a host
        /// built against the same `extension_api` version.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn create_extension() -> *mut dyn $crate::Extension {
            match ::std::panic::catch_unwind(|| {
                let extension: Box<dyn $crate::Extension> = Box::new(<$extension_type>::new());
                Box::into_raw(extension)
            }) {
                Ok(extension) => extension,
                Err(payload) => {
                    let err = $crate::ExtensionError::from_panic(payload);
                    $crate::__tracing::error!("Extension construction failed: {}", err);
                    ::std::ptr::null_mut::<$extension_type>() as *mut dyn $crate::Extension
                }
            }
        }
    };
}
