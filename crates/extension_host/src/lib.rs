//! Extension host: loading, isolation and lifecycle management for
//! dynamically loaded extensions.
//!
//! Provides:
//! - per-extension symbol scopes, with host internals resolved through a
//!   cross-version [`SymbolRemapTable`]
//! - dependency-checked loading and ordered enable/disable
//! - listener registration into a priority-ordered [`HandlerTable`], with
//!   deprecated-occurrence diagnostics governed by [`WarningState`]
//! - a host-wide [`SerializationRegistry`] of the types extensions can
//!   restore from configuration
//!
//! ```rust,no_run
//! use extension_host::{ExtensionLoader, LoaderConfig};
//!
//! # async fn run() {
//! let loader = ExtensionLoader::new(LoaderConfig::default().with_directory("plugins"));
//! let report = loader.load_directory().await;
//! println!("loaded {:?}", report.loaded);
//! loader.enable_all().await;
//! // ... host runs, dispatching occurrences through `loader.dispatch`
//! loader.disable_all().await;
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod data_folder;
pub mod dispatch;
pub mod error;
pub mod kinds;
pub mod loader;
pub mod registration;
pub mod registry;
pub mod remap;
pub mod resolver;
pub mod serialization;
pub mod timings;
pub mod unit;
pub mod warning;

pub use archive::CodeLocation;
pub use config::LoaderConfig;
pub use dispatch::{DispatchReport, Executor, HandlerTable, RegisteredHandler};
pub use error::{KindError, LifecycleError, LoadError, RegistrationError, RemapError, SerializationError};
pub use kinds::{Deprecation, KindSpec, OccurrenceKinds};
pub use loader::{ExtensionLoader, ExtensionStats, LoadReport, LoaderStats};
pub use registration::{ListenerRegistrar, Registration};
pub use registry::UnitRegistry;
pub use remap::{relocated, DirectoryRemapSource, RemapSource, SymbolRemapCache, SymbolRemapTable};
pub use serialization::SerializationRegistry;
pub use timings::{ProbeStats, Timings};
pub use unit::{BuiltinImageLoader, ExtensionImage, ImageBacking, ImageLoader, IsolatedCodeUnit, NativeImageLoader};
pub use warning::WarningState;

pub use extension_api;
