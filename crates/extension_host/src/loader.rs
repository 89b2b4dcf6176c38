//! Extension loader and lifecycle coordinator.
//!
//! An extension moves through `Unloaded → Loaded → Enabled → Disabled →
//! Unloaded`. Loading is all-or-nothing: a failed load leaves the registry
//! exactly as it was. Enabling and disabling never fail because of extension
//! code; errors and panics from the extension's hooks are logged with the
//! extension, its version and the operation, and the transition completes.

use crate::archive::CodeLocation;
use crate::config::LoaderConfig;
use crate::data_folder::prepare_data_folder;
use crate::dispatch::{DispatchReport, HandlerTable};
use crate::error::{LifecycleError, LoadError, RegistrationError};
use crate::kinds::OccurrenceKinds;
use crate::registration::ListenerRegistrar;
use crate::registry::UnitRegistry;
use crate::remap::{RemapSource, SymbolRemapCache};
use crate::resolver::check_hard_dependencies;
use crate::serialization::SerializationRegistry;
use crate::timings::Timings;
use crate::unit::{ImageLoader, ImportScope, IsolatedCodeUnit, NativeImageLoader};
use extension_api::{
    Descriptor, ExtensionContext, ExtensionDisableOccurrence, ExtensionEnableOccurrence, ExtensionError,
    Listener, LogLevel, Occurrence, SymbolTable, SymbolValue,
};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy)]
enum Hook {
    Enable,
    Disable,
}

impl Hook {
    fn operation(self) -> &'static str {
        match self {
            Hook::Enable => "enable",
            Hook::Disable => "disable",
        }
    }

    fn progressive(self) -> &'static str {
        match self {
            Hook::Enable => "enabling",
            Hook::Disable => "disabling",
        }
    }
}

/// Result of loading every image in the extension directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names loaded, in load order
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, LoadError)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionStats {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub handlers: usize,
    pub exports: usize,
    pub data_folder: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoaderStats {
    /// Extensions known to the loader, enabled or not
    pub known: usize,
    /// Extensions currently tracked by the registry
    pub active: usize,
    pub enabled: usize,
    pub handlers: usize,
    pub cached_symbols: usize,
    pub serializable_types: usize,
    pub extensions: Vec<ExtensionStats>,
}

/// Loads extensions and drives their lifecycle.
pub struct ExtensionLoader {
    config: LoaderConfig,
    images: Vec<Arc<dyn ImageLoader>>,
    host_symbols: Arc<SymbolTable>,
    remap: Arc<SymbolRemapCache>,
    kinds: Arc<OccurrenceKinds>,
    registry: Arc<UnitRegistry>,
    /// Every loaded extension in load order, enabled or not
    extensions: RwLock<IndexMap<String, Arc<IsolatedCodeUnit>>>,
    handlers: HandlerTable,
    registrar: ListenerRegistrar,
    serialization: SerializationRegistry,
    timings: Option<Arc<Timings>>,
}

impl ExtensionLoader {
    /// Creates a loader that opens native libraries and reads remap resources
    /// from `config.mappings_dir`.
    pub fn new(config: LoaderConfig) -> Self {
        let kinds = Arc::new(OccurrenceKinds::new());
        let timings = config.timings.then(|| Arc::new(Timings::new()));
        let remap = SymbolRemapCache::shared(
            config.mappings_dir.clone(),
            &config.host_version,
            config.relocation_prefix.as_deref(),
        );

        Self {
            images: vec![Arc::new(NativeImageLoader)],
            host_symbols: Arc::new(SymbolTable::new()),
            remap,
            registry: Arc::new(UnitRegistry::new()),
            extensions: RwLock::new(IndexMap::new()),
            handlers: HandlerTable::new(Arc::clone(&kinds)),
            registrar: ListenerRegistrar::new(Arc::clone(&kinds), config.warning_state, timings.clone()),
            serialization: SerializationRegistry::new(),
            kinds,
            timings,
            config,
        }
    }

    /// Adds an image loader, consulted before the ones already present.
    pub fn with_image_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.images.insert(0, Arc::new(loader));
        self
    }

    /// Symbols the host exposes to extension imports, named in the current scheme.
    pub fn with_host_symbols(mut self, symbols: SymbolTable) -> Self {
        self.host_symbols = Arc::new(symbols);
        self
    }

    pub fn with_remap_source(mut self, source: Arc<dyn RemapSource>) -> Self {
        self.remap = Arc::new(SymbolRemapCache::new(
            source,
            self.config.host_version.clone(),
            self.config.relocation_prefix.clone(),
        ));
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The occurrence kind registry. Host kinds are registered here before
    /// extensions that handle them are enabled.
    pub fn kinds(&self) -> &OccurrenceKinds {
        &self.kinds
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Types the loaded extensions can restore from configuration.
    pub fn serialization(&self) -> &SerializationRegistry {
        &self.serialization
    }

    pub fn timings(&self) -> Option<&Arc<Timings>> {
        self.timings.as_ref()
    }

    /// Loads the extension at `path` without enabling it.
    ///
    /// The descriptor is read and checked, the data folder migrated and the
    /// hard dependencies verified before any extension code runs. Then the
    /// image is opened, its imports bound, and the unit registered.
    ///
    /// # Arguments
    ///
    /// * `path` - Code location of the extension image
    ///
    /// # Returns
    ///
    /// The loaded, not yet enabled, unit.
    ///
    /// # Errors
    ///
    /// Any [`LoadError`]. On error the loader and registry are unchanged.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<IsolatedCodeUnit>, LoadError> {
        let location = CodeLocation::open(path)?;
        let descriptor = location.read_descriptor()?;
        debug!(
            extension = descriptor.name(),
            version = descriptor.version(),
            operation = "load",
            "Loading {} from {}",
            descriptor.full_name(),
            location.path().display()
        );

        if self.is_known(descriptor.name()) {
            return Err(LoadError::AlreadyLoaded(descriptor.name().to_string()));
        }
        let data_folder = prepare_data_folder(&location, &descriptor)?;
        check_hard_dependencies(&descriptor, &self.registry)?;

        let image_loader = self
            .images
            .iter()
            .find(|loader| loader.accepts(&location))
            .ok_or_else(|| LoadError::Image {
                extension: descriptor.full_name(),
                reason: format!("No image loader accepts {}", location.path().display()),
            })?;
        let image = image_loader.open(&location, &descriptor)?;

        let scope = ImportScope {
            remap: &self.remap,
            host: &self.host_symbols,
            registry: &self.registry,
        };
        let unit = Arc::new(IsolatedCodeUnit::build(descriptor, &location, data_folder, image, &scope)?);

        {
            let mut extensions = self.extensions.write();
            if extensions.contains_key(unit.name()) {
                return Err(LoadError::AlreadyLoaded(unit.name().to_string()));
            }
            self.registry.try_insert(Arc::clone(&unit))?;
            extensions.insert(unit.name().to_string(), Arc::clone(&unit));
        }
        self.serialization.register_all(unit.name(), unit.serializable_types());

        info!(
            extension = unit.name(),
            version = unit.descriptor().version(),
            operation = "load",
            "Loaded {}",
            unit.descriptor().full_name()
        );
        Ok(unit)
    }

    /// Image files in the extension directory that some image loader accepts,
    /// sorted by path.
    pub async fn discover(&self) -> Vec<PathBuf> {
        let directory = &self.config.directory;
        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Extension directory {} is not readable: {}", directory.display(), e);
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read directory entry in {}: {}", directory.display(), e);
                    break;
                }
            };
            let path = entry.path();
            if let Ok(location) = CodeLocation::open(&path) {
                if self.images.iter().any(|loader| loader.accepts(&location)) {
                    found.push(path);
                }
            }
        }
        found.sort();
        found
    }

    /// Loads every discovered image once, in path order. Failures are
    /// collected; an extension whose dependency sorts after it fails with
    /// `UnknownDependency`.
    pub async fn load_directory(&self) -> LoadReport {
        let discovered = self.discover().await;
        info!(
            "Loading {} extension images from {}",
            discovered.len(),
            self.config.directory.display()
        );

        let mut report = LoadReport::default();
        for path in discovered {
            match self.load(&path) {
                Ok(unit) => report.loaded.push(unit.name().to_string()),
                Err(e) => {
                    error!("Could not load '{}': {}", path.display(), e);
                    report.failed.push((path, e));
                }
            }
        }

        if !report.failed.is_empty() {
            warn!("Failed to load {} extensions", report.failed.len());
        }
        report
    }

    /// Enables a loaded extension. No-op when it is already enabled.
    ///
    /// Failures of the extension's own enable hook or listeners are logged,
    /// not returned; the extension counts as enabled either way.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotFound`] when no extension of that name is loaded.
    pub async fn enable(&self, name: &str) -> Result<(), LifecycleError> {
        let unit = self.known(name)?;
        if unit.is_enabled() {
            return Ok(());
        }
        let descriptor = Arc::clone(unit.descriptor());
        info!(
            extension = name,
            version = descriptor.version(),
            operation = "enable",
            "Enabling {}",
            descriptor.full_name()
        );

        if self.registry.track(Arc::clone(&unit)) {
            debug!(extension = name, "Re-tracked {} in the registry", descriptor.full_name());
        }
        self.serialization.register_all(name, unit.serializable_types());
        unit.set_enabled(true);

        self.run_hook(&unit, Hook::Enable).await;

        for listener in self.listeners_of(&unit).await {
            if let Err(e) = self.register_for(&unit, &listener) {
                error!(
                    extension = name,
                    version = descriptor.version(),
                    operation = "enable",
                    "Could not register listener {} for {}: {}",
                    listener.listener_name(),
                    descriptor.full_name(),
                    e
                );
            }
        }

        let mut occurrence = ExtensionEnableOccurrence {
            extension: name.to_string(),
            version: descriptor.version().to_string(),
        };
        self.handlers.dispatch(&mut occurrence);
        Ok(())
    }

    /// Disables an enabled extension: observers are told first, then its
    /// disable hook runs, then its handlers, registry entry and cached
    /// exports are dropped. No-op when it is not enabled.
    pub async fn disable(&self, name: &str) -> Result<(), LifecycleError> {
        let unit = self.known(name)?;
        if !unit.is_enabled() {
            return Ok(());
        }
        let descriptor = Arc::clone(unit.descriptor());
        info!(
            extension = name,
            version = descriptor.version(),
            operation = "disable",
            "Disabling {}",
            descriptor.full_name()
        );

        let mut occurrence = ExtensionDisableOccurrence {
            extension: name.to_string(),
            version: descriptor.version().to_string(),
        };
        self.handlers.dispatch(&mut occurrence);

        self.run_hook(&unit, Hook::Disable).await;
        unit.set_enabled(false);

        let removed = self.handlers.unregister_owner(name);
        self.registry.evict(name);
        self.serialization.unregister_owner(name);
        if let Some(timings) = &self.timings {
            timings.remove_with_prefix(&format!("Extension: {} ", descriptor.full_name()));
        }
        debug!(extension = name, "Removed {} handlers of {}", removed, descriptor.full_name());
        Ok(())
    }

    /// Disables and forgets an extension. Its image is released once nothing
    /// else holds the unit.
    pub async fn unload(&self, name: &str) -> Result<(), LifecycleError> {
        self.disable(name).await?;
        let unit = self
            .extensions
            .write()
            .shift_remove(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
        self.registry.evict(name);
        self.serialization.unregister_owner(name);
        info!(
            extension = name,
            version = unit.descriptor().version(),
            operation = "unload",
            "Unloaded {}",
            unit.descriptor().full_name()
        );
        Ok(())
    }

    /// Enables every loaded extension in load order.
    pub async fn enable_all(&self) {
        for name in self.list_loaded() {
            if let Err(e) = self.enable(&name).await {
                warn!("Skipping {}: {}", name, e);
            }
        }
    }

    /// Disables every extension in reverse load order.
    pub async fn disable_all(&self) {
        for name in self.list_loaded().into_iter().rev() {
            if let Err(e) = self.disable(&name).await {
                warn!("Skipping {}: {}", name, e);
            }
        }
    }

    /// Registers an additional listener for an enabled extension.
    ///
    /// # Arguments
    ///
    /// * `name` - Owning extension, which must be enabled
    /// * `listener` - Listener whose marked routines become handlers
    ///
    /// # Returns
    ///
    /// The number of handlers added. Rejected routines are logged and skipped.
    ///
    /// # Errors
    ///
    /// `NotFound` or `NotEnabled` for the extension, or `Registration` when a
    /// deprecated kind is handled while deprecation warnings are fatal.
    pub fn register_listener(&self, name: &str, listener: Arc<dyn Listener>) -> Result<usize, LifecycleError> {
        let unit = self.known(name)?;
        if !unit.is_enabled() {
            return Err(LifecycleError::NotEnabled(name.to_string()));
        }
        Ok(self.register_for(&unit, &listener)?)
    }

    /// Dispatches an occurrence to every matching handler, lowest priority
    /// first. Handlers may mutate or cancel the occurrence as it passes.
    pub fn dispatch(&self, occurrence: &mut dyn Occurrence) -> DispatchReport {
        let report = self.handlers.dispatch(occurrence);
        trace!(
            "Dispatched {}: {} invoked, {} skipped, {} failed",
            occurrence.kind(),
            report.invoked,
            report.skipped,
            report.failed
        );
        report
    }

    /// Names of every loaded extension in load order, enabled or not.
    pub fn list_loaded(&self) -> Vec<String> {
        self.extensions.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<IsolatedCodeUnit>> {
        self.extensions.read().get(name).cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|unit| unit.is_enabled()).unwrap_or(false)
    }

    /// Looks a symbol up in host symbols, then in extensions' exports.
    ///
    /// # Arguments
    ///
    /// * `name` - Symbol name in the current scheme
    ///
    /// # Returns
    ///
    /// The first match, or `None`. Old-scheme names are only translated for
    /// extensions, through their context.
    pub fn lookup_symbol(&self, name: &str) -> Option<SymbolValue> {
        lookup(&self.host_symbols, &self.registry, name)
    }

    pub fn stats(&self) -> LoaderStats {
        let units: Vec<Arc<IsolatedCodeUnit>> = self.extensions.read().values().cloned().collect();
        let extensions: Vec<ExtensionStats> = units
            .iter()
            .map(|unit| ExtensionStats {
                name: unit.name().to_string(),
                version: unit.descriptor().version().to_string(),
                enabled: unit.is_enabled(),
                handlers: self.handlers.handler_count_for_owner(unit.name()),
                exports: unit.exports().len(),
                data_folder: unit.data_folder().to_path_buf(),
            })
            .collect();

        LoaderStats {
            known: extensions.len(),
            active: self.registry.len(),
            enabled: extensions.iter().filter(|stats| stats.enabled).count(),
            handlers: self.handlers.handler_count(),
            cached_symbols: self.registry.cached_symbols(),
            serializable_types: self.serialization.len(),
            extensions,
        }
    }

    fn is_known(&self, name: &str) -> bool {
        self.extensions.read().contains_key(name) || self.registry.contains(name)
    }

    fn known(&self, name: &str) -> Result<Arc<IsolatedCodeUnit>, LifecycleError> {
        self.get(name).ok_or_else(|| LifecycleError::NotFound(name.to_string()))
    }

    fn context_for(&self, unit: &IsolatedCodeUnit) -> Arc<dyn ExtensionContext> {
        Arc::new(HostContext {
            descriptor: Arc::clone(unit.descriptor()),
            data_folder: unit.data_folder().to_path_buf(),
            host_symbols: Arc::clone(&self.host_symbols),
            registry: Arc::clone(&self.registry),
            remap: Arc::clone(&self.remap),
        })
    }

    fn register_for(&self, unit: &IsolatedCodeUnit, listener: &Arc<dyn Listener>) -> Result<usize, RegistrationError> {
        let registration = self.registrar.create_registered_listeners(listener, unit.descriptor())?;
        if !registration.rejected.is_empty() {
            warn!(
                extension = unit.name(),
                "{} routines of {} were rejected",
                registration.rejected.len(),
                listener.listener_name()
            );
        }
        Ok(self.handlers.register_all(registration.handlers))
    }

    /// Runs an enable or disable hook, logging errors and panics.
    async fn run_hook(&self, unit: &IsolatedCodeUnit, hook: Hook) {
        let context = self.context_for(unit);
        let mut extension = unit.extension().lock().await;
        let outcome = match hook {
            Hook::Enable => AssertUnwindSafe(extension.on_enable(context)).catch_unwind().await,
            Hook::Disable => AssertUnwindSafe(extension.on_disable(context)).catch_unwind().await,
        };

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => ExtensionError::from_panic(payload),
        };
        error!(
            extension = unit.name(),
            version = unit.descriptor().version(),
            operation = hook.operation(),
            "Error occurred while {} {} (Is it up to date?): {}",
            hook.progressive(),
            unit.descriptor().full_name(),
            failure
        );
    }

    async fn listeners_of(&self, unit: &IsolatedCodeUnit) -> Vec<Arc<dyn Listener>> {
        let extension = unit.extension().lock().await;
        std::panic::catch_unwind(AssertUnwindSafe(|| extension.listeners())).unwrap_or_else(|payload| {
            error!(
                extension = unit.name(),
                operation = "enable",
                "Listeners of {} could not be collected: {}",
                unit.descriptor().full_name(),
                ExtensionError::from_panic(payload)
            );
            Vec::new()
        })
    }
}

fn lookup(host: &SymbolTable, registry: &UnitRegistry, name: &str) -> Option<SymbolValue> {
    host.get(name).cloned().or_else(|| registry.lookup_symbol(name))
}

/// Host services handed to an extension's hooks.
struct HostContext {
    descriptor: Arc<Descriptor>,
    data_folder: PathBuf,
    host_symbols: Arc<SymbolTable>,
    registry: Arc<UnitRegistry>,
    remap: Arc<SymbolRemapCache>,
}

impl ExtensionContext for HostContext {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Tries `name` as given, then each current-scheme candidate for it. A
    /// remap table that cannot be built only limits the lookup to `name`.
    fn lookup_symbol(&self, name: &str) -> Option<SymbolValue> {
        if let Some(value) = lookup(&self.host_symbols, &self.registry, name) {
            return Some(value);
        }
        match self.remap.get_or_build() {
            Ok(table) => table
                .candidates(name)
                .iter()
                .find_map(|candidate| lookup(&self.host_symbols, &self.registry, candidate)),
            Err(e) => {
                debug!(
                    extension = self.descriptor.name(),
                    "Looked up {} without remapping: {}", name, e
                );
                None
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        let extension = self.descriptor.name();
        match level {
            LogLevel::Error => error!(extension, "{}", message),
            LogLevel::Warn => warn!(extension, "{}", message),
            LogLevel::Info => info!(extension, "{}", message),
            LogLevel::Debug => debug!(extension, "{}", message),
            LogLevel::Trace => trace!(extension, "{}", message),
        }
    }
}
