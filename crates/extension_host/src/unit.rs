//! Isolated code units: one loaded extension image with its private symbol scope.

use crate::archive::CodeLocation;
use crate::error::LoadError;
use crate::registry::UnitRegistry;
use crate::remap::SymbolRemapCache;
use extension_api::{
    Descriptor, Extension, ExtensionError, ResolvedImports, SerializableType, SymbolTable, SymbolValue,
    EXTENSION_API_VERSION,
};
use libloading::{Library, Symbol};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Whatever keeps an extension's code mapped, such as a native [`Library`].
pub type ImageBacking = Box<dyn Any + Send + Sync>;

/// An instantiated extension and, for native images, the library backing it.
///
/// The extension is declared first so it is dropped before its library. Move
/// the image around whole; destructuring it gives up that order.
pub struct ExtensionImage {
    pub extension: Box<dyn Extension>,
    pub backing: Option<ImageBacking>,
}

impl ExtensionImage {
    /// An image backed by a loaded library.
    pub fn native(extension: Box<dyn Extension>, library: Library) -> Self {
        Self {
            extension,
            backing: Some(Box::new(library)),
        }
    }

    /// An image whose code is part of the host binary.
    pub fn builtin(extension: Box<dyn Extension>) -> Self {
        Self {
            extension,
            backing: None,
        }
    }
}

/// Turns a code location into an instantiated extension.
pub trait ImageLoader: Send + Sync {
    /// Whether this loader handles the location.
    fn accepts(&self, location: &CodeLocation) -> bool;

    /// Instantiates the extension at `location`.
    ///
    /// # Errors
    ///
    /// [`LoadError::Image`] when the image cannot be opened or instantiated.
    fn open(&self, location: &CodeLocation, descriptor: &Descriptor) -> Result<ExtensionImage, LoadError>;
}

/// Loads shared libraries exporting `create_extension`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeImageLoader;

impl NativeImageLoader {
    pub const EXTENSIONS: [&'static str; 3] = ["so", "dll", "dylib"];
}

impl ImageLoader for NativeImageLoader {
    fn accepts(&self, location: &CodeLocation) -> bool {
        location
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| Self::EXTENSIONS.iter().any(|known| *known == ext))
            .unwrap_or(false)
    }

    fn open(&self, location: &CodeLocation, descriptor: &Descriptor) -> Result<ExtensionImage, LoadError> {
        let fail = |reason: String| LoadError::Image {
            extension: descriptor.full_name(),
            reason,
        };

        debug!("Loading native image from: {}", location.path().display());

        // SAFETY: loading a library runs its initializers; the image is trusted
        // once it has been placed in the extension directory.
        let library = unsafe { Library::new(location.path()) }
            .map_err(|e| fail(format!("Failed to load library: {}", e)))?;

        let extension = {
            let api_version: Symbol<extern "C" fn() -> u32> = unsafe { library.get(b"extension_api_version") }
                .map_err(|e| fail(format!("Failed to find extension_api_version function: {}", e)))?;
            let found = api_version();
            if found != EXTENSION_API_VERSION {
                return Err(fail(format!(
                    "Built against extension API version {}, host provides {}",
                    found, EXTENSION_API_VERSION
                )));
            }

            let create_extension: Symbol<unsafe extern "C" fn() -> *mut dyn Extension> =
                unsafe { library.get(b"create_extension") }
                    .map_err(|e| fail(format!("Failed to find create_extension function: {}", e)))?;

            let extension_ptr = unsafe { create_extension() };
            if extension_ptr.is_null() {
                return Err(fail("create_extension returned null pointer".to_string()));
            }
            // SAFETY: the pointer came from Box::into_raw in declare_extension!
            // and the API version matches.
            unsafe { Box::from_raw(extension_ptr) }
        };

        Ok(ExtensionImage::native(extension, library))
    }
}

/// Constructor for a statically linked extension.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Serves statically linked extensions, keyed by the file name of their code
/// location. The file only needs to exist to carry the descriptor resource.
#[derive(Default, Clone)]
pub struct BuiltinImageLoader {
    factories: HashMap<String, ExtensionFactory>,
}

impl BuiltinImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `factory` for code locations named `file_name`.
    pub fn with<F>(mut self, file_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.register(file_name, factory);
        self
    }

    pub fn register<F>(&mut self, file_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.factories.insert(file_name.into(), Arc::new(factory));
    }
}

impl ImageLoader for BuiltinImageLoader {
    fn accepts(&self, location: &CodeLocation) -> bool {
        self.factories.contains_key(&location.file_name())
    }

    fn open(&self, location: &CodeLocation, descriptor: &Descriptor) -> Result<ExtensionImage, LoadError> {
        let factory = self.factories.get(&location.file_name()).ok_or_else(|| LoadError::Image {
            extension: descriptor.full_name(),
            reason: format!("No built-in extension registered for {}", location.file_name()),
        })?;

        let extension = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory())).map_err(|payload| {
            LoadError::Image {
                extension: descriptor.full_name(),
                reason: ExtensionError::from_panic(payload).to_string(),
            }
        })?;

        Ok(ExtensionImage::builtin(extension))
    }
}

/// Where imports are looked up once the unit's own scope has been tried.
pub struct ImportScope<'a> {
    pub remap: &'a SymbolRemapCache,
    pub host: &'a SymbolTable,
    pub registry: &'a UnitRegistry,
}

impl ImportScope<'_> {
    /// Resolves every import: local exports first, then each remapped candidate
    /// in host symbols and in other extensions' exports.
    ///
    /// The remap table is only built when there is something to resolve.
    pub fn resolve(
        &self,
        extension: &str,
        imports: &[String],
        local: &SymbolTable,
    ) -> Result<ResolvedImports, LoadError> {
        if imports.is_empty() {
            return Ok(ResolvedImports::default());
        }

        let table = self.remap.get_or_build()?;
        let mut resolved = SymbolTable::new();
        for import in imports {
            let value = local.get(import).cloned().or_else(|| {
                table
                    .candidates(import)
                    .iter()
                    .find_map(|candidate| self.lookup(candidate))
            });
            match value {
                Some(value) => resolved.insert_value(import.clone(), value),
                None => {
                    return Err(LoadError::UnresolvedSymbol {
                        extension: extension.to_string(),
                        symbol: import.clone(),
                    })
                }
            }
        }
        Ok(ResolvedImports::new(resolved))
    }

    fn lookup(&self, name: &str) -> Option<SymbolValue> {
        self.host.get(name).cloned().or_else(|| self.registry.lookup_symbol(name))
    }
}

/// One loaded extension.
///
/// Owns the extension instance, its exported symbols, and the library image
/// for native extensions. The instance is dropped before the library.
pub struct IsolatedCodeUnit {
    descriptor: Arc<Descriptor>,
    location: PathBuf,
    data_folder: PathBuf,
    exports: SymbolTable,
    serializable: Vec<SerializableType>,
    enabled: AtomicBool,
    extension: tokio::sync::Mutex<Box<dyn Extension>>,
    _backing: Option<ImageBacking>,
}

impl IsolatedCodeUnit {
    /// Binds the image's imports and wraps it as a unit. Nothing is published
    /// anywhere until the unit is inserted into a registry.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Validated descriptor of the extension
    /// * `location` - Code location the image was opened from
    /// * `data_folder` - Prepared canonical data folder
    /// * `image` - The opened image; dropped whole on failure
    /// * `scope` - Where imports are resolved
    ///
    /// # Errors
    ///
    /// `Remap` or `UnresolvedSymbol` when an import cannot be bound, `Image`
    /// when the extension refuses or panics while linking.
    pub fn build(
        descriptor: Descriptor,
        location: &CodeLocation,
        data_folder: PathBuf,
        mut image: ExtensionImage,
        scope: &ImportScope<'_>,
    ) -> Result<Self, LoadError> {
        // Every early return drops `image` whole, extension before backing.
        let exports = image.extension.exports();
        let imports = image.extension.imports();
        let serializable = image.extension.serializable_types();
        let resolved = scope.resolve(descriptor.name(), &imports, &exports)?;

        let linked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| image.extension.link(&resolved)))
            .unwrap_or_else(|payload| Err(ExtensionError::from_panic(payload)));
        if let Err(e) = linked {
            return Err(LoadError::Image {
                extension: descriptor.full_name(),
                reason: e.to_string(),
            });
        }

        debug!(
            extension = descriptor.name(),
            "Built unit {}: {} exports, {} imports",
            descriptor.full_name(),
            exports.len(),
            resolved.len()
        );

        let ExtensionImage { extension, backing } = image;
        Ok(Self {
            descriptor: Arc::new(descriptor),
            location: location.path().to_path_buf(),
            data_folder,
            exports,
            serializable,
            enabled: AtomicBool::new(false),
            extension: tokio::sync::Mutex::new(extension),
            _backing: backing,
        })
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Symbols defined by this unit.
    pub fn exports(&self) -> &SymbolTable {
        &self.exports
    }

    /// Types this unit can restore from configuration.
    pub fn serializable_types(&self) -> &[SerializableType] {
        &self.serializable
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn extension(&self) -> &tokio::sync::Mutex<Box<dyn Extension>> {
        &self.extension
    }
}

impl std::fmt::Debug for IsolatedCodeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedCodeUnit")
            .field("descriptor", &self.descriptor)
            .field("location", &self.location)
            .field("exports", &self.exports)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
