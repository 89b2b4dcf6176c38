//! Error types for loading, registration, and lifecycle operations.

use extension_api::{DescriptorError, ExtensionError};
use std::path::PathBuf;

/// Errors that abort a single load. A failed load leaves the registry untouched.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The code location does not exist
    #[error("Code location does not exist: {0}")]
    MissingLocation(PathBuf),
    /// The descriptor resource is missing, unreadable, or invalid
    #[error("Invalid descriptor for {location}: {source}")]
    Descriptor {
        location: PathBuf,
        #[source]
        source: DescriptorError,
    },
    /// A declared hard dependency is not currently loaded
    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),
    /// The projected data folder exists and is not a directory
    #[error("Projected data folder '{path}' for {extension} exists and is not a directory")]
    DataFolderConflict { extension: String, path: PathBuf },
    /// The legacy data folder could not be moved to its canonical location
    #[error("Unable to rename old data folder '{from}' to '{to}': {source}")]
    DataFolderMigration {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// An extension with the same name is already known to the loader
    #[error("Extension {0} is already loaded")]
    AlreadyLoaded(String),
    /// The symbol remap table could not be built
    #[error("Symbol remap table unavailable: {0}")]
    Remap(#[from] RemapError),
    /// An import could not be resolved locally, in the host, or in other extensions
    #[error("Unresolved symbol '{symbol}' imported by {extension}")]
    UnresolvedSymbol { extension: String, symbol: String },
    /// The image could not be opened, instantiated, or linked
    #[error("Failed to build image for {extension}: {reason}")]
    Image { extension: String, reason: String },
}

/// Errors building the symbol remap table.
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("Failed to read remap resource {resource}: {source}")]
    Resource {
        resource: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed line {line} in {resource}: '{content}'")]
    Malformed {
        resource: String,
        line: usize,
        content: String,
    },
    /// Two old names map to the same new name, so the mapping cannot be inverted
    #[error("Symbols '{first}' and '{second}' both map to '{target}'")]
    Conflict {
        target: String,
        first: String,
        second: String,
    },
}

/// Per-routine and per-listener registration failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    /// A marked routine does not take exactly one occurrence parameter
    #[error("{extension} attempted to register an invalid handler signature \"{signature}\" in {listener}")]
    InvalidSignature {
        extension: String,
        listener: String,
        signature: String,
    },
    /// A routine handles a deprecated occurrence kind while warnings are fatal
    #[error("\"{extension}\" registered a listener for deprecated occurrence {kind} on routine \"{routine}\"")]
    DeprecatedOccurrence {
        extension: String,
        kind: String,
        routine: String,
    },
}

/// Errors restoring a value through the serializable-type registry.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("No serializable type is registered as '{0}'")]
    UnknownAlias(String),
    #[error("Failed to restore '{alias}' for {owner}: {source}")]
    Restore {
        alias: String,
        owner: String,
        #[source]
        source: ExtensionError,
    },
}

/// Errors registering occurrence kinds.
#[derive(Debug, thiserror::Error)]
pub enum KindError {
    #[error("Occurrence kind {0} is already registered")]
    Duplicate(String),
    #[error("Parent kind {parent} of {kind} is not registered")]
    UnknownParent { kind: String, parent: String },
}

/// Errors returned by administrative lifecycle calls. Failures inside
/// extension code are logged instead and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Extension not found: {0}")]
    NotFound(String),
    #[error("Extension {0} is not enabled")]
    NotEnabled(String),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}
