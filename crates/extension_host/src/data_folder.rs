//! Per-extension data folders and the one-time migration from the legacy
//! location, which was named after the image file instead of the extension.

use crate::archive::CodeLocation;
use crate::error::LoadError;
use extension_api::Descriptor;
use std::path::PathBuf;
use tracing::{info, warn};

/// Legacy folder for a code location: the file name without its last
/// extension, or the file name with a trailing `_` when it has none.
pub fn legacy_data_folder(location: &CodeLocation) -> PathBuf {
    let file_name = location.file_name();
    let legacy = match file_name.rfind('.') {
        Some(index) => file_name[..index].to_string(),
        None => format!("{}_", file_name),
    };
    location.parent().join(legacy)
}

/// Resolves the canonical data folder for an extension, moving the legacy
/// folder into place when only the legacy one exists.
///
/// The folder itself is not created; extensions create it on first use.
pub fn prepare_data_folder(location: &CodeLocation, descriptor: &Descriptor) -> Result<PathBuf, LoadError> {
    let canonical = location.parent().join(descriptor.data_folder_name());
    let legacy = legacy_data_folder(location);

    if canonical != legacy {
        if canonical.is_dir() && legacy.is_dir() {
            warn!(
                extension = descriptor.name(),
                "While loading {} found old data folder '{}' next to the new one '{}'; keeping both",
                descriptor.full_name(),
                legacy.display(),
                canonical.display()
            );
        } else if legacy.is_dir() && !canonical.exists() {
            std::fs::rename(&legacy, &canonical).map_err(|source| LoadError::DataFolderMigration {
                from: legacy.clone(),
                to: canonical.clone(),
                source,
            })?;
            info!(
                extension = descriptor.name(),
                "Migrated data folder of {} from '{}' to '{}'",
                descriptor.full_name(),
                legacy.display(),
                canonical.display()
            );
        }
    }

    if canonical.exists() && !canonical.is_dir() {
        return Err(LoadError::DataFolderConflict {
            extension: descriptor.full_name(),
            path: canonical,
        });
    }

    Ok(canonical)
}
