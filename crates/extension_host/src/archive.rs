//! Code locations on disk.

use crate::error::LoadError;
use extension_api::{Descriptor, DescriptorError};
use std::path::{Path, PathBuf};

/// Extension of the descriptor resource that sits next to every image.
pub const DESCRIPTOR_EXTENSION: &str = "toml";

/// An existing file holding an extension image, with its descriptor resource
/// stored alongside as `<stem>.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    path: PathBuf,
}

impl CodeLocation {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LoadError::MissingLocation(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the image, e.g. `economy.so`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory containing the image. Data folders are created here.
    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.path.with_extension(DESCRIPTOR_EXTENSION)
    }

    /// Reads and validates the descriptor resource.
    pub fn read_descriptor(&self) -> Result<Descriptor, LoadError> {
        let resource = self.descriptor_path();
        let wrap = |source| LoadError::Descriptor {
            location: self.path.clone(),
            source,
        };

        let text = match std::fs::read_to_string(&resource) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(wrap(DescriptorError::Missing(resource.display().to_string())));
            }
            Err(source) => {
                return Err(wrap(DescriptorError::Io {
                    resource: resource.display().to_string(),
                    source,
                }));
            }
        };
        Descriptor::from_toml_str(&text).map_err(wrap)
    }
}
