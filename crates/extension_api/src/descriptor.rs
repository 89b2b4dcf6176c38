//! Extension descriptor metadata.
//!
//! A descriptor is the immutable record the host reads from an extension's
//! descriptor resource before any of the extension's code is touched. It names
//! the extension, its version, and the other extensions it depends on.

use serde::{Deserialize, Serialize};

/// Errors produced while reading or validating a descriptor resource.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The descriptor resource could not be found next to the code location
    #[error("Descriptor resource not found: {0}")]
    Missing(String),
    /// The resource exists but could not be read
    #[error("Failed to read descriptor {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
    /// The resource is not valid TOML or is missing required keys
    #[error("Malformed descriptor: {0}")]
    Malformed(#[from] toml::de::Error),
    /// The resource parsed but violates a descriptor invariant
    #[error("Invalid descriptor: {0}")]
    Invalid(String),
}

/// Characters allowed in a descriptor name. The name doubles as a directory
/// name next to the code location, so separators are never allowed.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Immutable metadata for one extension.
///
/// `name` is the sole identity key used by the host: registry entries,
/// dependency declarations, and data folders are all keyed by it.
///
/// # Examples
///
/// ```rust
/// use extension_api::Descriptor;
///
/// let descriptor = Descriptor::from_toml_str(r#"
///     name = "economy"
///     version = "2.1.0"
///     authors = ["alice"]
///     depend = ["storage"]
///     softdepend = ["chat"]
/// "#).unwrap();
///
/// assert_eq!(descriptor.full_name(), "economy v2.1.0");
/// assert_eq!(descriptor.hard_deps(), ["storage".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default, rename = "depend")]
    hard_deps: Vec<String>,
    #[serde(default, rename = "softdepend")]
    soft_deps: Vec<String>,
}

impl Descriptor {
    /// Builds a descriptor directly, validating the same invariants as parsing.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, DescriptorError> {
        let descriptor = Self {
            name: name.into(),
            version: version.into(),
            description: None,
            authors: Vec::new(),
            hard_deps: Vec::new(),
            soft_deps: Vec::new(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Parses a descriptor from its TOML resource text.
    pub fn from_toml_str(source: &str) -> Result<Self, DescriptorError> {
        let descriptor: Descriptor = toml::from_str(source)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::Invalid("name must not be empty".to_string()));
        }
        if let Some(bad) = self.name.chars().find(|c| !is_name_char(*c)) {
            return Err(DescriptorError::Invalid(format!(
                "name '{}' contains '{}'; only A-Z, a-z, 0-9, '_', '.' and '-' are allowed",
                self.name, bad
            )));
        }
        if self.name == "." || self.name.contains("..") {
            return Err(DescriptorError::Invalid(format!(
                "name '{}' must not be '.' or contain '..'",
                self.name
            )));
        }
        if self.version.is_empty() {
            return Err(DescriptorError::Invalid(format!(
                "version of '{}' must not be empty",
                self.name
            )));
        }
        if let Some(dep) = self.hard_deps.iter().find(|dep| **dep == self.name) {
            return Err(DescriptorError::Invalid(format!("'{}' cannot depend on itself", dep)));
        }
        Ok(())
    }

    pub fn with_hard_dep(mut self, dep: impl Into<String>) -> Self {
        self.hard_deps.push(dep.into());
        self
    }

    pub fn with_soft_dep(mut self, dep: impl Into<String>) -> Self {
        self.soft_deps.push(dep.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    /// Hard dependencies in declaration order.
    pub fn hard_deps(&self) -> &[String] {
        &self.hard_deps
    }

    /// Soft dependencies in declaration order. These never block loading.
    pub fn soft_deps(&self) -> &[String] {
        &self.soft_deps
    }

    /// Name and version, used in every log line about this extension.
    pub fn full_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }

    /// Name of the canonical data folder, a sibling of the code location.
    pub fn data_folder_name(&self) -> &str {
        &self.name
    }
}
