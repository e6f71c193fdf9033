use crate::path::validate_name;
use crate::{Error, ErrorKind, Result};

/// Default XML namespace of the ASTM E57 v1.0 standard.
pub const E57_V1_0_URI: &str = "http://www.astm.org/COMMIT/E57/2010-e57-v1.0";

/// Describes an E57 extension as XML namespace prefix and URI.
///
/// Extensions allow files to carry custom element names next to the
/// standard grammar. Every prefix used in a path name must be registered
/// in the file before use and is serialized as a namespace declaration
/// on the XML root element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// XML namespace prefix.
    pub prefix: String,
    /// XML namespace URI.
    pub uri: String,
}

impl Extension {
    /// Creates a new extension descriptor from the given values.
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }
}

/// Registry of the extensions declared by one file.
/// Prefixes and URIs are each unique within the registry.
#[derive(Clone, Debug, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Extension>,
}

impl ExtensionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new prefix/URI pair.
    pub fn add(&mut self, prefix: &str, uri: &str) -> Result<()> {
        validate_name(prefix)?;
        if uri.is_empty() {
            Error::failed(ErrorKind::BadApiArgument, "Extension URIs must not be empty")?
        }
        if self.lookup_prefix(prefix).is_some() {
            Error::failed(
                ErrorKind::DuplicateNamespacePrefix,
                format!("Extension prefix '{prefix}' is already defined"),
            )?
        }
        if self.lookup_uri(uri).is_some() {
            Error::failed(
                ErrorKind::DuplicateNamespaceUri,
                format!("Extension URI '{uri}' is already defined"),
            )?
        }
        self.extensions.push(Extension::new(prefix, uri));
        Ok(())
    }

    /// Returns the URI registered for a prefix, if any.
    pub fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        self.extensions
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| e.uri.as_str())
    }

    /// Returns the prefix registered for an URI, if any.
    pub fn lookup_uri(&self, uri: &str) -> Option<&str> {
        self.extensions
            .iter()
            .find(|e| e.uri == uri)
            .map(|e| e.prefix.as_str())
    }

    /// Number of registered extensions.
    pub fn count(&self) -> usize {
        self.extensions.len()
    }

    /// Returns the extension at the given position.
    pub fn get(&self, index: usize) -> Option<&Extension> {
        self.extensions.get(index)
    }

    /// Iterates over all registered extensions.
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }
}
