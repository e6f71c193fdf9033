use crate::{Error, ErrorKind, Result};

/// Checks if a string is usable as local element name or namespace prefix.
///
/// Allowed are ASCII letters, digits, dashes and underscores,
/// starting with a letter or underscore. Names starting with "xml"
/// in any capitalization are reserved by the XML standard.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        Error::failed(ErrorKind::BadPathName, "Element names must not be empty")?
    }
    if name.to_lowercase().starts_with("xml") {
        Error::failed(
            ErrorKind::BadPathName,
            format!("Element names must not start with 'xml': '{name}'"),
        )?
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or_default();
    if !first.is_ascii_alphabetic() && first != '_' {
        Error::failed(
            ErrorKind::BadPathName,
            format!("Element names must start with a letter or underscore: '{name}'"),
        )?
    }
    let valid = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        Error::failed(
            ErrorKind::BadPathName,
            format!("Element names may only contain a-z, A-Z, 0-9, dashes and underscores: '{name}'"),
        )?
    }
    Ok(())
}

/// True if the element name carries a namespace prefix.
pub fn is_element_name_extended(name: &str) -> bool {
    name.contains(':')
}

/// Splits an element name into optional namespace prefix and local part.
/// Both parts are validated, vector index segments (all digits) pass as-is.
pub fn parse_element_name(name: &str) -> Result<(Option<&str>, &str)> {
    if is_index_segment(name) {
        return Ok((None, name));
    }
    match name.split_once(':') {
        Some((prefix, local)) => {
            validate_name(prefix)?;
            validate_name(local)?;
            Ok((Some(prefix), local))
        }
        None => {
            validate_name(name)?;
            Ok((None, name))
        }
    }
}

/// A decimal child index used to address vector children in paths.
pub fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Splits a path name into its absolute flag and element name segments.
/// The root path "/" yields an empty segment list.
pub fn parse_path(path: &str) -> Result<(bool, Vec<&str>)> {
    if path.is_empty() {
        Error::failed(ErrorKind::BadPathName, "Path names must not be empty")?
    }
    let (absolute, rest) = match path.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, path),
    };
    if rest.is_empty() {
        if absolute {
            return Ok((true, Vec::new()));
        }
        Error::failed(ErrorKind::BadPathName, "Path names must not be empty")?
    }
    let segments: Vec<&str> = rest.split('/').collect();
    for segment in &segments {
        parse_element_name(segment)?;
    }
    Ok((absolute, segments))
}
