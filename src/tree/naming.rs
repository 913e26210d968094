//! Name validation and collision suffixes.

use crate::{CumulusError, Result};

/// Maximum length for a node name (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// Reject names that cannot live in the tree.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CumulusError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(CumulusError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(CumulusError::Validation(format!("invalid name: {name}")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(CumulusError::Validation(format!(
            "name must not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// Byte index of the extension dot, ignoring a leading dot.
fn extension_dot(name: &str) -> Option<usize> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(pos) => Some(pos),
    }
}

/// Lowercased extension without the dot.
pub fn extension(name: &str) -> Option<String> {
    extension_dot(name)
        .map(|pos| name[pos + 1..].to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Insert `(index)` before the extension: `a.txt` becomes `a(1).txt`.
pub fn add_index_to_filename(name: &str, index: u32) -> String {
    match extension_dot(name) {
        Some(pos) => format!("{}({index}){}", &name[..pos], &name[pos..]),
        None => format!("{name}({index})"),
    }
}
