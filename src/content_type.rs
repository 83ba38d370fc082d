//! Maps remote content-type strings onto local file extensions and manages
//! the sidecar metadata file that preserves content-type parameters.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Sidecar file stored next to binary parameters.
pub const SIDECAR_FILE: &str = "_metadata.json";

const KNOWN_EXTENSIONS: &[&str] = &["xml", "xsl", "xsd", "json", "txt", "zip", "gz", "zlib", "crt"];

/// Derive a file extension from a content-type string. Accepts simple tokens
/// (`xml`), MIME types (`application/xml`) and types carrying parameters
/// (`text/plain; charset=utf-8`). Unrecognized candidates fall back to `bin`.
pub fn resolve_extension(content_type: &str) -> String {
    let base = content_type.split(';').next().unwrap_or("").trim();
    let candidate = match base.split_once('/') {
        Some((_, subtype)) => subtype,
        None => base,
    };
    let candidate = candidate.trim().to_ascii_lowercase();

    if candidate == "octet-stream" {
        return "bin".to_string();
    }
    if KNOWN_EXTENSIONS.contains(&candidate.as_str()) {
        return candidate;
    }
    if (2..=5).contains(&candidate.len()) && candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
        return candidate;
    }
    "bin".to_string()
}

/// Content-types carrying parameters need the sidecar to round-trip.
pub fn needs_sidecar(content_type: &str) -> bool {
    content_type.contains(';')
}

/// Local filename for a binary parameter. The id is used verbatim when it
/// already carries the resolved extension.
pub fn filename(id: &str, content_type: &str) -> String {
    let ext = resolve_extension(content_type);
    let suffix = format!(".{ext}");
    if id.to_ascii_lowercase().ends_with(&suffix) {
        id.to_string()
    } else {
        format!("{id}{suffix}")
    }
}

/// Record the full content-type of a parameter in the sidecar. A no-op for
/// content-types without parameters.
pub fn write_sidecar(binary_dir: &Path, id: &str, full_content_type: &str) -> Result<()> {
    if !needs_sidecar(full_content_type) {
        return Ok(());
    }
    let mut map = read_sidecar(binary_dir)?;
    map.insert(
        filename(id, full_content_type),
        full_content_type.to_string(),
    );
    fs::create_dir_all(binary_dir)?;
    let path = binary_dir.join(SIDECAR_FILE);
    fs::write(&path, serde_json::to_string_pretty(&map)?)?;
    Ok(())
}

/// Load the sidecar mapping, or an empty map when none exists.
pub fn read_sidecar(binary_dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = binary_dir.join(SIDECAR_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&contents)?)
}
