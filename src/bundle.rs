//! Rewriter for the `MANIFEST.MF` headers the tenant derives artifact
//! identity from. Everything except `Bundle-Name` and `Bundle-SymbolicName`
//! passes through untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Rewrite the two bundle headers, preserving all other lines and the input's
/// line-ending style. Headers missing from the input are appended at the end.
pub fn update_bundle_headers(
    input: &Path,
    symbolic_name: &str,
    bundle_name: &str,
    output: &Path,
) -> Result<()> {
    let contents = fs::read_to_string(input)?;
    let eol = if contents.contains("\r\n") { "\r\n" } else { "\n" };

    let mut found_name = false;
    let mut found_symbolic = false;
    let mut lines: Vec<String> = Vec::new();

    for line in contents.lines() {
        let lowered = line.trim().to_ascii_lowercase();
        if lowered.starts_with("bundle-name:") {
            lines.push(format!("Bundle-Name: {bundle_name}"));
            found_name = true;
        } else if lowered.starts_with("bundle-symbolicname:") {
            lines.push(format!("Bundle-SymbolicName: {symbolic_name}"));
            found_symbolic = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !found_name {
        lines.push(format!("Bundle-Name: {bundle_name}"));
    }
    if !found_symbolic {
        lines.push(format!("Bundle-SymbolicName: {symbolic_name}"));
    }

    let mut out = lines.join(eol);
    out.push_str(eol);
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, out)?;
    Ok(())
}

/// Parse a manifest into a name-to-value map. Continuation lines (leading
/// space or tab) are folded into the previous header, joined by one space.
pub fn headers(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = fs::read_to_string(path)?;
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in contents.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(name) = &current
                && let Some(value) = map.get_mut(name)
            {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_string();
            map.insert(name.clone(), value.trim().to_string());
            current = Some(name);
        }
    }
    Ok(map)
}
