//! Codec for `key=value` property files as used by artifact parameter files
//! and the Partner Directory string-parameter store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Escape a property value for on-disk storage. Only backslash, newline and
/// carriage return are encoded, in that order.
pub fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Reverse of [`escape`], applying the replacements in the opposite order.
pub fn unescape(value: &str) -> String {
    value
        .replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\\\", "\\")
}

/// Read a property file into `(key, value)` pairs in file order. Blank lines
/// and `#` comments are skipped; values are unescaped.
pub fn read(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse(&contents)
        .into_iter()
        .map(|(k, raw)| (k, unescape(&raw)))
        .collect())
}

/// Write entries to `path`. With `replace` set (or no existing file) the
/// entries are written sorted by key, one escaped `k=v` per line. Otherwise
/// the existing file is read and only keys not already present are added;
/// existing values are preserved byte-for-byte. Returns the number of keys
/// newly written.
pub fn write(path: &Path, entries: &[(String, String)], replace: bool) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut raw: BTreeMap<String, String> = BTreeMap::new();
    let mut added = 0usize;

    if !replace && path.exists() {
        let existing = fs::read_to_string(path)?;
        for (key, value) in parse(&existing) {
            raw.insert(key, value);
        }
        for (key, value) in entries {
            if !raw.contains_key(key) {
                raw.insert(key.clone(), escape(value));
                added += 1;
            }
        }
    } else {
        for (key, value) in entries {
            raw.insert(key.clone(), escape(value));
        }
        added = raw.len();
    }

    let mut out = String::new();
    for (key, value) in &raw {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(added)
}

/// Merge overrides into an existing property file, writing the result to
/// `output`. Existing keys keep their position and are updated in place; new
/// keys are appended in override order. The input's line-ending style (CRLF
/// or LF) is carried over and a final line terminator is guaranteed.
pub fn merge(path: &Path, overrides: &[(String, String)], output: &Path) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let eol = if contents.contains("\r\n") { "\r\n" } else { "\n" };

    let mut entries = parse(&contents);
    for (key, value) in overrides {
        let escaped = escape(value);
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = escaped,
            None => entries.push((key.clone(), escaped)),
        }
    }

    let mut out = String::new();
    for (key, value) in &entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push_str(eol);
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, out)?;
    Ok(())
}

/// Split file contents into `(key, raw_value)` pairs without unescaping.
fn parse(contents: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => entries.push((key.to_string(), value.to_string())),
            None => entries.push((line.to_string(), String::new())),
        }
    }
    entries
}
