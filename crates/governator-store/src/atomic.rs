//! Atomic write-temp-then-rename helper shared by every persisted file
//! (index, in-flight registry, supervisor state, triage state).
//!
//! Mirrors the teacher's "single writer owns the file" discipline
//! (`gator-core`'s `PgPool`-backed writers serialize through SQL
//! transactions; here there is no database, so atomicity comes from the
//! filesystem: write to a sibling temp file, `fsync`, then `rename` over
//! the target, which POSIX guarantees is atomic on the same filesystem).

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Writes to `<path>.tmp-<pid>` in the same directory first so the rename
/// is same-filesystem (and therefore atomic), then fsyncs the temp file
/// before renaming so a crash cannot observe a zero-length target.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("governator-state"),
        std::process::id()
    ));

    let json = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
        f.write_all(json.as_bytes())
            .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
        f.sync_all()
            .with_context(|| format!("failed to fsync temp file {}", tmp_path.display()))?;
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to atomically rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Load and deserialize JSON from `path`. Returns `Ok(None)` if the file
/// does not exist (callers decide whether that means "not yet seeded" or
/// an error).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse JSON in {}", path.display()))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample { a: 1, b: "hi".into() };
        save_json(&path, &value).unwrap();
        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/sample.json");
        save_json(&path, &Sample { a: 2, b: "x".into() }).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.json");
        save_json(&path, &Sample { a: 1, b: "first".into() }).unwrap();
        save_json(&path, &Sample { a: 2, b: "second".into() }).unwrap();
        let loaded: Sample = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded, Sample { a: 2, b: "second".into() });
    }

    #[test]
    fn no_leftover_temp_files_after_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.json");
        save_json(&path, &Sample { a: 1, b: "hi".into() }).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
