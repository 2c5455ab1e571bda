//! Diagnostic artifacts for failing cases.
//!
//! Files are named `<sanitized case name>-<timestamp>.<ext>` under the
//! configured directory. Capture is best-effort: callers log and ignore
//! errors.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::Utc;
use regex::Regex;

use crate::{driver::Artifact, Error, Result};

fn unsafe_chars() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").ok())
        .as_ref()
}

/// File-name-safe form of a test case name.
pub fn sanitize(name: &str) -> String {
    let replaced = match unsafe_chars() {
        Some(pattern) => pattern.replace_all(name, "_").into_owned(),
        None => name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect(),
    };
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        "case".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where artifacts are written; a sink without a directory discards them.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSink {
    dir: Option<PathBuf>,
}

impl ArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub const fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Write `artifact` for `case_name`; returns the path, or `None` when
    /// the sink is disabled.
    pub async fn write(&self, case_name: &str, artifact: &Artifact) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("Failed to create {}: {e}", dir.display())))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = dir.join(format!(
            "{}-{stamp}.{}",
            sanitize(case_name),
            artifact.extension
        ));
        tokio::fs::write(&path, &artifact.contents)
            .await
            .map_err(|e| Error::Io(format!("Failed to write {}: {e}", path.display())))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("crud:seedVariety"), "crud_seedVariety");
        assert_eq!(sanitize("isolation crop -> batch"), "isolation_crop_-_batch");
        assert_eq!(sanitize("///"), "case");
    }

    #[tokio::test]
    async fn test_write_creates_named_file() -> Result<()> {
        let temp = TempDir::new()?;
        let sink = ArtifactSink::new(temp.path().join("artifacts"));
        let path = sink
            .write("crud:crop", &Artifact::json(&json!({"status": 500})))
            .await?;
        let path = path.ok_or_else(|| Error::Io("no path".to_string()))?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("crud_crop-"));
        assert!(name.ends_with(".json"));
        assert!(tokio::fs::try_exists(&path).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_sink_writes_nothing() -> Result<()> {
        let sink = ArtifactSink::disabled();
        assert_eq!(sink.write("x", &Artifact::html(String::new())).await?, None);
        Ok(())
    }
}
