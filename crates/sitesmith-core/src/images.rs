//! Image generation capability and per-version image manifest
//!
//! Image providers are external collaborators. The core hands them the
//! version directory to write into and records their output in that
//! version's `images.json` manifest, so generated assets travel with the
//! snapshot through version copies, clones and branches.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::AgentError;

pub const MANIFEST_FILE: &str = "images.json";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    /// File name inside the version directory, typically `<uuid>.png`.
    pub file_name: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates a new image from a prompt, writing the asset into `dir`.
    async fn generate(&self, dir: &Path, prompt: &str) -> Result<ImageRecord, AgentError>;

    /// Edits an existing asset in `dir` according to a prompt, writing the
    /// result as a new asset.
    async fn edit(&self, dir: &Path, source: &str, prompt: &str)
        -> Result<ImageRecord, AgentError>;
}

/// Reads a version directory's image manifest. A missing manifest is an
/// empty list, not an error.
pub async fn read_manifest(dir: &Path) -> Result<Vec<ImageRecord>, AgentError> {
    let path = dir.join(MANIFEST_FILE);
    match fs::read_to_string(&path).await {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| AgentError::Internal(format!("corrupt image manifest: {}", e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(AgentError::Internal(e.to_string())),
    }
}

/// Appends a record to the manifest, creating it on first use.
pub async fn append_manifest(dir: &Path, record: ImageRecord) -> Result<(), AgentError> {
    let mut records = read_manifest(dir).await?;
    records.push(record);
    let contents = serde_json::to_string_pretty(&records)
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    fs::create_dir_all(dir)
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    fs::write(dir.join(MANIFEST_FILE), contents)
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn manifest_starts_empty_and_accumulates() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("versions").join("1");

        assert!(read_manifest(&dir).await.unwrap().is_empty());

        append_manifest(
            &dir,
            ImageRecord {
                id: "img-1".to_string(),
                file_name: "img-1.png".to_string(),
                prompt: "a lighthouse at dusk".to_string(),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let records = read_manifest(&dir).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "img-1.png");
    }
}
