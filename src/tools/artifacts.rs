//! Out-of-band storage for tool outputs too large (or too binary) to inline
//!
//! Layout: `<base_dir>/<session_id>/<artifact_id>.<ext>`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Reference handed to the model in place of the artifact body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub path: String,
    pub media_type: String,
    pub size_bytes: u64,
    /// Leading text of textual artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write one artifact for a session
    ///
    /// # Arguments
    /// * `session_id` - Owning session; used as the directory name
    /// * `media_type` - MIME type recorded in the reference and used for the file extension
    /// * `data` - Artifact body
    /// * `preview` - Optional leading text to include in the reference
    pub async fn persist(
        &self,
        session_id: &str,
        media_type: &str,
        data: &[u8],
        preview: Option<String>,
    ) -> std::io::Result<ArtifactRef> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let artifact_id = Uuid::now_v7().to_string();
        let path = dir.join(format!("{}.{}", artifact_id, extension_for(media_type)));
        tokio::fs::write(&path, data).await?;

        debug!(
            session_id,
            artifact_id = %artifact_id,
            media_type,
            size_bytes = data.len(),
            "Persisted artifact"
        );

        Ok(ArtifactRef {
            artifact_id,
            path: path.display().to_string(),
            media_type: media_type.to_string(),
            size_bytes: data.len() as u64,
            preview,
        })
    }

    /// Remove every artifact of a session. Missing directories are fine.
    pub async fn remove_session(&self, session_id: &str) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(safe)
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/json" => "json",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}
