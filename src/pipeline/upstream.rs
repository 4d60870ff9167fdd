use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::MediaRef;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    /// Best English caption track in `json3` format, if the video has one.
    pub caption_url: Option<String>,
}

impl VideoMetadata {
    /// Duration rounded up to whole minutes.
    pub fn duration_minutes(&self) -> Option<u32> {
        self.duration_secs
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs / 60.0).ceil() as u32)
    }
}

/// Where the video lives: metadata, captions and the raw audio track.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn metadata(&self, url: &str) -> Result<VideoMetadata>;

    async fn fetch_transcript(&self, video: &VideoMetadata) -> Result<String>;

    /// Downloads the audio track into `dest_dir` and returns the file path.
    async fn download_audio(&self, url: &str, video: &VideoMetadata, dest_dir: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteFileState {
    StateUnspecified,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub state: RemoteFileState,
}

impl RemoteFile {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            name: self.name.clone(),
            uri: self.uri.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// File storage of the generation service, used for the audio fallback.
#[async_trait]
pub trait MediaService: Send + Sync {
    async fn upload(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile>;

    async fn file_status(&self, name: &str) -> Result<RemoteFile>;
}

/// One-shot text generation. Returns the raw model text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str, media: Option<&MediaRef>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_rounds_up_to_minutes() {
        let mut video = VideoMetadata {
            id: "dQw4w9WgXcQ".into(),
            title: None,
            duration_secs: Some(600.0),
            caption_url: None,
        };
        assert_eq!(video.duration_minutes(), Some(10));
        video.duration_secs = Some(601.0);
        assert_eq!(video.duration_minutes(), Some(11));
        video.duration_secs = None;
        assert_eq!(video.duration_minutes(), None);
    }

    #[test]
    fn remote_file_state_parses_unknown_values() {
        let file: RemoteFile = serde_json::from_str(
            r#"{"name":"files/abc","uri":"https://x/files/abc","mimeType":"audio/mp4","state":"ARCHIVED"}"#,
        )
        .unwrap();
        assert_eq!(file.state, RemoteFileState::Unknown);
        assert_eq!(file.media_ref().mime_type, "audio/mp4");
    }
}
