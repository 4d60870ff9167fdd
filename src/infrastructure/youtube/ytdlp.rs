use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use crate::pipeline::upstream::{VideoMetadata, VideoSource};

const CAPTION_LANGUAGE: &str = "en";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CAPTION_FORMAT: &str = "json3";
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio";

/// Subset of `yt-dlp --dump-json` output we read.
#[derive(Debug, Deserialize)]
struct DumpJson {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    automatic_captions: Option<std::collections::HashMap<String, Vec<CaptionTrack>>>,
    #[serde(default)]
    subtitles: Option<std::collections::HashMap<String, Vec<CaptionTrack>>>,
}

#[derive(Debug, Deserialize)]
struct CaptionTrack {
    ext: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    segs: Option<Vec<Json3Segment>>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: String,
}

/// YouTube access through the `yt-dlp` binary, captions over plain HTTP.
#[derive(Clone)]
pub struct YtDlpClient {
    binary: String,
    http: reqwest::Client,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .context("Failed to build caption HTTP client")?;

        Ok(Self {
            binary: binary.into(),
            http,
        })
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp exited with {}: {}", output.status, stderr.trim());
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VideoSource for YtDlpClient {
    async fn metadata(&self, url: &str) -> Result<VideoMetadata> {
        info!("🔍 Fetching metadata: {}", url);
        let stdout = self.run(&["--dump-json", "--no-playlist", url]).await?;
        parse_metadata(&stdout)
    }

    async fn fetch_transcript(&self, video: &VideoMetadata) -> Result<String> {
        let url = video
            .caption_url
            .as_deref()
            .ok_or_else(|| anyhow!("No English captions found."))?;

        info!(video_id = %video.id, "📜 Fetching caption track");
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_json3(&body)
    }

    async fn download_audio(&self, url: &str, video: &VideoMetadata, dest_dir: &Path) -> Result<PathBuf> {
        let output_path = dest_dir.join(format!("audio-{}.m4a", video.id));
        let output = output_path
            .to_str()
            .ok_or_else(|| anyhow!("Temp path is not valid UTF-8"))?;

        info!(video_id = %video.id, "🎙️ Downloading audio");
        self.run(&["-f", AUDIO_FORMAT, "--no-playlist", "-o", output, url])
            .await?;

        if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            bail!("Audio file not found after download.");
        }
        Ok(output_path)
    }
}

fn parse_metadata(stdout: &[u8]) -> Result<VideoMetadata> {
    let dump: DumpJson = serde_json::from_slice(stdout).context("Unreadable yt-dlp output")?;

    // Automatic captions win over uploaded subtitles when both exist.
    let caption_url = [dump.automatic_captions.as_ref(), dump.subtitles.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|tracks| tracks.get(CAPTION_LANGUAGE).filter(|list| !list.is_empty()))
        .map(|tracks| {
            tracks
                .iter()
                .find(|track| track.ext.as_deref() == Some(CAPTION_FORMAT))
                .unwrap_or(&tracks[0])
                .url
                .clone()
        });

    Ok(VideoMetadata {
        id: dump.id,
        title: dump.title,
        duration_secs: dump.duration,
        caption_url,
    })
}

fn parse_json3(body: &[u8]) -> Result<String> {
    let doc: Json3 = serde_json::from_slice(body).context("Caption track is not json3")?;

    let joined = doc
        .events
        .iter()
        .filter_map(|event| event.segs.as_ref())
        .map(|segs| segs.iter().map(|s| s.utf8.as_str()).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(joined.split_whitespace().collect::<Vec<_>>().join(" "))
}
