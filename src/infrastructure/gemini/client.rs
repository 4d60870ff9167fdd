use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::upstream::{GenerativeModel, MediaService, RemoteFile};
use crate::pipeline::MediaRef;

const API_KEY_HEADER: &str = "x-goog-api-key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    File { file_data: FileData<'a> },
}

#[derive(Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Serialize)]
struct UploadStart<'a> {
    file: UploadFileMeta<'a>,
}

#[derive(Serialize)]
struct UploadFileMeta<'a> {
    display_name: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

/// Gemini REST API: file uploads for the audio fallback and `generateContent`.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    /// `timeout` bounds each request end to end, body included.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn error_body(res: reqwest::Response) -> anyhow::Error {
        let status = res.status();
        anyhow!(
            "Gemini API error {}: {}",
            status,
            res.text().await.unwrap_or_default()
        )
    }
}

#[async_trait]
impl MediaService for GeminiClient {
    /// Resumable upload in two requests: open a session, then send all bytes
    /// with `upload, finalize`.
    async fn upload(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let res = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&UploadStart {
                file: UploadFileMeta { display_name },
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_body(res).await);
        }

        let session_url = res
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow!("Upload session URL missing from response"))?
            .to_string();

        let size = bytes.len();
        let res = self
            .client
            .post(session_url)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_body(res).await);
        }

        let uploaded: UploadResponse = res.json().await?;
        info!(name = %uploaded.file.name, size, "⬆️ Audio uploaded");
        Ok(uploaded.file)
    }

    async fn file_status(&self, name: &str) -> Result<RemoteFile> {
        let res = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_body(res).await);
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str, media: Option<&MediaRef>) -> Result<String> {
        let req = build_request(prompt, media);
        let res = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_body(res).await);
        }

        let parsed: GenerateResponse = res.json().await?;
        response_text(parsed)
    }
}

fn build_request<'a>(prompt: &'a str, media: Option<&'a MediaRef>) -> GenerateRequest<'a> {
    let mut parts = Vec::with_capacity(2);
    if let Some(media) = media {
        parts.push(Part::File {
            file_data: FileData {
                mime_type: &media.mime_type,
                file_uri: &media.uri,
            },
        });
    }
    parts.push(Part::Text { text: prompt });

    GenerateRequest {
        contents: vec![Content { role: "user", parts }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
        },
    }
}

fn response_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(anyhow!("Gemini returned no text"));
    }
    Ok(text)
}
