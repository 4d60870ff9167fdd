use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use crate::config::env::{self, EnvKey};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub rabbitmq_url: String,
    pub jwt_secret: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub ytdlp_path: String,
    pub http_timeout_secs: u64,
    pub temp_dir: PathBuf,
    pub worker: WorkerSettings,
    pub queue: QueueSettings,
}

/// Knobs for the content worker and its remote media polling.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval_ms: 2_000,
            poll_max_attempts: 150,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub lock_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "video-processing".to_string(),
            max_attempts: 3,
            backoff_ms: 1_000,
            lock_timeout_secs: 600,
        }
    }
}

impl AppConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn new() -> Result<Self, std::env::VarError> {
        let worker_defaults = WorkerSettings::default();
        let queue_defaults = QueueSettings::default();

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get(EnvKey::DatabaseUrl)?,
            redis_url: env::get(EnvKey::RedisUrl)?,
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            jwt_secret: env::get(EnvKey::JwtSecret)?,
            gemini_api_key: env::get(EnvKey::GeminiApiKey)?,
            gemini_base_url: env::get_or(
                EnvKey::GeminiBaseUrl,
                "https://generativelanguage.googleapis.com",
            ),
            ytdlp_path: env::get_or(EnvKey::YtDlpPath, "yt-dlp"),
            // Covers a whole audio upload or a long generation request.
            http_timeout_secs: env::get_parsed(EnvKey::HttpTimeoutSecs, 300).max(1),
            temp_dir: PathBuf::from(env::get_or(EnvKey::TempDir, "/tmp")),
            worker: WorkerSettings {
                // Each slot may hold a full audio track on disk.
                concurrency: env::get_parsed(EnvKey::WorkerConcurrency, worker_defaults.concurrency)
                    .max(1),
                poll_interval_ms: env::get_parsed(
                    EnvKey::MediaPollIntervalMs,
                    worker_defaults.poll_interval_ms,
                ),
                poll_max_attempts: env::get_parsed(
                    EnvKey::MediaPollMaxAttempts,
                    worker_defaults.poll_max_attempts,
                ),
            },
            queue: QueueSettings {
                name: env::get_or(EnvKey::QueueName, &queue_defaults.name),
                max_attempts: env::get_parsed(EnvKey::QueueMaxAttempts, queue_defaults.max_attempts)
                    .max(1),
                backoff_ms: env::get_parsed(EnvKey::QueueBackoffMs, queue_defaults.backoff_ms),
                lock_timeout_secs: env::get_parsed(
                    EnvKey::QueueLockTimeoutSecs,
                    queue_defaults.lock_timeout_secs,
                ),
            },
        })
    }
}
