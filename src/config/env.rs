use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    RabbitMqUrl,
    JwtSecret,
    GeminiApiKey,
    GeminiBaseUrl,
    YtDlpPath,
    HttpTimeoutSecs,
    TempDir,
    WorkerConcurrency,
    QueueName,
    QueueMaxAttempts,
    QueueBackoffMs,
    QueueLockTimeoutSecs,
    MediaPollIntervalMs,
    MediaPollMaxAttempts,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::JwtSecret => "JWT_SECRET",
            EnvKey::GeminiApiKey => "GEMINI_API_KEY",
            EnvKey::GeminiBaseUrl => "GEMINI_BASE_URL",
            EnvKey::YtDlpPath => "YTDLP_PATH",
            EnvKey::HttpTimeoutSecs => "HTTP_TIMEOUT_SECS",
            EnvKey::TempDir => "TEMP_DIR",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::QueueMaxAttempts => "QUEUE_MAX_ATTEMPTS",
            EnvKey::QueueBackoffMs => "QUEUE_BACKOFF_MS",
            EnvKey::QueueLockTimeoutSecs => "QUEUE_LOCK_TIMEOUT_SECS",
            EnvKey::MediaPollIntervalMs => "MEDIA_POLL_INTERVAL_MS",
            EnvKey::MediaPollMaxAttempts => "MEDIA_POLL_MAX_ATTEMPTS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
