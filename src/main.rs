use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::{connect_to_db, run_migrations};
use crate::infrastructure::gemini::client::GeminiClient;
use crate::infrastructure::queue::job_queue::RabbitJobQueue;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::redis::client::RedisService;
use crate::infrastructure::youtube::ytdlp::YtDlpClient;
use crate::modules::jobs::repository::JobRepository;
use crate::modules::jobs::service::JobService;
use crate::modules::users::quota::QuotaGate;
use crate::modules::users::repository::UserRepository;
use crate::pipeline::acquisition::TranscriptAcquirer;
use crate::pipeline::generator::ContentGenerator;
use crate::state::AppState;
use crate::workers::content_worker::{ContentWorker, WorkerService};

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod pipeline;
mod routes;
mod state;
mod workers;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("Missing required environment variable")?;

    let pool = connect_to_db(&config.database_url, config.worker.concurrency).await?;
    run_migrations(&pool).await?;

    let redis = RedisService::new(&config.redis_url).await?;
    let mq = RabbitMqService::new(&config.rabbitmq_url).await?;
    let queue = Arc::new(RabbitJobQueue::new(mq, config.queue.clone()).await?);

    let jobs = Arc::new(JobRepository::new(pool.clone()));
    let users = Arc::new(UserRepository::new(pool.clone()));
    let gemini = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_base_url.clone(),
        config.http_timeout(),
    )?);

    tokio::fs::create_dir_all(&config.temp_dir).await?;
    let acquirer = TranscriptAcquirer::new(
        Arc::new(YtDlpClient::new(config.ytdlp_path.clone(), config.http_timeout())?),
        gemini.clone(),
        jobs.clone(),
        QuotaGate::new(users.clone()),
        config.temp_dir.clone(),
        &config.worker,
    );
    let worker = ContentWorker::new(jobs.clone(), users.clone(), acquirer, ContentGenerator::new(gemini));

    let mut worker_service = WorkerService::new(queue.clone(), Arc::new(worker), config.worker.concurrency);
    worker_service.start();

    let job_service = JobService::new(jobs, users, queue);
    let state = AppState::new(config.clone(), redis, job_service);
    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining worker");
    worker_service.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
