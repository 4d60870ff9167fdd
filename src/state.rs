use crate::config::settings::AppConfig;
use crate::infrastructure::redis::client::RedisService;
use crate::modules::jobs::service::JobService;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub redis: RedisService,
    pub jobs: JobService,
}

impl AppState {
    pub fn new(config: AppConfig, redis: RedisService, jobs: JobService) -> Self {
        Self { config, redis, jobs }
    }
}
