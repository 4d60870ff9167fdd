use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

const BLOCKED_TOKEN_PREFIX: &str = "blocked_token:";

#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;

        // Test connection
        let _conn = client.get_multiplexed_async_connection().await?;

        info!("✅ Connected to Redis");
        Ok(Self { client })
    }

    pub async fn get_conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Whether the account service revoked this access token.
    pub async fn is_token_blocked(&self, token: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.get_conn().await?;
        conn.exists(blocked_token_key(token)).await
    }
}

fn blocked_token_key(token: &str) -> String {
    format!("{}{}", BLOCKED_TOKEN_PREFIX, token)
}
