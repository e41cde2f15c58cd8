use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::RedisResult;

/// Cheaply cloneable handle; every clone shares the managed connection.
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    /// LPUSH onto `queue`; consumers BRPOP from the other end. Returns the new queue depth.
    pub async fn push(&self, queue: &str, payload: &str) -> RedisResult<usize> {
        let mut connection = self.connection.clone();
        connection.lpush(queue, payload).await
    }
}
