use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;

/// Channel receiving every `SyncProgress` event of a run.
pub const PROGRESS_CHANNEL: &str = "tally.sync.progress";
/// Channel receiving the final `SyncReport` of a run.
pub const COMPLETED_CHANNEL: &str = "tally.sync.completed";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}
