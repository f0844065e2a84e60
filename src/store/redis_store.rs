use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::protocol::{Participant, RoomId, RoomState, SyncMessage, UserId};
use crate::retry::{RetryConfig, RetryExecutor};

use super::{CoordinationStore, LockToken, StoreError, StoreResult};

fn sync_key(room_id: RoomId) -> String {
    format!("room:sync:{room_id}")
}
fn participants_key(room_id: RoomId) -> String {
    format!("room:participants:{room_id}")
}
fn events_topic(room_id: RoomId) -> String {
    format!("room:{room_id}:events")
}
fn lock_key(room_id: RoomId) -> String {
    format!("room:lock:{room_id}")
}
const ACTIVE_ROOMS_KEY: &str = "rooms:active";

/// Production [`CoordinationStore`] backend, using the `redis` crate's
/// async multiplexed connection, keyed per the layout in §6.
pub struct RedisStore {
    client: redis::Client,
    connection: ConnectionManager,
    read_retry: RetryExecutor,
}

impl RedisStore {
    /// Connect using the store-operation timeout from §5 (2s).
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.connection_url())?;
        let connection = tokio::time::timeout(Duration::from_secs(2), client.get_connection_manager())
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to coordination store"))??;
        Ok(Self {
            client,
            connection,
            read_retry: RetryExecutor::new(RetryConfig::store_read()),
        })
    }

    async fn with_timeout<T>(
        &self,
        cancel: &CancellationToken,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> StoreResult<T> {
        tokio::select! {
            () = cancel.cancelled() => Err(StoreError::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(2), fut) => {
                match result {
                    Ok(inner) => inner.map_err(StoreError::from),
                    Err(_) => Err(StoreError::Unavailable("operation timed out".into())),
                }
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get_state(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<Option<RoomState>> {
        let fields: Vec<(String, String)> = self
            .read_retry
            .execute("get_state", || async {
                let mut conn = self.connection.clone();
                self.with_timeout(cancel, conn.hgetall(sync_key(room_id))).await
            })
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_room_state(room_id, &fields).map(Some)
    }

    async fn set_state(&self, state: &RoomState, cancel: &CancellationToken) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let pairs = encode_room_state(state);
        self.with_timeout(cancel, conn.hset_multiple(sync_key(state.room_id), &pairs))
            .await
    }

    async fn add_participant(
        &self,
        room_id: RoomId,
        participant: &Participant,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let value = serde_json::to_string(participant)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.with_timeout(
            cancel,
            conn.hset(participants_key(room_id), participant.user_id.to_string(), value),
        )
        .await
    }

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        self.with_timeout(
            cancel,
            conn.hdel(participants_key(room_id), user_id.to_string()),
        )
        .await
    }

    async fn get_participants(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<Vec<Participant>> {
        let raw: Vec<String> = self
            .read_retry
            .execute("get_participants", || async {
                let mut conn = self.connection.clone();
                self.with_timeout(cancel, conn.hvals(participants_key(room_id))).await
            })
            .await?;
        raw.iter()
            .map(|value| serde_json::from_str(value).map_err(|e| StoreError::Backend(e.to_string())))
            .collect()
    }

    async fn touch_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let key = participants_key(room_id);
        let raw: Option<String> = self.with_timeout(cancel, conn.hget(&key, user_id.to_string())).await?;
        let Some(raw) = raw else { return Ok(()) };
        let mut participant: Participant =
            serde_json::from_str(&raw).map_err(|e| StoreError::Backend(e.to_string()))?;
        participant.last_seen = now;
        self.add_participant(room_id, &participant, cancel).await
    }

    async fn publish(&self, room_id: RoomId, message: &SyncMessage, cancel: &CancellationToken) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let value = serde_json::to_string(message).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.with_timeout(cancel, conn.publish(events_topic(room_id), value))
            .await
    }

    async fn subscribe(
        &self,
        room_id: RoomId,
        cancel: &CancellationToken,
    ) -> StoreResult<BoxStream<'static, SyncMessage>> {
        let client = self.client.clone();
        let topic = events_topic(room_id);
        let cancel = cancel.clone();

        let pubsub_conn = tokio::select! {
            () = cancel.cancelled() => return Err(StoreError::Cancelled),
            result = client.get_async_pubsub() => result.map_err(StoreError::from)?,
        };

        let mut pubsub = pubsub_conn;
        pubsub.subscribe(&topic).await.map_err(StoreError::from)?;

        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload: Option<String> = msg.get_payload().ok();
            async move { payload.and_then(|raw| serde_json::from_str(&raw).ok()) }
        });

        Ok(Box::pin(stream))
    }

    async fn acquire_lock(
        &self,
        room_id: RoomId,
        holder: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> StoreResult<LockToken> {
        let mut conn = self.connection.clone();
        let key = lock_key(room_id);
        let response: Option<String> = self
            .with_timeout(
                cancel,
                redis::cmd("SET")
                    .arg(&key)
                    .arg(holder)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn),
            )
            .await?;

        if response.is_some() {
            Ok(LockToken(holder.to_string()))
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn release_lock(&self, room_id: RoomId, token: &LockToken, cancel: &CancellationToken) -> StoreResult<()> {
        // Compare-and-delete via a small Lua script so we never release a
        // lock another holder has since taken over (§8 lock correctness).
        let mut conn = self.connection.clone();
        const SCRIPT: &str = r"
            if redis.call('get', KEYS[1]) == ARGV[1] then
                return redis.call('del', KEYS[1])
            else
                return 0
            end
        ";
        self.with_timeout(
            cancel,
            redis::Script::new(SCRIPT)
                .key(lock_key(room_id))
                .arg(&token.0)
                .invoke_async::<i64>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn mark_active(&self, room_id: RoomId, now: DateTime<Utc>, cancel: &CancellationToken) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        self.with_timeout(
            cancel,
            conn.zadd(ACTIVE_ROOMS_KEY, room_id.to_string(), now.timestamp()),
        )
        .await
    }

    async fn list_stale_rooms(
        &self,
        older_than: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<RoomId>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = self
            .with_timeout(
                cancel,
                conn.zrangebyscore(ACTIVE_ROOMS_KEY, "-inf", older_than.timestamp()),
            )
            .await?;
        Ok(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect())
    }

    async fn remove_room(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        self.with_timeout::<()>(cancel, conn.del(sync_key(room_id))).await?;
        self.with_timeout::<()>(cancel, conn.del(participants_key(room_id))).await?;
        self.with_timeout(cancel, conn.zrem(ACTIVE_ROOMS_KEY, room_id.to_string()))
            .await
    }
}

fn encode_room_state(state: &RoomState) -> Vec<(String, String)> {
    vec![
        ("is_playing".into(), state.is_playing.to_string()),
        ("current_time".into(), state.current_time.to_string()),
        ("duration".into(), state.duration.to_string()),
        ("playback_rate".into(), state.playback_rate.to_string()),
        ("last_updated".into(), state.last_updated.to_rfc3339()),
        ("updated_by".into(), state.updated_by.to_string()),
    ]
}

fn decode_room_state(room_id: RoomId, fields: &[(String, String)]) -> StoreResult<RoomState> {
    let get = |key: &str| -> Option<&str> {
        fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    };
    let bad_field = |field: &str| StoreError::Backend(format!("corrupt room state field '{field}'"));

    let is_playing = get("is_playing")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| bad_field("is_playing"))?;
    let current_time = get("current_time")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| bad_field("current_time"))?;
    let duration = get("duration")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| bad_field("duration"))?;
    let playback_rate = get("playback_rate").and_then(|v| v.parse().ok()).unwrap_or(1.0);
    let last_updated = get("last_updated")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let updated_by = get("updated_by")
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::nil);

    Ok(RoomState {
        room_id,
        is_playing,
        current_time,
        duration,
        playback_rate,
        last_updated,
        updated_by,
    })
}
