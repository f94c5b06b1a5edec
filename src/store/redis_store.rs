use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, RedisResult, Script};

use super::{ExpiryStatus, RecordStore};
use crate::error::StoreError;
use crate::record::{decode_bool, field, Record, RecordMeta};

/// Reads a note hash and, when it is click-limited, counts the read and
/// deletes the hash once the limit is reached. Runs as one script, so no
/// other client sees the hash between the read and the delete.
///
/// Returns the (patched) flat field list, or nil when the key is absent.
const GET_AND_COUNT_LUA: &str = r#"
local key = KEYS[1]
local data = redis.call('HGETALL', key)
if #data == 0 then
    return nil
end

local limited = false
local max_clicks = 0
local count_at = nil
for i = 1, #data, 2 do
    local name = data[i]
    if name == 'limit_clicks' then
        limited = (data[i + 1] == '1' or data[i + 1] == 'true')
    elseif name == 'max_clicks' then
        max_clicks = tonumber(data[i + 1]) or 0
    elseif name == 'counted_clicks' then
        count_at = i + 1
    end
end

if not limited then
    return data
end

local count = redis.call('HINCRBY', key, 'counted_clicks', 1)
if count_at then
    data[count_at] = tostring(count)
else
    data[#data + 1] = 'counted_clicks'
    data[#data + 1] = tostring(count)
end

if count >= max_clicks then
    redis.call('DEL', key)
end

return data
"#;

/// Notes stored as Redis hashes, one key per note id.
pub struct RedisRecordStore {
    connection: ConnectionManager,
    get_and_count: Script,
    op_timeout: Duration,
}

impl RedisRecordStore {
    /// Connect to `redis_url`. `password`, when given, overrides any password
    /// in the URL. Every later call is bounded by `op_timeout`.
    pub async fn connect(
        redis_url: &str,
        password: Option<&str>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut info = redis_url.into_connection_info()?;
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }

        let client = Client::open(info)?;
        let connection = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(op_timeout))??;

        tracing::info!(timeout = ?op_timeout, "connected to redis record store");

        Ok(Self {
            connection,
            get_and_count: Script::new(GET_AND_COUNT_LUA),
            op_timeout,
        })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                tracing::warn!(op, timeout = ?self.op_timeout, "redis operation timed out");
                Err(StoreError::Timeout(self.op_timeout))
            }
        }
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn create(
        &self,
        id: &str,
        record: &Record,
        ttl: Duration,
    ) -> Result<ExpiryStatus, StoreError> {
        let mut conn = self.connection.clone();

        let mut hset = redis::cmd("HSET");
        hset.arg(id);
        for (name, value) in record.to_fields() {
            hset.arg(name).arg(value);
        }
        let _: () = self.run("HSET", hset.query_async(&mut conn)).await?;

        if ttl.is_zero() {
            return Ok(ExpiryStatus::NotRequested);
        }

        let mut expire = redis::cmd("EXPIRE");
        expire.arg(id).arg(ttl.as_secs().max(1));
        let result: Result<(), StoreError> = self.run("EXPIRE", expire.query_async(&mut conn)).await;

        match result {
            Ok(()) => Ok(ExpiryStatus::Applied),
            Err(err) => {
                tracing::warn!(id, error = %err, "note written but expiry could not be set");
                Ok(ExpiryStatus::Failed)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = self
            .run("HGETALL", redis::cmd("HGETALL").arg(id).query_async(&mut conn))
            .await?;

        Record::from_fields(id, fields)
    }

    async fn get_and_count(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut conn = self.connection.clone();
        let invocation = self.get_and_count.key(id);
        let reply: Option<Vec<String>> = self
            .run("GET_AND_COUNT", invocation.invoke_async(&mut conn))
            .await?;

        match reply {
            Some(flat) => Record::from_flat(id, flat),
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &str) -> Result<Option<RecordMeta>, StoreError> {
        let mut conn = self.connection.clone();
        let (exists, values): (i64, Vec<Option<String>>) = self
            .run(
                "EXISTS",
                redis::pipe()
                    .atomic()
                    .cmd("EXISTS")
                    .arg(id)
                    .cmd("HMGET")
                    .arg(id)
                    .arg(field::VERIFY_HASH)
                    .arg(field::VERIFY_SALT)
                    .arg(field::LIMIT_CLICKS)
                    .query_async(&mut conn),
            )
            .await?;

        if exists == 0 {
            return Ok(None);
        }

        let mut values = values.into_iter().map(Option::unwrap_or_default);
        let verify_hash = values.next().unwrap_or_default();
        let verify_salt = values.next().unwrap_or_default();
        let limit_clicks = decode_bool(&values.next().unwrap_or_default());

        Ok(Some(RecordMeta {
            verify_hash,
            verify_salt,
            limit_clicks,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = self
            .run("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
