//! Redis backend over a multiplexed async connection.
//!
//! Every key is stored under the configured prefix; the prefix is stripped
//! again from keys returned by `SCAN`, so callers never see it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script, Value};
use tracing::info;
use url::Url;

use crate::cache::{KeyValueStore, StoreCommand, StoreError, StoreInfo, StoreReply};
use crate::config::StoreSettings;
use crate::infra::error::InfraError;

const SCAN_COUNT: u64 = 100;

/// KEYS[1] set, ARGV[1] member, ARGV[2] ttl in ms (0 = persist).
/// Expiry of an existing set only moves later.
const INDEX_ADD_SCRIPT: &str = r#"
local existed = redis.call('EXISTS', KEYS[1]) == 1
local added = redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl == 0 then
  redis.call('PERSIST', KEYS[1])
elseif not existed then
  redis.call('PEXPIRE', KEYS[1], ttl)
else
  local current = redis.call('PTTL', KEYS[1])
  if current >= 0 and current < ttl then
    redis.call('PEXPIRE', KEYS[1], ttl)
  end
end
return added
"#;

/// KEYS[1] key, ARGV[1] expected value.
const DEL_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(settings: &StoreSettings) -> Result<Self, InfraError> {
        let url = connection_url(settings)?;
        let client = Client::open(url.as_str())
            .map_err(|e| InfraError::store(format!("redis client error: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| InfraError::store(format!("redis connection error: {e}")))?;

        info!(
            store = "redis",
            host = %settings.host,
            port = settings.port,
            db = settings.db,
            "connected to cache store"
        );
        Ok(Self {
            conn,
            prefix: settings.key_prefix.clone(),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn unprefixed(&self, key: String) -> String {
        match key.strip_prefix(&self.prefix) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }
}

/// `redis://[:password@]host:port/db`
pub(crate) fn connection_url(settings: &StoreSettings) -> Result<Url, InfraError> {
    let mut url = Url::parse(&format!(
        "redis://{}:{}/{}",
        settings.host, settings.port, settings.db
    ))
    .map_err(|e| InfraError::configuration(format!("invalid store address: {e}")))?;
    if let Some(password) = settings.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|_| InfraError::configuration("store password cannot be set on URL"))?;
    }
    Ok(url)
}

fn store_error(command: &'static str, error: RedisError) -> StoreError {
    if error.code() == Some("WRONGTYPE") {
        return StoreError::WrongType(error.to_string());
    }
    if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
        return StoreError::Unavailable(error.to_string());
    }
    StoreError::command(command, error.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Fields of interest from an `INFO` reply.
pub(crate) fn parse_info(raw: &str) -> StoreInfo {
    let mut info = StoreInfo::default();
    for line in raw.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match field {
            "uptime_in_seconds" => info.uptime_seconds = value,
            "connected_clients" => info.connected_clients = value,
            "total_commands_processed" => info.total_commands = value,
            "used_memory" => info.memory_bytes = value,
            _ => {}
        }
    }
    info
}

fn reply_from(command: &StoreCommand, value: Value) -> Result<StoreReply, StoreError> {
    let convert = |error: RedisError| store_error("pipeline", error);
    Ok(match command {
        StoreCommand::Get { .. } => {
            StoreReply::Value(redis::from_redis_value(&value).map_err(convert)?)
        }
        StoreCommand::Set { .. } => StoreReply::Done,
        StoreCommand::Del { .. } => StoreReply::Count(redis::from_redis_value(&value).map_err(convert)?),
        StoreCommand::Expire { .. }
        | StoreCommand::SetAdd { .. }
        | StoreCommand::IndexAdd { .. } => {
            let count: u64 = redis::from_redis_value(&value).map_err(convert)?;
            StoreReply::Flag(count > 0)
        }
    })
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(self.prefixed(key))
            .await
            .map_err(|e| store_error("GET", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("SET", e))?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let prefixed: Vec<String> = keys.iter().map(|key| self.prefixed(key)).collect();
        let removed: u64 = conn
            .del(prefixed)
            .await
            .map_err(|e| store_error("DEL", e))?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn
            .exists(self.prefixed(key))
            .await
            .map_err(|e| store_error("EXISTS", e))?;
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let command = if ttl.is_zero() {
            let mut cmd = redis::cmd("PERSIST");
            cmd.arg(self.prefixed(key));
            cmd
        } else {
            let mut cmd = redis::cmd("PEXPIRE");
            cmd.arg(self.prefixed(key)).arg(ttl_millis(ttl));
            cmd
        };
        let updated: u64 = command
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("PEXPIRE", e))?;
        if updated == 0 && ttl.is_zero() {
            return self.exists(key).await;
        }
        Ok(updated > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: u64 = conn
            .sadd(self.prefixed(key), member)
            .await
            .map_err(|e| store_error("SADD", e))?;
        Ok(added > 0)
    }

    async fn index_add(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: u64 = Script::new(INDEX_ADD_SCRIPT)
            .key(self.prefixed(key))
            .arg(member)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("EVAL index_add", e))?;
        Ok(added > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(self.prefixed(key))
            .await
            .map_err(|e| store_error("SMEMBERS", e))?;
        Ok(members)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value).arg("NX");
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let created: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("SET NX", e))?;
        Ok(created.is_some())
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = Script::new(DEL_IF_EQUALS_SCRIPT)
            .key(self.prefixed(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("EVAL del_if_equals", e))?;
        Ok(removed > 0)
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("FLUSHDB", e))?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = self.prefixed(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("SCAN", e))?;
            keys.extend(batch.into_iter().map(|key| self.unprefixed(key)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let mut conn = self.conn.clone();
        let raw: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("INFO", e))?;
        let keys: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("DBSIZE", e))?;
        Ok(StoreInfo {
            keys,
            ..parse_info(&raw)
        })
    }

    async fn pipeline(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for command in &commands {
            match command {
                StoreCommand::Get { key } => {
                    pipe.cmd("GET").arg(self.prefixed(key));
                }
                StoreCommand::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(self.prefixed(key)).arg(value);
                    if !ttl.is_zero() {
                        pipe.arg("PX").arg(ttl_millis(*ttl));
                    }
                }
                StoreCommand::Del { key } => {
                    pipe.cmd("DEL").arg(self.prefixed(key));
                }
                StoreCommand::Expire { key, ttl } if ttl.is_zero() => {
                    pipe.cmd("PERSIST").arg(self.prefixed(key));
                }
                StoreCommand::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE")
                        .arg(self.prefixed(key))
                        .arg(ttl_millis(*ttl));
                }
                StoreCommand::SetAdd { key, member } => {
                    pipe.cmd("SADD").arg(self.prefixed(key)).arg(member);
                }
                StoreCommand::IndexAdd { key, member, ttl } => {
                    pipe.cmd("EVAL")
                        .arg(INDEX_ADD_SCRIPT)
                        .arg(1)
                        .arg(self.prefixed(key))
                        .arg(member)
                        .arg(ttl_millis(*ttl));
                }
            }
        }

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("pipeline", e))?;
        commands
            .iter()
            .zip(values)
            .map(|(command, value)| reply_from(command, value))
            .collect()
    }
}
