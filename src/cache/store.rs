//! Contract over the shared key-value store.
//!
//! The cache never talks to a concrete backend; adapters live in
//! `crate::infra::store`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("key `{0}` holds a value of the wrong type")]
    WrongType(String),
}

impl StoreError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }
}

/// A single command in a [`KeyValueStore::pipeline`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Get { key: String },
    Set { key: String, value: String, ttl: Duration },
    Del { key: String },
    Expire { key: String, ttl: Duration },
    SetAdd { key: String, member: String },
    /// [`KeyValueStore::index_add`].
    IndexAdd { key: String, member: String, ttl: Duration },
}

/// Reply to a [`StoreCommand`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    Value(Option<String>),
    Done,
    Count(u64),
    Flag(bool),
}

/// Server-side figures reported by the store. Zeroed when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub keys: u64,
    pub memory_bytes: u64,
    pub uptime_seconds: u64,
    pub connected_clients: u64,
    pub total_commands: u64,
}

/// Remote key-value store with TTLs, atomic create-if-absent and sets.
///
/// A TTL of [`Duration::ZERO`] stores the entry without expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reset the TTL of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Add `member` to the set at `key`. Returns true when it was not present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Add `member` to the set at `key` and make sure the set lives at least
    /// `ttl` from now. An existing expiry is only ever pushed later, and a
    /// zero `ttl` removes it. Returns true when the member was not present.
    async fn index_add(&self, key: &str, member: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Members of the set at `key`; empty when the set does not exist.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Create `key` only if it does not exist. Returns true on creation.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Delete `key` only while it still holds `expected`. Returns true when
    /// the key was removed.
    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Remove every key in the store.
    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Keys matching a glob pattern. Potentially expensive.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn info(&self) -> Result<StoreInfo, StoreError>;

    /// Run a batch of commands. Backends with native pipelining override this;
    /// the default issues the commands one after another.
    async fn pipeline(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = match command {
                StoreCommand::Get { key } => StoreReply::Value(self.get(&key).await?),
                StoreCommand::Set { key, value, ttl } => {
                    self.set(&key, &value, ttl).await?;
                    StoreReply::Done
                }
                StoreCommand::Del { key } => {
                    StoreReply::Count(self.del(std::slice::from_ref(&key)).await?)
                }
                StoreCommand::Expire { key, ttl } => StoreReply::Flag(self.expire(&key, ttl).await?),
                StoreCommand::SetAdd { key, member } => {
                    StoreReply::Flag(self.set_add(&key, &member).await?)
                }
                StoreCommand::IndexAdd { key, member, ttl } => {
                    StoreReply::Flag(self.index_add(&key, &member, ttl).await?)
                }
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}
