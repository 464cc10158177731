//! Systems of record behind the cache.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("`{0}` not found at the source")]
    NotFound(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source call failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SourceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Loads the authoritative value for a key on a cache miss.
#[async_trait]
pub trait DataSource<T>: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<T, SourceError>;
}

/// Persists a value to the system of record.
#[async_trait]
pub trait DataSink<T>: Send + Sync {
    async fn write(&self, key: &str, value: &T) -> Result<(), SourceError>;
}

#[derive(Clone)]
pub struct FnSource<F>(F);

/// Adapt an async closure `Fn(String) -> Result<T, SourceError>` into a [`DataSource`].
pub fn source_fn<F>(fetch: F) -> FnSource<F> {
    FnSource(fetch)
}

#[async_trait]
impl<T, F, Fut> DataSource<T> for FnSource<F>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, SourceError>> + Send,
{
    async fn fetch(&self, key: &str) -> Result<T, SourceError> {
        (self.0)(key.to_string()).await
    }
}

#[derive(Clone)]
pub struct FnSink<F>(F);

/// Adapt an async closure `Fn(String, T) -> Result<(), SourceError>` into a [`DataSink`].
pub fn sink_fn<F>(write: F) -> FnSink<F> {
    FnSink(write)
}

#[async_trait]
impl<T, F, Fut> DataSink<T> for FnSink<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(String, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SourceError>> + Send,
{
    async fn write(&self, key: &str, value: &T) -> Result<(), SourceError> {
        (self.0)(key.to_string(), value.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_adapt_to_source_and_sink() {
        let source = source_fn(|key: String| async move {
            if key == "missing" {
                Err(SourceError::NotFound(key))
            } else {
                Ok(key.len())
            }
        });
        assert_eq!(source.fetch("abcd").await.expect("found"), 4);
        assert!(matches!(
            source.fetch("missing").await,
            Err(SourceError::NotFound(_))
        ));

        let sink = sink_fn(|key: String, value: usize| async move {
            if value == 0 {
                Err(SourceError::failed(format!("refusing empty {key}")))
            } else {
                Ok(())
            }
        });
        assert!(sink.write("a", &1).await.is_ok());
        assert!(sink.write("a", &0).await.is_err());
    }
}
