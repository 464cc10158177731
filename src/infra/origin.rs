//! HTTP loader that fetches warmup items from the storefront origin.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::application::warmup::{WarmupKind, WarmupLoader};
use crate::cache::SourceError;
use crate::config::OriginSettings;
use crate::infra::error::InfraError;

#[derive(Clone, Debug)]
pub struct OriginClient {
    client: Client,
    base: Option<Url>,
}

impl OriginClient {
    pub fn new(settings: &OriginSettings) -> Result<Self, InfraError> {
        let base = settings
            .base_url
            .as_deref()
            .map(|raw| Url::parse(raw).and_then(|url| url.join("/")))
            .transpose()
            .map_err(|e| InfraError::configuration(format!("invalid origin.base_url: {e}")))?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|e| InfraError::origin(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("storefront-cache/", env!("CARGO_PKG_VERSION"))
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }

    fn url(&self, kind: WarmupKind, item: &str) -> Result<Url, SourceError> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| SourceError::Unavailable("no origin configured".into()))?;
        let path = match kind {
            WarmupKind::Products => format!("api/products/{}", item.trim_start_matches('/')),
            WarmupKind::Pages => item.to_string(),
            WarmupKind::Custom => item.trim_start_matches('/').to_string(),
        };
        base.join(&path)
            .map_err(|e| SourceError::failed(format!("invalid item `{item}`: {e}")))
    }
}

fn request_error(error: reqwest::Error) -> SourceError {
    if error.is_connect() || error.is_timeout() {
        SourceError::Unavailable(error.to_string())
    } else {
        SourceError::failed(error.to_string())
    }
}

#[async_trait]
impl WarmupLoader for OriginClient {
    async fn load(&self, kind: WarmupKind, item: &str) -> Result<Value, SourceError> {
        let url = self.url(kind, item)?;
        debug!(kind = kind.as_str(), url = %url, "loading warmup item from origin");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(request_error)?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(item.to_string())),
            status if !status.is_success() => {
                return Err(SourceError::failed(format!(
                    "origin answered {status} for `{item}`"
                )));
            }
            _ => {}
        }

        match kind {
            WarmupKind::Pages => Ok(Value::String(
                response.text().await.map_err(request_error)?,
            )),
            WarmupKind::Products | WarmupKind::Custom => {
                response.json::<Value>().await.map_err(request_error)
            }
        }
    }
}
