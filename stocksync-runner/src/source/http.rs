//! Shared HTTP client with status classification.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stocksync_core::config::SourceConfig;
use stocksync_core::error::SourceError;
use tracing::debug;

/// Thin wrapper over `reqwest::Client` that maps every failure onto
/// [`SourceError`], so callers only ever see transient vs. fatal.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SourceError::Fatal {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response, url)?;
        response.text().await.map_err(transport_error)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response, url)?;
        decode_json(response, url).await
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, SourceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, url)?;
        decode_json(response, url).await
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::from_status(status.as_u16(), url))
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, SourceError> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| SourceError::ResponseFormat(format!("{url}: {e}")))
}

/// Connection problems and timeouts are worth retrying; a request that could
/// not even be built is not.
pub(crate) fn transport_error(err: reqwest::Error) -> SourceError {
    if let Some(status) = err.status() {
        return SourceError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_builder() {
        return SourceError::Fatal {
            status: None,
            message: err.to_string(),
        };
    }
    if err.is_decode() {
        return SourceError::ResponseFormat(err.to_string());
    }
    SourceError::Transient {
        status: None,
        message: err.to_string(),
    }
}
