//! Opening the byte stream for one chat completion.
//!
//! [`ChatTransport`] is the seam between the streaming session and the
//! network: the session only sees a stream of raw body chunks, already
//! classified errors, and nothing about HTTP.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::api::ChatRequest;
use crate::core::builtin_models::ProviderRoute;
use crate::core::error::{PermanentKind, StreamError, TransientKind};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and return the response body once the provider has
    /// accepted it. Non-success statuses are returned as errors.
    async fn open(&self, route: &ProviderRoute, request: &ChatRequest)
        -> Result<ByteStream, StreamError>;
}

/// Per-provider overrides from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

pub struct HttpTransport {
    client: reqwest::Client,
    credentials: HashMap<String, ProviderCredentials>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, credentials: HashMap<String, ProviderCredentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    fn credentials_for(&self, route: &ProviderRoute) -> Option<&ProviderCredentials> {
        self.credentials.get(&route.provider_id)
    }

    /// Configured key first, then the provider's environment variable.
    fn api_key_for(&self, route: &ProviderRoute) -> Result<String, StreamError> {
        let configured = self
            .credentials_for(route)
            .and_then(|creds| creds.api_key.clone())
            .filter(|key| !key.trim().is_empty());
        if let Some(key) = configured {
            return Ok(key);
        }

        match std::env::var(&route.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(StreamError::permanent(
                PermanentKind::Configuration,
                format!(
                    "No API key for {}. Set {} or run 'tutorchat set api-key {} <key>'.",
                    route.provider_name, route.api_key_env, route.provider_id
                ),
            )),
        }
    }

    fn base_url_for(&self, route: &ProviderRoute) -> String {
        self.credentials_for(route)
            .and_then(|creds| creds.base_url.clone())
            .unwrap_or_else(|| route.base_url.clone())
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(
        &self,
        route: &ProviderRoute,
        request: &ChatRequest,
    ) -> Result<ByteStream, StreamError> {
        let api_key = self.api_key_for(route)?;
        let chat_url = construct_api_url(&self.base_url_for(route), "chat/completions");
        debug!(
            provider = %route.provider_id,
            model = %request.model,
            messages = request.messages.len(),
            "Opening chat completion stream"
        );

        let http_request = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        let response = add_auth_headers(http_request, &api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            let error = StreamError::from_status(status.as_u16(), &body);
            warn!(status = status.as_u16(), provider = %route.provider_id, "Chat request rejected: {error}");
            return Err(error);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(classify_reqwest_error));
        Ok(body.boxed())
    }
}

/// Timeouts and connection failures are worth retrying; a request that could
/// not even be built is not.
pub fn classify_reqwest_error(err: reqwest::Error) -> StreamError {
    if let Some(status) = err.status() {
        return StreamError::from_status(status.as_u16(), "");
    }
    if err.is_builder() {
        return StreamError::permanent(PermanentKind::BadRequest, err.to_string());
    }
    if err.is_decode() {
        return StreamError::permanent(PermanentKind::MalformedResponse, err.to_string());
    }
    if err.is_timeout() {
        return StreamError::transient(TransientKind::Network, format!("request timed out: {err}"));
    }
    StreamError::transient(TransientKind::Network, err.to_string())
}
