use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{ApiError, FeedApi};
use crate::model::{
    AddCommentResponse, DeleteCommentResponse, FeedSource, Id, LikeResponse, Page,
};
use crate::util::{validate_base_url, UrlValidationError};

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST implementation of [`FeedApi`].
///
/// Routes:
/// - `GET  {base}/achievements[/connections|/popular|/mine]?page=&per_page=`
/// - `POST {base}/achievements/{id}/like`, `DELETE` for unlike
/// - `POST {base}/achievements/{id}/comments` with `{"content": ...}`
/// - `DELETE {base}/comments/{id}`
///
/// Retrying is not done here: a 429 is surfaced as
/// [`ApiError::RateLimited`] so the request coordinator can apply backoff.
#[derive(Clone)]
pub struct HttpFeedApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpFeedApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeedApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpFeedApi {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        token: Option<SecretString>,
    ) -> Result<Self, UrlValidationError> {
        let base_url = validate_base_url(base_url)?;
        tracing::debug!(base_url = %base_url, authenticated = token.is_some(), "HTTP feed client ready");
        Ok(Self {
            client,
            base_url,
            token,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn source_path(source: FeedSource) -> &'static str {
        match source {
            FeedSource::All => "/achievements",
            FeedSource::Connections => "/achievements/connections",
            FeedSource::Popular => "/achievements/popular",
            FeedSource::Mine => "/achievements/mine",
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            );
        }
        request
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout)??;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ApiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl FeedApi for HttpFeedApi {
    async fn fetch_page(
        &self,
        source: FeedSource,
        page: u32,
        page_size: u32,
    ) -> Result<Page, ApiError> {
        let path = format!(
            "{}?page={}&per_page={}",
            Self::source_path(source),
            page,
            page_size
        );
        tracing::debug!(%source, page, page_size, "GET feed page");
        self.send_json(self.request(reqwest::Method::GET, &path))
            .await
    }

    async fn like(&self, item_id: &Id) -> Result<LikeResponse, ApiError> {
        let path = format!("/achievements/{}/like", encode_segment(item_id));
        self.send_json(self.request(reqwest::Method::POST, &path))
            .await
    }

    async fn unlike(&self, item_id: &Id) -> Result<LikeResponse, ApiError> {
        let path = format!("/achievements/{}/like", encode_segment(item_id));
        self.send_json(self.request(reqwest::Method::DELETE, &path))
            .await
    }

    async fn add_comment(&self, item_id: &Id, text: &str) -> Result<AddCommentResponse, ApiError> {
        let path = format!("/achievements/{}/comments", encode_segment(item_id));
        let body = serde_json::to_vec(&serde_json::json!({ "content": text }))
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let request = self
            .request(reqwest::Method::POST, &path)
            .header("Content-Type", "application/json")
            .body(body);
        self.send_json(request).await
    }

    async fn delete_comment(&self, comment_id: &Id) -> Result<DeleteCommentResponse, ApiError> {
        let path = format!("/comments/{}", encode_segment(comment_id));
        self.send_json(self.request(reqwest::Method::DELETE, &path))
            .await
    }
}

/// Percent-encode an id for use as a single path segment.
fn encode_segment(id: &Id) -> String {
    url::form_urlencoded::byte_serialize(id.as_str().as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
