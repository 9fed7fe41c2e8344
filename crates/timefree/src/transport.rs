//! HTTP access for every component of the engine.
//!
//! Components talk to the service through [`Transport`] so a run can be driven
//! against a scripted service in tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Result, TimefreeError};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| TimefreeError::parse("response body", format!("invalid UTF-8: {e}")))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET. Non-2xx statuses are returned as [`TimefreeError::HttpStatus`].
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        operation: &'static str,
    ) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let mut default_headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| TimefreeError::config(format!("invalid user agent: {e}")))?;
    default_headers.insert(USER_AGENT, user_agent);

    let client = Client::builder()
        .default_headers(default_headers)
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .build()?;
    Ok(client)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        operation: &'static str,
    ) -> Result<HttpResponse> {
        trace!(%url, operation, "GET");
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TimefreeError::http_status(status, url.as_str(), operation));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
