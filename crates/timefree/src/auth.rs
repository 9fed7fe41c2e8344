//! Two-step device handshake.
//!
//! Step one hands out an auth token plus a `(length, offset)` challenge into the
//! shared secret; step two answers with the base64 of that slice and returns the
//! caller's region as the first field of a comma separated record.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ServiceContract;
use crate::error::{Result, TimefreeError};
use crate::retry::{RetryPolicy, retry_transient};
use crate::transport::{HttpResponse, Transport};

const HEADER_USER: HeaderName = HeaderName::from_static("x-radiko-user");
const HEADER_APP: HeaderName = HeaderName::from_static("x-radiko-app");
const HEADER_APP_VERSION: HeaderName = HeaderName::from_static("x-radiko-app-version");
const HEADER_DEVICE: HeaderName = HeaderName::from_static("x-radiko-device");
pub const HEADER_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-radiko-authtoken");
const HEADER_PARTIAL_KEY: HeaderName = HeaderName::from_static("x-radiko-partialkey");
const HEADER_KEY_LENGTH: &str = "x-radiko-keylength";
const HEADER_KEY_OFFSET: &str = "x-radiko-keyoffset";

/// Credentials for one run. Shared read-only by every later request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub headers: HeaderMap,
    pub area_id: String,
}

/// Answer to the key challenge: base64 of `secret[offset..offset + length]`, byte exact.
pub fn partial_key(secret: &str, offset: usize, length: usize) -> Result<String> {
    let end = offset
        .checked_add(length)
        .filter(|end| *end <= secret.len())
        .ok_or_else(|| {
            TimefreeError::auth(
                "auth1",
                format!(
                    "key slice {offset}+{length} is outside the {}-byte secret",
                    secret.len()
                ),
            )
        })?;
    Ok(STANDARD.encode(&secret.as_bytes()[offset..end]))
}

pub struct AuthSession {
    transport: Arc<dyn Transport>,
    service: ServiceContract,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl AuthSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        service: ServiceContract,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            service,
            retry,
            token,
        }
    }

    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<AuthContext> {
        let mut identity = HeaderMap::new();
        identity.insert(HEADER_USER, header_value(&self.service.user)?);
        identity.insert(HEADER_APP, header_value(&self.service.app)?);
        identity.insert(HEADER_APP_VERSION, header_value(&self.service.app_version)?);
        identity.insert(HEADER_DEVICE, header_value(&self.service.device)?);

        let first = self
            .request("auth1", &self.service.auth1_url, &identity)
            .await?;
        let auth_token = required_header(&first, HEADER_AUTH_TOKEN.as_str())?;
        let key_length = numeric_header(&first, HEADER_KEY_LENGTH)?;
        let key_offset = numeric_header(&first, HEADER_KEY_OFFSET)?;
        debug!(key_length, key_offset, "Received key challenge");

        let key = partial_key(&self.service.auth_key, key_offset, key_length)?;

        let mut headers = identity;
        headers.insert(HEADER_AUTH_TOKEN, header_value(auth_token)?);
        headers.insert(HEADER_PARTIAL_KEY, header_value(&key)?);

        let second = self
            .request("auth2", &self.service.auth2_url, &headers)
            .await?;
        let area_id = parse_area(second.text()?)?;
        info!(area_id = %area_id, "Authenticated");

        Ok(AuthContext { headers, area_id })
    }

    async fn request(
        &self,
        step: &'static str,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<HttpResponse> {
        let url = Url::parse(url).map_err(|e| TimefreeError::auth(step, format!("bad URL: {e}")))?;
        retry_transient(&self.retry, &self.token, step, || {
            self.transport.get(&url, headers, step)
        })
        .await
        .map_err(|e| match e {
            TimefreeError::Cancelled => e,
            other => TimefreeError::auth(step, other.to_string()),
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TimefreeError::config(format!("invalid header value `{value}`: {e}")))
}

fn required_header<'a>(response: &'a HttpResponse, name: &str) -> Result<&'a str> {
    response
        .header_str(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TimefreeError::auth("auth1", format!("response lacks `{name}`")))
}

fn numeric_header(response: &HttpResponse, name: &str) -> Result<usize> {
    let raw = required_header(response, name)?;
    raw.trim()
        .parse()
        .map_err(|_| TimefreeError::auth("auth1", format!("`{name}` is not a number: {raw}")))
}

/// First field of the `area,name,...` record.
fn parse_area(body: &str) -> Result<String> {
    body.trim()
        .split(',')
        .next()
        .map(str::trim)
        .filter(|area| !area.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| TimefreeError::auth("auth2", "response carries no region"))
}
