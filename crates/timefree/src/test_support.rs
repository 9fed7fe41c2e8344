//! Scripted service used by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::Result;
use crate::transport::{HttpResponse, Transport};

type Handler = dyn Fn(&Url, &HeaderMap) -> Result<HttpResponse> + Send + Sync;

pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<(Url, HeaderMap)>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&Url, &HeaderMap) -> Result<HttpResponse> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(Url, HeaderMap)> {
        self.requests.lock().clone()
    }

    /// Requests whose path ends with `suffix`.
    pub fn count_path_suffix(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(url, _)| url.path().ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        _operation: &'static str,
    ) -> Result<HttpResponse> {
        self.requests.lock().push((url.clone(), headers.clone()));
        (self.handler)(url, headers)
    }
}

pub fn ok(body: impl Into<Bytes>) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: body.into(),
    })
}

pub fn ok_with_headers(headers: &[(&'static str, &str)], body: impl Into<Bytes>) -> Result<HttpResponse> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Ok(HttpResponse {
        status: StatusCode::OK,
        headers: map,
        body: body.into(),
    })
}

pub fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
