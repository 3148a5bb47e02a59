//! Authenticated GET transport.
//!
//! Every resolver and stage client takes an `Arc<dyn Transport>` so tests can
//! substitute `fakes::FakeTransport` without touching the network.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;

/// A resolved transport call.
///
/// `data == None` means "no record found": a 404, an empty body or a JSON
/// `null` all read the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub data: Option<Value>,
}

impl HttpResponse {
    pub fn ok(data: Value) -> Self {
        let data = if data.is_null() { None } else { Some(data) };
        HttpResponse { status: 200, data }
    }

    pub fn empty() -> Self {
        HttpResponse {
            status: 200,
            data: None,
        }
    }

    pub fn not_found() -> Self {
        HttpResponse {
            status: 404,
            data: None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET. Rejects only on hard transport failure.
    async fn get(&self, url: &str, access_token: Option<&str>)
        -> Result<HttpResponse, TransportError>;
}

/// `base` with `id` appended as one percent-encoded path segment, so ids read
/// from storage cannot add path components or a query of their own.
pub fn resource_url(
    base: &str,
    id: &str,
    query: &[(&str, &str)],
) -> Result<String, TransportError> {
    let invalid = |message: String| TransportError::Request {
        url: base.to_string(),
        message,
    };
    let mut url = reqwest::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot take path segments".to_string()))?
        .push(id);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.into())
}

/// reqwest-backed transport.
///
/// Tokens are Azure DevOps personal access tokens, sent as basic auth with an
/// empty user name.
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("spektate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(HttpTransport { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        HttpTransport { http_client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        access_token: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.http_client.get(url);
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            request = request.basic_auth("", Some(token));
        }

        let response = request.send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "GET");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(HttpResponse::not_found());
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(HttpResponse {
                status: status.as_u16(),
                data: None,
            });
        }

        let data: Value = serde_json::from_slice(&body).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            data: if data.is_null() { None } else { Some(data) },
        })
    }
}
