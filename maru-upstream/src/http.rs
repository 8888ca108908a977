//! reqwest-backed transport for the trading REST API.

use crate::request::{Method, UpstreamRequest};
use crate::transport::{RawResponse, TransportError, UpstreamTransport};
use async_trait::async_trait;
use maru_core::constants::DEFAULT_POOL_MAX_IDLE_PER_HOST;
use maru_core::{ConfigError, GatewayConfig};
use reqwest::Client;
use std::time::Duration;

/// HTTP transport over a pooled reqwest client.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `base_url` with the given connect timeout.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            field: "upstream_base_url".to_string(),
            value: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client".to_string(),
                value: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Self::new(&config.upstream_base_url, config.connect_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn map_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_reqwest(request.method), self.url_for(&request.path))
            .header("x-request-id", request.request_id.to_string())
            .header("accept", "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_error)?;

        Ok(RawResponse::new(status, body.to_vec()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = HttpTransport::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "upstream_base_url"));
    }

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("http://localhost:8099/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url_for("/health"), "http://localhost:8099/health");
        assert_eq!(
            transport.url_for("api/v1/admin/accounts"),
            "http://localhost:8099/api/v1/admin/accounts"
        );
    }

    #[tokio::test]
    async fn test_get_with_query_and_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/admin/instruments"))
            .and(query_param("market", "SPOT"))
            .and(header_exists("x-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"symbol": "BTC-USD"}])))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), Duration::from_secs(1)).unwrap();
        let request = UpstreamRequest::get("/api/v1/admin/instruments").with_query("market", "SPOT");
        let response = transport.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!([{"symbol": "BTC-USD"}]));
    }

    #[tokio::test]
    async fn test_put_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/admin/kill-switch"))
            .and(body_json(json!({"enabled": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), Duration::from_secs(1)).unwrap();
        let request = UpstreamRequest::put("/api/v1/admin/kill-switch", json!({"enabled": true}));
        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/admin/accounts/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Account not found"})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), Duration::from_secs(1)).unwrap();
        let response = transport
            .send(&UpstreamRequest::get("/api/v1/admin/accounts/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_transport_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = transport
            .send(&UpstreamRequest::get("/health"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_) | TransportError::Other(_)));
    }
}
