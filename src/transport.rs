//! REST transport seam.
//!
//! The workflow core never builds HTTP requests itself; it talks to a
//! [`Transport`]. [`HttpTransport`] is the production implementation,
//! tests substitute in-memory fakes or point it at a `wiremock` server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;

use crate::config::Config;
use crate::errors::{Result, WorkflowError};
use crate::models::envelope::envelope_message;

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` with `query` pairs. Returns the decoded body, envelope intact.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    /// POST `body` as JSON to `path`. Returns the decoded body, envelope intact.
    async fn post(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Percent-encode one path segment.
pub fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

pub struct HttpTransport {
    base_url: url::Url,
    api_token: Option<String>,
    /// Reads: retried on transient failures.
    client: ClientWithMiddleware,
    /// Writes: sent exactly once.
    write_client: ClientWithMiddleware,
}

impl HttpTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base_url = url::Url::parse(&cfg.api_url)
            .map_err(|e| WorkflowError::InvalidArgument(format!("api url '{}': {}", cfg.api_url, e)))?;

        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(cfg.http_timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("workflow-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkflowError::Internal(e.into()))?;

        // Retries cover connection failures and 5xx/429 only, and only for GET.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(cfg.http_retries);

        let client = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let write_client = ClientBuilder::new(reqwest_client).build();

        Ok(Self {
            base_url,
            api_token: cfg.api_token.clone(),
            client,
            write_client,
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<url::Url> {
        // appended, not joined: a base like https://host/backend keeps its prefix
        let full = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        let mut url = url::Url::parse(&full)
            .map_err(|e| WorkflowError::InvalidArgument(format!("path '{}': {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn execute(&self, builder: reqwest_middleware::RequestBuilder, url: &url::Url) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut builder = builder
            .header("accept", "application/json")
            .header("x-request-id", &request_id);
        if let Some(token) = &self.api_token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }

        let resp = builder.send().await.map_err(|e| {
            tracing::warn!(url = %url, request_id = %request_id, error = %e, "workflow api request failed");
            WorkflowError::Transport(e.to_string())
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| WorkflowError::Transport(format!("failed to read body: {}", e)))?;

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) if status.is_success() => {
                    return Err(WorkflowError::Decode(format!(
                        "{} (body: {})",
                        e,
                        text.chars().take(200).collect::<String>()
                    )));
                }
                Err(_) => Value::String(text.clone()),
            }
        };

        if !status.is_success() {
            let message = envelope_message(&body)
                .or_else(|| body.as_str().map(str::to_string))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            tracing::debug!(url = %url, status = status.as_u16(), %message, "workflow api returned error status");
            return Err(WorkflowError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path, query)?;
        let builder = self.client.get(url.clone());
        self.execute(builder, &url).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path, &[])?;
        let payload = serde_json::to_vec(body)?;
        let builder = self
            .write_client
            .post(url.clone())
            .header("content-type", "application/json")
            .body(payload);
        self.execute(builder, &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer, token: Option<&str>) -> HttpTransport {
        let cfg = Config {
            api_url: server.uri(),
            api_token: token.map(str::to_string),
            http_retries: 0,
            ..Config::default()
        };
        HttpTransport::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_query_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflow/pending"))
            .and(query_param("role", "MANAGER"))
            .and(header("authorization", "Bearer t0k"))
            .and(header_exists("x-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let t = transport_for(&server, Some("t0k"));
        let body = t
            .get("/api/workflow/pending", &[("role", "MANAGER".to_string())])
            .await
            .unwrap();
        assert_eq!(body, json!({"data": []}));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflow/approve"))
            .and(body_json(json!({"requestId": 1, "action": "APPROVE"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let t = transport_for(&server, None);
        let body = t
            .post("/api/workflow/approve", &json!({"requestId": 1, "action": "APPROVE"}))
            .await
            .unwrap();
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_error_status_carries_envelope_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflow/request"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"success": false, "error": "invalid transition"})),
            )
            .mount(&server)
            .await;

        let t = transport_for(&server, None);
        let err = t.post("/api/workflow/request", &json!({})).await.unwrap_err();
        match err {
            WorkflowError::Http { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "invalid transition");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let cfg = Config {
            api_url: "http://127.0.0.1:1".into(),
            http_retries: 0,
            ..Config::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        let err = t.get("/api/workflow/pending", &[]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Transport(_)));
    }

    #[tokio::test]
    async fn test_post_is_not_retried_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflow/approve"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = Config {
            api_url: server.uri(),
            http_retries: 2,
            ..Config::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        let err = t.post("/api/workflow/approve", &json!({"requestId": 1})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_get_is_retried_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflow/pending"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let cfg = Config {
            api_url: server.uri(),
            http_retries: 1,
            ..Config::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        let err = t.get("/api/workflow/pending", &[]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/backend/api/workflow/pending"))
            .and(query_param("role", "LEAD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = Config {
            api_url: format!("{}/backend", server.uri()),
            http_retries: 0,
            ..Config::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        let body = t
            .get("/api/workflow/pending", &[("role", "LEAD".to_string())])
            .await
            .unwrap();
        assert_eq!(body, json!({"data": []}));
    }

    #[test]
    fn test_url_building_with_trailing_slash() {
        let cfg = Config {
            api_url: "https://example.com/backend/".into(),
            ..Config::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        let url = t.url("/api/workflow/request/7", &[]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/backend/api/workflow/request/7");
    }

    #[tokio::test]
    async fn test_non_json_success_body_with_multibyte_text() {
        let server = MockServer::start().await;
        let body = format!("{}é<html><body>gateway timeout</body></html>", "a".repeat(199));
        Mock::given(method("GET"))
            .and(path("/api/workflow/pending"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let t = transport_for(&server, None);
        let err = t.get("/api/workflow/pending", &[]).await.unwrap_err();
        match err {
            WorkflowError::Decode(msg) => assert!(msg.contains("aaa")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
        assert_eq!(segment("TASK"), "TASK");
    }
}
