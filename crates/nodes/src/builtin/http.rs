//! `http`: a single outbound HTTP request.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::de::{value_to_text, Scalar};
use crate::traits::parse_config;
use crate::{kinds, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    #[serde(default, alias = "endpoint")]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    body: Option<Value>,
    /// Non-2xx responses fail the step instead of being returned.
    #[serde(default)]
    fail_on_status: bool,
    #[serde(default)]
    timeout_secs: Option<Scalar>,
}

impl HttpConfig {
    fn url(&self) -> Result<&str, NodeError> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NodeError::config("http requires a url"))
    }

    fn method(&self) -> Result<Method, NodeError> {
        let raw = self.method.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("GET");
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .map_err(|_| NodeError::config(format!("invalid http method '{raw}'")))
    }

    fn timeout(&self) -> Result<Duration, NodeError> {
        let secs = self
            .timeout_secs
            .as_ref()
            .and_then(Scalar::as_f64)
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs)
            .map_err(|_| NodeError::config(format!("http timeoutSecs of {secs}s is out of range")))
    }
}

#[derive(Debug, Default, Clone)]
pub struct HttpNode;

#[async_trait]
impl ExecutableNode for HttpNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: HttpConfig = parse_config(kinds::HTTP, config)?;
        cfg.url()?;
        cfg.timeout()?;
        cfg.method().map(|_| ())
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: HttpConfig = parse_config(kinds::HTTP, config)?;
        let url = cfg.url()?;
        let method = cfg.method()?;

        let client = reqwest::Client::builder()
            .timeout(cfg.timeout()?)
            .build()
            .map_err(|e| NodeError::transport(format!("cannot build HTTP client: {e}")))?;
        let mut request = client.request(method.clone(), url);
        for (name, value) in cfg.headers.iter().flatten() {
            request = request.header(name.as_str(), value_to_text(value));
        }
        request = match &cfg.body {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::transport(format!("{method} {url} failed: {e}")))?;
        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.to_string(), Value::String(v.to_owned())))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::transport(format!("{method} {url}: cannot read body: {e}")))?;
        info!(%method, url, status = status.as_u16(), "http request finished");

        if cfg.fail_on_status && !status.is_success() {
            return Err(NodeError::transport(format!("{method} {url} returned {status}")));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(NodeOutput::new(json!({
            "statusCode": status.as_u16(),
            "ok": status.is_success(),
            "body": body,
            "headers": headers,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// Serve exactly one canned response and hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let body_len = text[..head_end]
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + body_len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn returns_status_and_json_body() {
        let (base, server) = serve_once("200 OK", r#"{"items":[1,2]}"#).await;
        let config = json!({
            "url": format!("{base}/items"),
            "method": "post",
            "headers": { "X-Trace": 42 },
            "body": { "q": "x" }
        });
        let out = HttpNode.execute(&config, &ctx()).await.unwrap();

        assert_eq!(out.value["statusCode"], 200);
        assert_eq!(out.value["body"]["items"], json!([1, 2]));
        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("post /items"));
        assert!(head.contains("x-trace: 42"));
    }

    #[tokio::test]
    async fn error_status_is_returned_by_default() {
        let (base, _server) = serve_once("503 Service Unavailable", "down").await;
        let out = HttpNode.execute(&json!({ "url": base }), &ctx()).await.unwrap();
        assert_eq!(out.value["statusCode"], 503);
        assert_eq!(out.value["ok"], false);
        assert_eq!(out.value["body"], "down");
    }

    #[tokio::test]
    async fn fail_on_status_turns_error_status_into_failure() {
        let (base, _server) = serve_once("500 Internal Server Error", "{}").await;
        let config = json!({ "url": base, "failOnStatus": true });
        let err = HttpNode.execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let config = json!({ "url": "http://127.0.0.1:1/", "timeoutSecs": "2" });
        let err = HttpNode.execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }

    #[test]
    fn validate_checks_url_and_method() {
        assert!(HttpNode.validate(&json!({ "url": "http://x", "method": "PATCH" })).is_ok());
        assert!(HttpNode.validate(&json!({ "method": "GET" })).is_err());
        assert!(HttpNode
            .validate(&json!({ "url": "http://x", "method": "NOT A METHOD" }))
            .is_err());
    }

    #[test]
    fn oversized_timeout_is_a_config_error() {
        let config = json!({ "url": "http://x", "timeoutSecs": 1e20 });
        assert!(matches!(HttpNode.validate(&config), Err(NodeError::Config(_))));
        assert!(HttpNode.validate(&json!({ "url": "http://x", "timeoutSecs": "{{t}}" })).is_ok());
    }
}
