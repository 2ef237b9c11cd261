//! 基于 reqwest 的业务 API 客户端

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HttpClientConfig;
use crate::error::{Result, SyncError};
use crate::remote::{HttpMethod, RemoteApi};

/// HTTP 业务 API 客户端
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpRemoteApi {
    /// 创建新的 HTTP 客户端
    pub fn new(
        base_url: impl Into<String>,
        config: &HttpClientConfig,
        bearer_token: Option<String>,
    ) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| SyncError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("✅ HTTP 客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            bearer_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// 没有收到响应的请求错误归为网络层失败
fn classify_transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(e.to_string())
    } else {
        SyncError::Network(e.to_string())
    }
}

/// 从错误响应中提取可读的错误信息
fn error_message(text: &str) -> String {
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(text) {
        for key in ["message", "error"] {
            match body.get(key) {
                Some(Value::String(message)) => return message.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    text.to_string()
}

/// 响应体：空 → Null，非 JSON → 原文字符串
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn send(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url_for(path);
        debug!("🌐 {} {}", method, url);

        let mut request = self.client.request(method.into(), &url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        // 状态码已收到，读取响应体失败不再算作网络失败
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if status.is_success() => {
                warn!("⚠️ {} {} 成功 ({}) 但响应体读取失败: {}", method, url, status, e);
                return Ok(Value::Null);
            }
            Err(e) => {
                warn!("❌ {} {} 失败，HTTP 状态码: {}, 响应体读取失败: {}", method, url, status, e);
                return Err(SyncError::from_http_status(status.as_u16(), e.to_string()));
            }
        };

        if !status.is_success() {
            let message = error_message(&text);
            warn!("❌ {} {} 失败，HTTP 状态码: {}, 错误: {}", method, url, status, message);
            return Err(SyncError::from_http_status(status.as_u16(), message));
        }

        Ok(parse_body(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 启动只回复一次固定响应的本地 HTTP 桩，返回基础地址和收到的原始请求
    async fn spawn_stub(status_line: &'static str, body: &'static str) -> (String, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                *sink.lock() = String::from_utf8_lossy(&buf[..n]).to_string();
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{}/api", addr), captured)
    }

    fn client(base_url: &str, token: Option<&str>) -> HttpRemoteApi {
        HttpRemoteApi::new(base_url, &HttpClientConfig::default(), token.map(String::from)).unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_json() {
        let (base, captured) = spawn_stub("201 Created", r#"{"id": 501}"#).await;
        let api = client(&base, Some("secret"));

        let value = api
            .send(HttpMethod::Post, "/customers", Some(&json!({"name": "Lina"})))
            .await
            .unwrap();
        assert_eq!(value, json!({"id": 501}));

        let request = captured.lock().clone();
        assert!(request.starts_with("POST /api/customers HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_error_status_is_api_error() {
        let (base, _) = spawn_stub("409 Conflict", r#"{"message": "customer already exists"}"#).await;
        let err = client(&base, None)
            .send(HttpMethod::Post, "/customers", Some(&json!({})))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(!err.is_network_failure());
        match err {
            SyncError::Api { message, .. } => assert_eq!(message, "customer already exists"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let (base, _) = spawn_stub("200 OK", "").await;
        let value = client(&base, None)
            .send(HttpMethod::Delete, "/purchases/7", None)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    /// 声明的 content-length 比实际发送的多，随后断开连接
    async fn spawn_truncated_stub(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{{\"id\":",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_truncated_success_body_is_not_network_failure() {
        let base = spawn_truncated_stub("201 Created").await;
        let value = client(&base, None)
            .send(HttpMethod::Post, "/customers", Some(&json!({"name": "Lina"})))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_truncated_error_body_keeps_status() {
        let base = spawn_truncated_stub("500 Internal Server Error").await;
        let err = client(&base, None)
            .send(HttpMethod::Post, "/customers", Some(&json!({})))
            .await
            .unwrap_err();
        assert!(!err.is_network_failure());
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let err = client(&format!("http://{}", addr), None)
            .send(HttpMethod::Get, "/customers", None)
            .await
            .unwrap_err();
        assert!(err.is_network_failure());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error": "invalid token"}"#), "invalid token");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(parse_body("plain"), Value::String("plain".to_string()));
    }
}
