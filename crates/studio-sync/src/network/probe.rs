//! 服务端可达性探测
//!
//! 系统网络状态先做快速预检；报告离线时直接返回，不发请求。
//! 否则向已知可达的地址发一个 HEAD 请求，限定超时，只有拿到响应才算在线。

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::network::{NetworkStatus, NetworkStatusListener};

/// 默认探测超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// 服务端是否真正可达
#[async_trait]
pub trait ConnectivityCheck: Send + Sync + std::fmt::Debug {
    async fn is_actually_online(&self) -> bool;
}

/// 基于 HEAD 请求的可达性探测
#[derive(Debug)]
pub struct ConnectivityProber {
    listener: Arc<dyn NetworkStatusListener>,
    client: Client,
    probe_url: String,
    timeout: Duration,
}

impl ConnectivityProber {
    pub fn new(
        listener: Arc<dyn NetworkStatusListener>,
        probe_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Other(format!("创建探测 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            listener,
            client,
            probe_url: probe_url.into(),
            timeout,
        })
    }

    pub fn probe_url(&self) -> &str {
        &self.probe_url
    }
}

#[async_trait]
impl ConnectivityCheck for ConnectivityProber {
    async fn is_actually_online(&self) -> bool {
        if self.listener.get_current_status().await == NetworkStatus::Offline {
            debug!("系统报告离线，跳过探测");
            return false;
        }

        let request = self.client.head(&self.probe_url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                debug!("探测成功: {} -> {}", self.probe_url, response.status());
                true
            }
            Ok(Err(e)) => {
                debug!("探测失败: {} ({})", self.probe_url, e);
                false
            }
            Err(_) => {
                debug!("探测超时: {} ({:?})", self.probe_url, self.timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_helpers::DummyNetworkStatusListener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 启动一个本地 HTTP 桩，`respond` 为 false 时只接受连接不回复
    async fn spawn_stub(respond: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    if respond {
                        let _ = socket
                            .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
                            .await;
                    } else {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                });
            }
        });
        format!("http://{}/health", addr)
    }

    fn listener(status: NetworkStatus) -> Arc<dyn NetworkStatusListener> {
        Arc::new(DummyNetworkStatusListener::new(status))
    }

    #[tokio::test]
    async fn test_probe_online_when_server_answers() {
        let url = spawn_stub(true).await;
        let prober = ConnectivityProber::new(listener(NetworkStatus::Online), url, DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(prober.is_actually_online().await);
    }

    #[tokio::test]
    async fn test_probe_short_circuits_when_os_offline() {
        let url = spawn_stub(true).await;
        let prober = ConnectivityProber::new(listener(NetworkStatus::Offline), url, DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(!prober.is_actually_online().await);
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let url = spawn_stub(false).await;
        let prober = ConnectivityProber::new(
            listener(NetworkStatus::Online),
            url,
            Duration::from_millis(200),
        )
        .unwrap();

        let started = std::time::Instant::now();
        assert!(!prober.is_actually_online().await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_probe_offline_when_connection_refused() {
        // 先占用端口再释放，得到一个大概率无人监听的地址
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let prober = ConnectivityProber::new(
            listener(NetworkStatus::Limited),
            format!("http://{}/", addr),
            DEFAULT_PROBE_TIMEOUT,
        )
        .unwrap();
        assert!(!prober.is_actually_online().await);
    }
}
