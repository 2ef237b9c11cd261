//! 业务 REST API 接入层
//!
//! 同步器和离线包装器只依赖 [`RemoteApi`]，生产环境使用基于 reqwest 的 [`HttpRemoteApi`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::storage::SyncAction;

pub mod http;

pub use http::HttpRemoteApi;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// 写操作对应的队列动作，GET 没有对应动作
    pub fn sync_action(self) -> Option<SyncAction> {
        match self {
            HttpMethod::Get => None,
            HttpMethod::Post => Some(SyncAction::Create),
            HttpMethod::Put => Some(SyncAction::Update),
            HttpMethod::Delete => Some(SyncAction::Delete),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// 业务 API
///
/// 网络层失败返回 `SyncError::Network` / `SyncError::Timeout`，
/// 服务端错误状态返回 `SyncError::Api`。
#[async_trait]
pub trait RemoteApi: Send + Sync + fmt::Debug {
    async fn send(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<Value>;
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::error::SyncError;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// 预设响应
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Json(Value),
        Status(u16, String),
        NetworkDown,
        TimedOut,
    }

    impl Scripted {
        fn into_result(self) -> Result<Value> {
            match self {
                Scripted::Json(value) => Ok(value),
                Scripted::Status(status, message) => Err(SyncError::from_http_status(status, message)),
                Scripted::NetworkDown => Err(SyncError::Network("connection refused".to_string())),
                Scripted::TimedOut => Err(SyncError::Timeout("request timed out".to_string())),
            }
        }
    }

    /// 一次调用记录
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedCall {
        pub method: HttpMethod,
        pub path: String,
        pub body: Option<Value>,
    }

    /// 测试用：按 (方法, 路径) 返回预设响应并记录所有调用
    #[derive(Debug)]
    pub struct ScriptedRemote {
        scripts: Mutex<HashMap<(HttpMethod, String), VecDeque<Scripted>>>,
        fallback: Mutex<Scripted>,
        calls: Mutex<Vec<RecordedCall>>,
        gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl Default for ScriptedRemote {
        fn default() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                fallback: Mutex::new(Scripted::Json(Value::Null)),
                calls: Mutex::new(Vec::new()),
                gate: Mutex::new(None),
            }
        }
    }

    impl ScriptedRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// 为某个请求追加一条响应（按追加顺序依次消费，用完后走默认响应）
        pub fn script(&self, method: HttpMethod, path: &str, response: Scripted) {
            self.scripts
                .lock()
                .entry((method, path.to_string()))
                .or_default()
                .push_back(response);
        }

        /// 没有预设时的默认响应
        pub fn set_fallback(&self, response: Scripted) {
            *self.fallback.lock() = response;
        }

        /// 之后的请求在记录后挂起，直到 [`Self::release_requests`]
        pub fn hold_requests(&self) {
            *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
        }

        /// 放行所有挂起和后续的请求
        pub fn release_requests(&self) {
            if let Some(gate) = self.gate.lock().take() {
                gate.close();
            }
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        /// 等待至少 `n` 次调用
        pub async fn wait_for_calls(&self, n: usize) {
            while self.call_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedRemote {
        async fn send(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<Value> {
            self.calls.lock().push(RecordedCall {
                method,
                path: path.to_string(),
                body: body.cloned(),
            });

            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                // 关闭后 acquire 立即返回 Err，即放行
                let _ = gate.acquire().await;
            }

            let scripted = self
                .scripts
                .lock()
                .get_mut(&(method, path.to_string()))
                .and_then(VecDeque::pop_front);
            scripted
                .unwrap_or_else(|| self.fallback.lock().clone())
                .into_result()
        }
    }
}
