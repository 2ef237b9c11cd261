use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

pub mod probe;

pub use probe::{ConnectivityCheck, ConnectivityProber};

/// 系统报告的网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 网络受限（例如只连上了局域网）
    Limited,
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

/// 系统网络状态监听器 trait（由平台层实现）
///
/// 系统给出的“在线”并不可靠，只用作快速预检，真正的可达性由 [`ConnectivityProber`] 判断。
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 没有平台网络回调时使用：始终报告在线，由探测请求决定真实状态
#[derive(Debug)]
pub struct AssumeOnlineListener {
    sender: broadcast::Sender<NetworkStatusEvent>,
}

impl Default for AssumeOnlineListener {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }
}

#[async_trait]
impl NetworkStatusListener for AssumeOnlineListener {
    async fn get_current_status(&self) -> NetworkStatus {
        NetworkStatus::Online
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        Ok(self.sender.subscribe())
    }

    async fn stop_monitoring(&self) {}
}

/// 可达性变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityTransition {
    BecameOnline,
    BecameOffline,
    Unchanged,
}

/// 记录上一次探测结果，识别在线 / 离线切换
#[derive(Debug, Default)]
pub struct NetworkMonitor {
    last_reachable: Arc<Mutex<Option<bool>>>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次探测结果并返回状态变化（首次观测也算一次变化）
    pub fn observe(&self, reachable: bool) -> ReachabilityTransition {
        let mut last = self.last_reachable.lock();
        let previous = last.replace(reachable);
        match (previous, reachable) {
            (Some(before), now) if before == now => ReachabilityTransition::Unchanged,
            (_, true) => ReachabilityTransition::BecameOnline,
            (_, false) => ReachabilityTransition::BecameOffline,
        }
    }

    /// 最近一次探测结果
    pub fn is_reachable(&self) -> Option<bool> {
        *self.last_reachable.lock()
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 测试用：可手动切换状态的系统网络监听器
    #[derive(Debug)]
    pub struct DummyNetworkStatusListener {
        status: Mutex<NetworkStatus>,
        sender: broadcast::Sender<NetworkStatusEvent>,
    }

    impl DummyNetworkStatusListener {
        pub fn new(status: NetworkStatus) -> Self {
            let (sender, _) = broadcast::channel(16);
            Self {
                status: Mutex::new(status),
                sender,
            }
        }

        /// 切换状态并广播
        pub fn set_status(&self, new_status: NetworkStatus) {
            let old_status = std::mem::replace(&mut *self.status.lock(), new_status);
            let _ = self.sender.send(NetworkStatusEvent {
                old_status,
                new_status,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
    }

    #[async_trait]
    impl NetworkStatusListener for DummyNetworkStatusListener {
        async fn get_current_status(&self) -> NetworkStatus {
            *self.status.lock()
        }

        async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
            Ok(self.sender.subscribe())
        }

        async fn stop_monitoring(&self) {}
    }

    /// 测试用：固定返回结果的可达性探测，记录探测次数
    #[derive(Debug)]
    pub struct StaticConnectivity {
        online: AtomicBool,
        probes: AtomicUsize,
    }

    impl StaticConnectivity {
        pub fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
                probes: AtomicUsize::new(0),
            }
        }

        pub fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        pub fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectivityCheck for StaticConnectivity {
        async fn is_actually_online(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.online.load(Ordering::SeqCst)
        }
    }
}
