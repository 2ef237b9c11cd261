//! 事件系统模块 - 连接状态与同步生命周期通知
//!
//! 功能包括：
//! - 同步开始 / 完成 / 出错 / 冲突事件
//! - 在线 / 离线切换事件
//! - 同步回调订阅（按订阅顺序、在发布方上下文中同步调用）
//! - 广播通道订阅（供异步 UI 状态指示使用）
//!
//! # 监听器约束
//!
//! 监听器不得 panic：总线不隔离监听器失败，panic 会直接传播给发布方。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::PendingOperation;

/// 一次同步的汇总结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
}

impl SyncSummary {
    pub fn is_empty(&self) -> bool {
        self.synced == 0 && self.failed == 0 && self.conflicts == 0
    }
}

/// 同步事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 开始一次同步
    SyncStart,
    /// 同步完成
    SyncComplete(SyncSummary),
    /// 同步整体失败（例如读取队列失败）
    SyncError { cause: String },
    /// 单条操作与服务端冲突，已按服务端为准处理
    SyncConflict {
        operation: PendingOperation,
        server_error: String,
    },
    /// 服务端重新可达
    Online,
    /// 服务端不可达
    Offline,
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SyncStart => "sync_start",
            SyncEvent::SyncComplete(_) => "sync_complete",
            SyncEvent::SyncError { .. } => "sync_error",
            SyncEvent::SyncConflict { .. } => "sync_conflict",
            SyncEvent::Online => "online",
            SyncEvent::Offline => "offline",
        }
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
}

struct Listeners {
    next_id: u64,
    entries: Vec<(u64, EventListener)>,
}

/// 事件总线
pub struct EventBus {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 回调监听器（按订阅顺序）
    listeners: Arc<RwLock<Listeners>>,
    stats: Mutex<EventStats>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().entries.len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// 注册回调监听器，返回用于取消订阅的句柄
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));

        self.stats.lock().listener_count = listeners.entries.len();

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// 订阅广播通道（异步消费者使用）
    pub fn subscribe_channel(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 发布事件
    ///
    /// 回调在当前上下文中按订阅顺序同步执行。
    pub fn publish(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.lock();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.listener_count = self.listeners.read().entries.len();
        }

        // 先复制一份，回调里可以再订阅 / 取消订阅而不死锁
        let snapshot: Vec<EventListener> = self
            .listeners
            .read()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(&event);
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().entries.len()
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.lock().clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 订阅句柄
#[must_use = "丢弃句柄后将无法取消订阅"]
pub struct Subscription {
    id: u64,
    listeners: Weak<RwLock<Listeners>>,
}

impl Subscription {
    /// 取消订阅；总线已释放时为空操作
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().entries.retain(|(id, _)| *id != self.id);
        }
    }
}
