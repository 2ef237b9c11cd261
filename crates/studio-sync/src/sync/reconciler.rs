/// 同步器
///
/// 职责：
/// - 按 create → update → delete 的顺序回放待同步队列
/// - 解析跨实体引用（本地标识 → 服务端 ID）
/// - 冲突以服务端为准
/// - 定时 / 重新联网 / 手动触发，同一时刻只允许一轮同步

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::endpoints::{EndpointTable, EntityEndpoint};
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent, SyncSummary};
use crate::network::{
    ConnectivityCheck, NetworkMonitor, NetworkStatusEvent, NetworkStatusListener, ReachabilityTransition,
};
use crate::remote::{HttpMethod, RemoteApi};
use crate::storage::{PendingOperation, RecordStore, SyncAction, DEFAULT_RETENTION_HOURS};
use crate::sync::references::resolve_references;

/// 服务端返回新记录 ID 时可能使用的字段名
const SERVER_ID_FIELDS: &[&str] = &["id", "insert_id", "insertId", "server_id", "record_id"];

/// 同步参数
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 定时同步间隔
    pub interval: Duration,
    /// 单次请求超时
    pub operation_timeout: Duration,
    /// 已同步记录保留时长（小时）
    pub retention_hours: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(15),
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }
}

/// 单条操作的回放结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplayOutcome {
    Synced,
    Conflict(String),
    Failed(String),
}

/// 同步进行中标记，离开作用域时清除
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// 同步器
pub struct SyncReconciler {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteApi>,
    prober: Arc<dyn ConnectivityCheck>,
    endpoints: Arc<EndpointTable>,
    events: Arc<EventBus>,
    options: SyncOptions,
    /// 系统网络状态（可选），状态变化时立即触发一次检查
    status_listener: Option<Arc<dyn NetworkStatusListener>>,
    monitor: NetworkMonitor,
    draining: AtomicBool,
    worker: parking_lot::Mutex<Option<Worker>>,
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("options", &self.options)
            .field("draining", &self.is_draining())
            .field("running", &self.is_running())
            .finish()
    }
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteApi>,
        prober: Arc<dyn ConnectivityCheck>,
        endpoints: Arc<EndpointTable>,
        events: Arc<EventBus>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            remote,
            prober,
            endpoints,
            events,
            options,
            status_listener: None,
            monitor: NetworkMonitor::new(),
            draining: AtomicBool::new(false),
            worker: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_status_listener(mut self, listener: Arc<dyn NetworkStatusListener>) -> Self {
        self.status_listener = Some(listener);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// 是否正在执行一轮同步
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// 定时调度是否在运行
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// 立即执行一轮同步
    ///
    /// 已有一轮在进行或服务端不可达时，返回全 0 结果且不发起任何请求。
    pub async fn sync_now(&self) -> Result<SyncSummary> {
        self.run_pass(true).await
    }

    /// 启动定时调度
    ///
    /// 启动前校验队列中所有表名都有接口映射，缺失时直接失败。
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Err(SyncError::AlreadyRunning("同步调度已启动".to_string()));
        }

        let tables = self.store.pending_tables().await?;
        self.endpoints.ensure_mapped(&tables)?;

        let status_rx = match &self.status_listener {
            Some(listener) => Some(listener.start_monitoring().await?),
            None => None,
        };

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            this.run_loop(loop_token, status_rx).await;
        });

        let mut worker = self.worker.lock();
        if worker.is_some() {
            token.cancel();
            return Err(SyncError::AlreadyRunning("同步调度已启动".to_string()));
        }
        *worker = Some(Worker { token, handle });
        info!(
            "🔄 同步调度已启动 (interval: {:?}, pending tables: {:?})",
            self.options.interval, tables
        );
        Ok(())
    }

    /// 停止定时调度，等待当前一轮同步结束
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        worker.token.cancel();
        if let Err(e) = worker.handle.await {
            error!("同步调度任务异常退出: {}", e);
        }
        if let Some(listener) = &self.status_listener {
            listener.stop_monitoring().await;
        }
        info!("⏹️ 同步调度已停止");
    }

    async fn run_loop(
        self: Arc<Self>,
        token: CancellationToken,
        mut status_rx: Option<broadcast::Receiver<NetworkStatusEvent>>,
    ) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // 同步在分支体内执行，取消只在两轮之间生效
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.scheduled_pass().await,
                event = next_status_event(&mut status_rx) => {
                    if let Some(event) = event {
                        debug!("系统网络状态变化: {:?} -> {:?}", event.old_status, event.new_status);
                    }
                    self.scheduled_pass().await;
                }
            }
        }
    }

    /// 调度触发：探测可达性，发布在线 / 离线切换，在线时同步并清理过期记录
    async fn scheduled_pass(&self) {
        let online = self.prober.is_actually_online().await;
        match self.monitor.observe(online) {
            ReachabilityTransition::BecameOnline => {
                info!("🌐 服务端已可达");
                self.events.publish(SyncEvent::Online);
            }
            ReachabilityTransition::BecameOffline => {
                info!("📴 服务端不可达");
                self.events.publish(SyncEvent::Offline);
            }
            ReachabilityTransition::Unchanged => {}
        }

        if !online {
            return;
        }

        if let Err(e) = self.run_pass(false).await {
            error!("同步失败: {}", e);
        }
        match self.store.prune(self.options.retention_hours).await {
            Ok(0) => {}
            Ok(pruned) => debug!("清理过期的已同步记录: {}", pruned),
            Err(e) => warn!("清理已同步记录失败: {}", e),
        }
    }

    #[instrument(skip(self), name = "sync_pass")]
    async fn run_pass(&self, check_connectivity: bool) -> Result<SyncSummary> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("已有同步在进行，跳过");
            return Ok(SyncSummary::default());
        }
        let _guard = DrainingGuard(&self.draining);

        if check_connectivity && !self.prober.is_actually_online().await {
            debug!("服务端不可达，跳过同步");
            return Ok(SyncSummary::default());
        }

        self.events.publish(SyncEvent::SyncStart);

        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("读取待同步队列失败: {}", e);
                self.events.publish(SyncEvent::SyncError {
                    cause: e.to_string(),
                });
                return Err(e);
            }
        };

        let total = pending.len();
        let mut summary = SyncSummary::default();
        for operation in order_for_replay(pending) {
            match self.replay(&operation).await {
                ReplayOutcome::Synced => summary.synced += 1,
                ReplayOutcome::Conflict(server_error) => {
                    summary.conflicts += 1;
                    info!(
                        "⚠️ 冲突，以服务端为准: {} {} ({})",
                        operation.action, operation.table_name, server_error
                    );
                    self.events.publish(SyncEvent::SyncConflict {
                        operation,
                        server_error,
                    });
                }
                ReplayOutcome::Failed(reason) => {
                    summary.failed += 1;
                    warn!(
                        "同步失败，保留到下一轮: {} {} {} ({})",
                        operation.action, operation.table_name, operation.local_id, reason
                    );
                }
            }
        }

        if total > 0 {
            info!(
                "✅ 同步完成: 共 {} 条, 成功 {}, 失败 {}, 冲突 {}",
                total, summary.synced, summary.failed, summary.conflicts
            );
        }
        self.events.publish(SyncEvent::SyncComplete(summary));
        Ok(summary)
    }

    async fn replay(&self, operation: &PendingOperation) -> ReplayOutcome {
        match self.try_replay(operation).await {
            Ok(outcome) => outcome,
            Err(e) => ReplayOutcome::Failed(e.to_string()),
        }
    }

    async fn try_replay(&self, operation: &PendingOperation) -> Result<ReplayOutcome> {
        let endpoint = self.endpoints.get(&operation.table_name)?;
        let mut payload = operation.payload.clone();
        resolve_references(self.store.as_ref(), &mut payload).await?;
        let body = Value::Object(payload);

        match operation.action {
            SyncAction::Create => self.replay_create(operation, endpoint, &body).await,
            SyncAction::Update => self.replay_update(operation, endpoint, &body).await,
            SyncAction::Delete => self.replay_delete(operation, endpoint).await,
        }
    }

    async fn replay_create(
        &self,
        operation: &PendingOperation,
        endpoint: &EntityEndpoint,
        body: &Value,
    ) -> Result<ReplayOutcome> {
        match self.call(HttpMethod::Post, &endpoint.collection_url(), Some(body)).await {
            Ok(response) => {
                let server_id = extract_server_id(&response);
                if server_id.is_none() {
                    warn!("创建成功但响应中没有记录 ID: {} {}", operation.table_name, operation.local_id);
                }
                self.store.mark_synced(&operation.local_id, server_id).await?;
                debug!("create 已同步: {} -> {:?}", operation.local_id, server_id);
                Ok(ReplayOutcome::Synced)
            }
            Err(e) if e.is_duplicate() => {
                self.store.mark_synced(&operation.local_id, None).await?;
                Ok(ReplayOutcome::Conflict(e.to_string()))
            }
            Err(e) => Ok(ReplayOutcome::Failed(e.to_string())),
        }
    }

    async fn replay_update(
        &self,
        operation: &PendingOperation,
        endpoint: &EntityEndpoint,
        body: &Value,
    ) -> Result<ReplayOutcome> {
        let Some(server_id) = self.resolve_target(operation).await? else {
            return Ok(ReplayOutcome::Failed("目标记录的 create 尚未同步".to_string()));
        };

        match self.call(HttpMethod::Put, &endpoint.record_url(server_id), Some(body)).await {
            Ok(_) => {
                self.store.mark_synced(&operation.local_id, Some(server_id)).await?;
                Ok(ReplayOutcome::Synced)
            }
            Err(e) if e.is_conflict() => {
                self.store.mark_synced(&operation.local_id, Some(server_id)).await?;
                Ok(ReplayOutcome::Conflict(e.to_string()))
            }
            Err(e) => Ok(ReplayOutcome::Failed(e.to_string())),
        }
    }

    async fn replay_delete(&self, operation: &PendingOperation, endpoint: &EntityEndpoint) -> Result<ReplayOutcome> {
        let Some(server_id) = self.resolve_target(operation).await? else {
            return self.settle_unsent_delete(operation).await;
        };

        match self.call(HttpMethod::Delete, &endpoint.record_url(server_id), None).await {
            Ok(_) => {
                self.store.mark_synced(&operation.local_id, Some(server_id)).await?;
                Ok(ReplayOutcome::Synced)
            }
            Err(e) if e.is_not_found() => {
                debug!("服务端记录已不存在，视为删除成功: {} {}", operation.table_name, server_id);
                self.store.mark_synced(&operation.local_id, Some(server_id)).await?;
                Ok(ReplayOutcome::Synced)
            }
            Err(e) => Ok(ReplayOutcome::Failed(e.to_string())),
        }
    }

    /// 没有服务端 ID 的 delete
    ///
    /// 只有确认目标记录从未到达服务端（create 仍在队列中，或因重复被服务端拒绝）
    /// 才视为已同步；目标记录已不在本地队列中时无法判断，保留为失败。
    async fn settle_unsent_delete(&self, operation: &PendingOperation) -> Result<ReplayOutcome> {
        let Some(target) = operation.target_local_id else {
            self.store.mark_synced(&operation.local_id, None).await?;
            return Ok(ReplayOutcome::Synced);
        };

        match self.store.get(&target).await? {
            Some(create) if create.action == SyncAction::Create && create.is_pending() => {
                // 离线创建又离线删除：对应的 create 不再发送
                self.store.mark_synced(&target, None).await?;
                self.store.mark_synced(&operation.local_id, None).await?;
                debug!("已删除的离线记录不再同步: {} {}", create.table_name, target);
                Ok(ReplayOutcome::Synced)
            }
            Some(create) if create.action == SyncAction::Create && create.server_id.is_none() => {
                self.store.mark_synced(&operation.local_id, None).await?;
                debug!("目标记录未在服务端创建，无需删除: {} {}", create.table_name, target);
                Ok(ReplayOutcome::Synced)
            }
            Some(_) => Ok(ReplayOutcome::Failed(format!("删除目标不是 create 记录: {}", target))),
            None => {
                warn!("删除目标已不在本地队列中，无法确定服务端 ID: {} {}", operation.table_name, target);
                Ok(ReplayOutcome::Failed(format!("删除目标已不在本地队列中: {}", target)))
            }
        }
    }

    async fn resolve_target(&self, operation: &PendingOperation) -> Result<Option<i64>> {
        if let Some(server_id) = operation.server_id {
            return Ok(Some(server_id));
        }
        match operation.target_local_id {
            Some(local_id) => self.store.resolve_server_id(&local_id).await,
            None => Ok(None),
        }
    }

    async fn call(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<Value> {
        let timeout = self.options.operation_timeout;
        match tokio::time::timeout(timeout, self.remote.send(method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!("{} {} 超过 {:?}", method, path, timeout))),
        }
    }
}

async fn next_status_event(
    rx: &mut Option<broadcast::Receiver<NetworkStatusEvent>>,
) -> Option<NetworkStatusEvent> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match receiver.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!("网络状态事件积压，跳过 {} 条", skipped);
            None
        }
        Err(broadcast::error::RecvError::Closed) => {
            *rx = None;
            None
        }
    }
}

/// create → update → delete，同一类内部保持入队顺序
fn order_for_replay(mut operations: Vec<PendingOperation>) -> Vec<PendingOperation> {
    operations.sort_by_key(|operation| operation.action);
    operations
}

fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 从 create 响应中提取服务端 ID（顶层或 `data` 对象内），0 视为无
fn extract_server_id(response: &Value) -> Option<i64> {
    let lookup = |object: &serde_json::Map<String, Value>| {
        SERVER_ID_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(id_from_value))
    };

    let object = response.as_object()?;
    lookup(object)
        .or_else(|| object.get("data").and_then(Value::as_object).and_then(lookup))
        .filter(|id| *id != 0)
}
