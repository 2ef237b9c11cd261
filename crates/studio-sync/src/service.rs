//! 离线同步服务
//!
//! 由一份 [`SyncConfig`] 组装队列存储、业务 API、可达性探测、事件总线、
//! 离线请求客户端和同步器，由进程入口创建一次并持有。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::config::SyncConfig;
use crate::endpoints::EndpointTable;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncSummary};
use crate::network::{AssumeOnlineListener, ConnectivityProber, NetworkStatusListener};
use crate::offline::OfflineAwareClient;
use crate::remote::HttpRemoteApi;
use crate::storage::{RecordStore, SqliteRecordStore};
use crate::sync::{SyncOptions, SyncReconciler};

/// 离线同步服务
#[derive(Debug)]
pub struct OfflineSyncService {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    client: OfflineAwareClient,
    reconciler: Arc<SyncReconciler>,
    shutting_down: AtomicBool,
}

impl OfflineSyncService {
    /// 使用默认的系统网络监听器（始终报告在线，由探测请求判断）
    pub async fn initialize(config: SyncConfig) -> Result<Arc<Self>> {
        Self::initialize_with(config, EndpointTable::studio_defaults(), Arc::new(AssumeOnlineListener::default()))
            .await
    }

    /// 使用自定义接口映射和平台网络监听器
    pub async fn initialize_with(
        config: SyncConfig,
        endpoints: EndpointTable,
        network_listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化离线同步服务...");
        config.validate()?;

        // === 第1层：待同步队列 ===
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open(&config.database_path()).await?);
        info!("待同步队列已打开: {}", config.database_path().display());

        // === 第2层：业务 API 与可达性探测 ===
        let remote = Arc::new(HttpRemoteApi::new(
            &config.api_base_url,
            &config.http_client_config,
            config.bearer_token.clone(),
        )?);
        let prober = Arc::new(ConnectivityProber::new(
            network_listener.clone(),
            config.probe_url(),
            config.probe_timeout(),
        )?);

        // === 第3层：事件总线 ===
        let events = Arc::new(EventBus::new(config.event_capacity));

        // === 第4层：离线请求客户端与同步器 ===
        let endpoints = Arc::new(endpoints);
        let client = OfflineAwareClient::new(remote.clone(), store.clone(), prober.clone(), endpoints.clone());
        let reconciler = Arc::new(
            SyncReconciler::new(
                store.clone(),
                remote,
                prober,
                endpoints,
                events.clone(),
                SyncOptions {
                    interval: config.sync_interval(),
                    operation_timeout: config.operation_timeout(),
                    retention_hours: config.retention_hours,
                },
            )
            .with_status_listener(network_listener),
        );

        info!("✅ 离线同步服务初始化完成 (api: {})", config.api_base_url);
        Ok(Arc::new(Self {
            config,
            store,
            events,
            client,
            reconciler,
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 离线感知的业务请求客户端
    pub fn client(&self) -> &OfflineAwareClient {
        &self.client
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    /// 立即同步一次
    pub async fn sync_now(&self) -> Result<SyncSummary> {
        if self.is_shutting_down() {
            return Err(SyncError::Other("服务正在关闭".to_string()));
        }
        self.reconciler.sync_now().await
    }

    /// 启动定时同步
    pub async fn start(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(SyncError::Other("服务正在关闭".to_string()));
        }
        self.reconciler.start().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 停止定时同步；正在进行的一轮会先完成
    pub async fn shutdown(&self) -> Result<()> {
        info!("正在关闭离线同步服务...");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.reconciler.stop().await;
        info!("离线同步服务关闭完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// 一个没有服务监听的本地地址
    async fn unreachable_base_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::builder().data_dir(dir.path()).build();
        assert!(matches!(
            OfflineSyncService::initialize(config).await,
            Err(SyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_queues_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::builder()
            .data_dir(dir.path())
            .api_base_url(unreachable_base_url().await)
            .probe_timeout_ms(500)
            .build();

        let service = OfflineSyncService::initialize(config.clone()).await.unwrap();
        let outcome = service
            .client()
            .create("customers", json!({"name": "Lina"}))
            .await
            .unwrap();
        assert!(outcome.is_queued());

        let summary = service.sync_now().await.unwrap();
        assert!(summary.is_empty());

        service.start().await.unwrap();
        service.shutdown().await.unwrap();
        assert!(service.sync_now().await.is_err());
        drop(service);

        // 重新打开后队列仍在
        let reopened = OfflineSyncService::initialize(config).await.unwrap();
        assert_eq!(reopened.store().count_pending().await.unwrap(), 1);
    }
}
