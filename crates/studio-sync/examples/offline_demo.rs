//! 离线同步演示
//!
//! ```bash
//! STUDIO_API_URL=http://127.0.0.1:8080/api cargo run --example offline_demo
//! ```
//!
//! 服务端不可达时，写操作进入本地队列；服务端可用后由定时同步回放。

use serde_json::json;
use std::time::Duration;
use studio_sync::{Identifier, OfflineSyncService, Result, SyncConfig, SyncEvent};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("studio_sync=debug,offline_demo=info")),
        )
        .init();

    let api_url = std::env::var("STUDIO_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/api".to_string());
    let data_dir = std::env::temp_dir().join("studio-sync-demo");

    let config = SyncConfig::builder()
        .data_dir(&data_dir)
        .api_base_url(api_url)
        .sync_interval_secs(5)
        .build();

    let service = OfflineSyncService::initialize(config).await?;

    let _subscription = service.events().subscribe(|event| match event {
        SyncEvent::SyncComplete(summary) => info!("📊 同步结果: {:?}", summary),
        SyncEvent::SyncConflict { operation, server_error } => {
            warn!("冲突: {} {} ({})", operation.action, operation.table_name, server_error)
        }
        other => info!("📣 事件: {}", other.event_type()),
    });

    // 1. 创建客户
    let customer = service
        .client()
        .create("customers", json!({"name": "Lina Haddad", "phone": "0550 123 456"}))
        .await?;
    info!("创建客户: {}", customer.to_json());

    // 2. 为客户开发票；客户仍在队列中时使用本地标识引用
    let customer_ref = match customer.local_id() {
        Some(local_id) => json!(local_id.to_string()),
        None => customer.to_json().get("id").cloned().unwrap_or_default(),
    };
    let invoice = service
        .client()
        .create("invoices", json!({"customer_id": customer_ref, "total": 250}))
        .await?;
    info!("创建发票: {}", invoice.to_json());

    // 3. 删除一条已存在的采购记录
    let purchase = service.client().delete("purchases", Identifier::Remote(7)).await?;
    info!("删除采购记录: {}", purchase.to_json());

    info!("待同步: {}", service.store().count_pending().await?);

    service.start().await?;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        _ = tokio::signal::ctrl_c() => info!("收到退出信号"),
    }

    service.shutdown().await?;
    info!("剩余待同步: {}", service.store().count_pending().await?);
    Ok(())
}
