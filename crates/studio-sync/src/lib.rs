//! Studio Sync - 工作室管理客户端的离线优先同步核心
//!
//! 本库提供：
//! - 📥 待同步队列：离线写操作持久化到本地 SQLite
//! - 📡 可达性探测：系统网络状态预检 + HEAD 请求确认
//! - 🔁 离线感知请求：在线直连，离线或网络失败时自动入队
//! - 🧠 同步器：create → update → delete 顺序回放，本地标识改写为服务端 ID，冲突以服务端为准
//! - ⚙️ 事件总线：同步与在线状态通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use studio_sync::{OfflineSyncService, SyncConfig, SyncEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://studio.example.com/api")
//!         .build();
//!
//!     let service = OfflineSyncService::initialize(config).await?;
//!
//!     // 订阅同步事件
//!     let _subscription = service.events().subscribe(|event| {
//!         if let SyncEvent::SyncComplete(summary) = event {
//!             println!("同步完成: {:?}", summary);
//!         }
//!     });
//!
//!     // 离线时自动进入本地队列
//!     let outcome = service.client().create("customers", json!({"name": "Lina"})).await?;
//!     println!("{}", outcome.to_json());
//!
//!     service.start().await?;
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod identifier;
pub mod network;
pub mod offline;
pub mod remote;
pub mod service;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpClientConfig, SyncConfig, SyncConfigBuilder};
pub use endpoints::{EndpointTable, EntityEndpoint, RecordAddressing};
pub use error::{Result, SyncError};
pub use events::{EventBus, EventStats, Subscription, SyncEvent, SyncSummary};
pub use identifier::{Identifier, LocalId};
pub use network::{
    AssumeOnlineListener, ConnectivityCheck, ConnectivityProber, NetworkStatus, NetworkStatusEvent,
    NetworkStatusListener,
};
pub use offline::{OfflineAwareClient, RequestOutcome};
pub use remote::{HttpMethod, HttpRemoteApi, RemoteApi};
pub use service::OfflineSyncService;
pub use storage::{
    MemoryRecordStore, NewOperation, PendingOperation, RecordStore, SqliteRecordStore, SyncAction, SyncStatus,
};
pub use sync::{SyncOptions, SyncReconciler};
pub use utils::{Clock, ManualClock, SystemClock};
pub use version::{SDK_VERSION, STORE_DB_VERSION};
