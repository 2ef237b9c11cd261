//! 本地待同步队列
//!
//! 离线期间的写操作按本地标识持久化，待联网后由同步器回放。
//! 每个操作都是独立的原子操作，调用方不会看到多步中间状态；
//! 追加语义为 at-least-once：允许重复追加，不允许丢失。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt::Debug;

use crate::error::Result;
use crate::identifier::LocalId;

pub mod entities;
pub mod memory;
pub mod migrate;
pub mod sqlite;

pub use entities::{NewOperation, Payload, PendingOperation, SyncAction, SyncStatus};
pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// 已同步记录默认保留时长（小时），用于后续同步中的引用解析
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

/// 保留时长上限（十年）
pub const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;

/// 清理截止时间；保留时长超出可表示范围时返回 None，即没有记录需要清理
pub(crate) fn retention_cutoff(now: DateTime<Utc>, older_than_hours: u64) -> Option<DateTime<Utc>> {
    let hours = i64::try_from(older_than_hours).ok()?;
    now.checked_sub_signed(Duration::try_hours(hours)?)
}

/// 待同步队列存储接口
#[async_trait]
pub trait RecordStore: Debug + Send + Sync {
    /// 追加一条 pending 操作，返回新生成的本地标识
    async fn append(&self, operation: NewOperation) -> Result<LocalId>;

    /// 所有 pending 操作，按追加顺序
    async fn list_pending(&self) -> Result<Vec<PendingOperation>>;

    /// 标记为已同步并回填服务端 ID（None 表示无服务端 ID，例如删除或重复创建）
    ///
    /// 已经是 synced 的记录保持不变。
    async fn mark_synced(&self, local_id: &LocalId, server_id: Option<i64>) -> Result<()>;

    /// 查询本地标识对应的服务端 ID
    async fn resolve_server_id(&self, local_id: &LocalId) -> Result<Option<i64>>;

    /// 删除创建时间早于 `older_than_hours` 小时的已同步记录，返回删除数量
    async fn prune(&self, older_than_hours: u64) -> Result<usize>;

    /// 按本地标识读取一条记录（不区分状态）
    async fn get(&self, local_id: &LocalId) -> Result<Option<PendingOperation>>;

    /// pending 操作数量
    async fn count_pending(&self) -> Result<usize>;

    /// pending 操作涉及的表名（去重）
    async fn pending_tables(&self) -> Result<Vec<String>>;
}
