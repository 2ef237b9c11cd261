//! 待同步操作的数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;
use crate::identifier::{Identifier, LocalId};

/// 发往服务端的字段数据
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// 写操作类型
///
/// 声明顺序即一次同步中的处理顺序：先创建、再更新、最后删除。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(SyncError::InvalidData(format!("未知的操作类型: {}", other))),
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同步状态：pending → synced，只转换一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(SyncError::InvalidData(format!("未知的同步状态: {}", other))),
        }
    }
}

/// 一条延迟执行的写操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// 本地标识，全局唯一
    pub local_id: LocalId,
    /// 目标实体集合（customers、invoices ...）
    pub table_name: String,
    /// 操作类型，记录后不可变
    pub action: SyncAction,
    /// 发往服务端的数据
    pub payload: Payload,
    /// 服务端 ID
    ///
    /// create 同步成功后回填；离线前已存在于服务端的记录，update/delete 入队时即有值。
    /// None 同时表示“0/无”。
    pub server_id: Option<i64>,
    /// update/delete 的目标记录本身也是离线创建时，指向其 create 操作的本地标识
    pub target_local_id: Option<LocalId>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// update/delete 的目标标识（服务端 ID 优先）
    pub fn target(&self) -> Option<Identifier> {
        self.server_id
            .map(Identifier::Remote)
            .or(self.target_local_id.map(Identifier::Local))
    }
}

/// 入队参数
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub table_name: String,
    pub action: SyncAction,
    pub payload: Payload,
    pub server_id: Option<i64>,
    pub target_local_id: Option<LocalId>,
}

impl NewOperation {
    pub fn new(table_name: impl Into<String>, action: SyncAction, payload: Payload) -> Self {
        Self {
            table_name: table_name.into(),
            action,
            payload,
            server_id: None,
            target_local_id: None,
        }
    }

    /// 设置目标记录（服务端 ID 或本地标识）
    pub fn with_target(mut self, target: Option<Identifier>) -> Self {
        match target {
            Some(Identifier::Remote(id)) => self.server_id = Some(id),
            Some(Identifier::Local(id)) => self.target_local_id = Some(id),
            None => {}
        }
        self
    }

    pub fn with_server_id(mut self, server_id: i64) -> Self {
        self.server_id = Some(server_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_order_is_create_update_delete() {
        let mut actions = vec![SyncAction::Delete, SyncAction::Create, SyncAction::Update];
        actions.sort();
        assert_eq!(actions, vec![SyncAction::Create, SyncAction::Update, SyncAction::Delete]);
        assert_eq!("update".parse::<SyncAction>().unwrap(), SyncAction::Update);
        assert!("upsert".parse::<SyncAction>().is_err());
    }

    #[test]
    fn test_new_operation_target() {
        let local = LocalId::generate();
        let op = NewOperation::new("customers", SyncAction::Update, Payload::new())
            .with_target(Some(Identifier::Local(local)));
        assert_eq!(op.target_local_id, Some(local));
        assert_eq!(op.server_id, None);

        let op = NewOperation::new("customers", SyncAction::Delete, Payload::new())
            .with_target(Some(Identifier::Remote(9)));
        assert_eq!(op.server_id, Some(9));
    }
}
