use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::identifier::LocalId;
use crate::storage::{retention_cutoff, NewOperation, PendingOperation, RecordStore, SyncStatus};
use crate::utils::clock::{Clock, SystemClock};

/// 基于内存的待同步队列（进程退出即丢失，用于测试和临时会话）
#[derive(Debug)]
pub struct MemoryRecordStore {
    operations: Arc<RwLock<Vec<PendingOperation>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            operations: Arc::new(RwLock::new(Vec::new())),
            clock,
        }
    }

    /// 当前全部记录（含已同步）
    pub async fn snapshot(&self) -> Vec<PendingOperation> {
        self.operations.read().await.clone()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn append(&self, operation: NewOperation) -> Result<LocalId> {
        let local_id = LocalId::generate();
        let record = PendingOperation {
            local_id,
            table_name: operation.table_name,
            action: operation.action,
            payload: operation.payload,
            server_id: operation.server_id,
            target_local_id: operation.target_local_id,
            sync_status: SyncStatus::Pending,
            created_at: self.clock.now(),
            synced_at: None,
        };

        let mut operations = self.operations.write().await;
        operations.push(record);
        debug!("操作已入队: local_id={}, 当前队列大小: {}", local_id, operations.len());

        Ok(local_id)
    }

    async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let operations = self.operations.read().await;
        Ok(operations.iter().filter(|op| op.is_pending()).cloned().collect())
    }

    async fn mark_synced(&self, local_id: &LocalId, server_id: Option<i64>) -> Result<()> {
        let now = self.clock.now();
        let mut operations = self.operations.write().await;
        let record = operations
            .iter_mut()
            .find(|op| op.local_id == *local_id)
            .ok_or_else(|| SyncError::NotFound(format!("待同步操作不存在: {}", local_id)))?;

        if record.is_pending() {
            record.sync_status = SyncStatus::Synced;
            record.server_id = server_id.or(record.server_id);
            record.synced_at = Some(now);
        }
        Ok(())
    }

    async fn resolve_server_id(&self, local_id: &LocalId) -> Result<Option<i64>> {
        let operations = self.operations.read().await;
        Ok(operations
            .iter()
            .find(|op| op.local_id == *local_id)
            .and_then(|op| op.server_id))
    }

    async fn prune(&self, older_than_hours: u64) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(self.clock.now(), older_than_hours) else {
            return Ok(0);
        };
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|op| op.is_pending() || op.created_at >= cutoff);
        Ok(before - operations.len())
    }

    async fn get(&self, local_id: &LocalId) -> Result<Option<PendingOperation>> {
        let operations = self.operations.read().await;
        Ok(operations.iter().find(|op| op.local_id == *local_id).cloned())
    }

    async fn count_pending(&self) -> Result<usize> {
        let operations = self.operations.read().await;
        Ok(operations.iter().filter(|op| op.is_pending()).count())
    }

    async fn pending_tables(&self) -> Result<Vec<String>> {
        let operations = self.operations.read().await;
        let mut tables: Vec<String> = Vec::new();
        for op in operations.iter().filter(|op| op.is_pending()) {
            if !tables.contains(&op.table_name) {
                tables.push(op.table_name.clone());
            }
        }
        Ok(tables)
    }
}
