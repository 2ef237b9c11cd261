//! SQLite 待同步队列
//!
//! 单个连接放在 tokio Mutex 后面，每个操作只执行一条语句（或一个短事务），
//! 请求路径上的追加与同步器的读写可以安全交错。

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::identifier::LocalId;
use crate::storage::migrate;
use crate::storage::{retention_cutoff, NewOperation, Payload, PendingOperation, RecordStore, SyncStatus};
use crate::utils::clock::{from_millis, to_millis, Clock, SystemClock};

const SELECT_COLUMNS: &str = "local_id, table_name, action, payload, server_id, target_local_id, \
                              sync_status, created_at, synced_at";

/// SQLite 存储组件
#[derive(Debug)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteRecordStore {
    /// 打开（或创建）队列数据库文件
    pub async fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_clock(db_path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut conn = Connection::open(db_path)
            .map_err(|e| SyncError::Database(format!("打开数据库失败: {}", e)))?;
        migrate::init_db(&mut conn)?;

        info!("队列数据库初始化完成: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// 内存数据库（不落盘）
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Database(format!("打开内存数据库失败: {}", e)))?;
        migrate::init_db(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn row_to_operation(row: &Row<'_>) -> rusqlite::Result<RawOperation> {
        Ok(RawOperation {
            local_id: row.get(0)?,
            table_name: row.get(1)?,
            action: row.get(2)?,
            payload: row.get(3)?,
            server_id: row.get(4)?,
            target_local_id: row.get(5)?,
            sync_status: row.get(6)?,
            created_at: row.get(7)?,
            synced_at: row.get(8)?,
        })
    }
}

/// 数据库原始行，解码放在锁外完成
struct RawOperation {
    local_id: String,
    table_name: String,
    action: String,
    payload: String,
    server_id: Option<i64>,
    target_local_id: Option<String>,
    sync_status: String,
    created_at: i64,
    synced_at: Option<i64>,
}

impl RawOperation {
    fn decode(self) -> Result<PendingOperation> {
        let payload: Payload = serde_json::from_str(&self.payload)?;
        let target_local_id = match self.target_local_id {
            Some(text) => Some(text.parse::<LocalId>()?),
            None => None,
        };
        Ok(PendingOperation {
            local_id: self.local_id.parse()?,
            table_name: self.table_name,
            action: self.action.parse()?,
            payload,
            server_id: self.server_id,
            target_local_id,
            sync_status: self.sync_status.parse()?,
            created_at: from_millis(self.created_at),
            synced_at: self.synced_at.map(from_millis),
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, operation: NewOperation) -> Result<LocalId> {
        let local_id = LocalId::generate();
        let payload = serde_json::to_string(&operation.payload)?;
        let created_at = to_millis(self.clock.now());

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pending_operations
                 (local_id, table_name, action, payload, server_id, target_local_id, sync_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                local_id.to_string(),
                operation.table_name,
                operation.action.as_str(),
                payload,
                operation.server_id,
                operation.target_local_id.map(|id| id.to_string()),
                SyncStatus::Pending.as_str(),
                created_at,
            ],
        )
        .map_err(|e| SyncError::Database(format!("写入待同步操作失败: {}", e)))?;

        debug!(
            "操作已入队: local_id={}, table={}, action={}",
            local_id, operation.table_name, operation.action
        );
        Ok(local_id)
    }

    async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pending_operations WHERE sync_status = ?1 ORDER BY seq ASC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([SyncStatus::Pending.as_str()], Self::row_to_operation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter().map(RawOperation::decode).collect()
    }

    async fn mark_synced(&self, local_id: &LocalId, server_id: Option<i64>) -> Result<()> {
        let synced_at = to_millis(self.clock.now());
        let conn = self.conn.lock().await;

        let updated = conn
            .execute(
                "UPDATE pending_operations
                    SET sync_status = ?1,
                        server_id = COALESCE(?2, server_id),
                        synced_at = ?3
                  WHERE local_id = ?4 AND sync_status = ?5",
                params![
                    SyncStatus::Synced.as_str(),
                    server_id,
                    synced_at,
                    local_id.to_string(),
                    SyncStatus::Pending.as_str(),
                ],
            )
            .map_err(|e| SyncError::Database(format!("更新同步状态失败: {}", e)))?;

        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM pending_operations WHERE local_id = ?1",
                [local_id.to_string()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(SyncError::NotFound(format!("待同步操作不存在: {}", local_id)));
            }
            debug!("操作已是 synced 状态，跳过: local_id={}", local_id);
        }
        Ok(())
    }

    async fn resolve_server_id(&self, local_id: &LocalId) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let server_id: Option<Option<i64>> = conn
            .query_row(
                "SELECT server_id FROM pending_operations WHERE local_id = ?1",
                [local_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(server_id.flatten())
    }

    async fn prune(&self, older_than_hours: u64) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(self.clock.now(), older_than_hours).map(to_millis) else {
            return Ok(0);
        };
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM pending_operations WHERE sync_status = ?1 AND created_at < ?2",
                params![SyncStatus::Synced.as_str(), cutoff],
            )
            .map_err(|e| SyncError::Database(format!("清理已同步操作失败: {}", e)))?;
        Ok(removed)
    }

    async fn get(&self, local_id: &LocalId) -> Result<Option<PendingOperation>> {
        let raw = {
            let conn = self.conn.lock().await;
            conn.query_row(
                &format!(
                    "SELECT {} FROM pending_operations WHERE local_id = ?1",
                    SELECT_COLUMNS
                ),
                [local_id.to_string()],
                Self::row_to_operation,
            )
            .optional()?
        };
        raw.map(RawOperation::decode).transpose()
    }

    async fn count_pending(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_operations WHERE sync_status = ?1",
            [SyncStatus::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn pending_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM pending_operations
              WHERE sync_status = ?1
              GROUP BY table_name
              ORDER BY MIN(seq)",
        )?;
        let tables = stmt
            .query_map([SyncStatus::Pending.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::storage::SyncAction;
    use chrono::Duration;
    use crate::utils::clock::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::open(&temp_dir.path().join("queue.db")).await.unwrap();

        let customer = store
            .append(NewOperation::new(
                "customers",
                SyncAction::Create,
                payload(json!({"name": "Layla", "phone": "0791234567"})),
            ))
            .await
            .unwrap();
        let update = store
            .append(
                NewOperation::new("customers", SyncAction::Update, payload(json!({"phone": "0790000000"})))
                    .with_target(Some(Identifier::Local(customer))),
            )
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].local_id, customer);
        assert_eq!(pending[0].payload.get("name"), Some(&json!("Layla")));
        assert_eq!(pending[1].local_id, update);
        assert_eq!(pending[1].target_local_id, Some(customer));
        assert_eq!(pending[1].action, SyncAction::Update);
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("queue.db");

        let id = {
            let store = SqliteRecordStore::open(&db_path).await.unwrap();
            let id = store
                .append(NewOperation::new("purchases", SyncAction::Delete, Payload::new()).with_server_id(7))
                .await
                .unwrap();
            id
        };

        let store = SqliteRecordStore::open(&db_path).await.unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.server_id, Some(7));
        assert!(record.is_pending());
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_mark_synced_and_resolve() {
        let store = SqliteRecordStore::open_in_memory(Arc::new(SystemClock)).unwrap();
        let id = store
            .append(NewOperation::new("customers", SyncAction::Create, Payload::new()))
            .await
            .unwrap();

        assert_eq!(store.resolve_server_id(&id).await.unwrap(), None);
        store.mark_synced(&id, Some(501)).await.unwrap();
        assert_eq!(store.resolve_server_id(&id).await.unwrap(), Some(501));

        // 已同步后再次标记不改变服务端 ID
        store.mark_synced(&id, None).await.unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.server_id, Some(501));
        assert!(record.synced_at.is_some());

        assert!(matches!(
            store.mark_synced(&LocalId::generate(), None).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_prune_retention() {
        let clock = Arc::new(ManualClock::new(from_millis(1_700_000_000_000)));
        let store = SqliteRecordStore::open_in_memory(clock.clone()).unwrap();

        let old = store
            .append(NewOperation::new("customers", SyncAction::Create, Payload::new()))
            .await
            .unwrap();
        store.mark_synced(&old, Some(1)).await.unwrap();

        clock.advance(Duration::hours(23));
        let young = store
            .append(NewOperation::new("customers", SyncAction::Create, Payload::new()))
            .await
            .unwrap();
        store.mark_synced(&young, Some(2)).await.unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(store.prune(24).await.unwrap(), 1);
        assert!(store.get(&old).await.unwrap().is_none());
        assert_eq!(store.resolve_server_id(&young).await.unwrap(), Some(2));

        // 超出可表示范围的保留时长不清理任何记录
        assert_eq!(store.prune(u64::MAX).await.unwrap(), 0);
        assert!(store.get(&young).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_pending_tables() {
        let store = SqliteRecordStore::open_in_memory(Arc::new(SystemClock)).unwrap();
        for table in ["invoices", "customers", "invoices"] {
            store
                .append(NewOperation::new(table, SyncAction::Create, Payload::new()))
                .await
                .unwrap();
        }
        assert_eq!(
            store.pending_tables().await.unwrap(),
            vec!["invoices".to_string(), "customers".to_string()]
        );
    }
}
