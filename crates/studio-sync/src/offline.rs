//! 离线感知请求包装
//!
//! 写请求先探测服务端是否可达：
//! - 在线：直接请求，成功结果原样返回；网络层失败转入本地队列，其他错误原样抛出
//! - 离线：GET 返回 `NoLocalData`，写操作入队并返回“已在本地排队”的结果
//!
//! 调用方收到的要么是服务端真实结果，要么是格式固定的排队结果，不会收到网络异常。

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::endpoints::EndpointTable;
use crate::error::{Result, SyncError};
use crate::identifier::{Identifier, LocalId};
use crate::network::ConnectivityCheck;
use crate::remote::{HttpMethod, RemoteApi};
use crate::storage::{NewOperation, Payload, RecordStore, SyncAction};
use crate::sync::references::resolve_references;

/// 请求结果
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// 服务端返回的结果
    Remote(Value),
    /// 已写入本地队列，稍后同步
    Queued {
        local_id: LocalId,
        table_name: String,
        action: SyncAction,
    },
}

impl RequestOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, RequestOutcome::Queued { .. })
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            RequestOutcome::Queued { local_id, .. } => Some(*local_id),
            RequestOutcome::Remote(_) => None,
        }
    }

    /// 转成 JSON，排队结果带 `queued` / `offline` 标记和本地标识
    pub fn to_json(&self) -> Value {
        match self {
            RequestOutcome::Remote(value) => value.clone(),
            RequestOutcome::Queued {
                local_id,
                table_name,
                action,
            } => json!({
                "queued": true,
                "offline": true,
                "local_id": local_id.to_string(),
                "table_name": table_name,
                "action": action.as_str(),
            }),
        }
    }
}

/// 离线感知的业务请求客户端
#[derive(Debug, Clone)]
pub struct OfflineAwareClient {
    remote: Arc<dyn RemoteApi>,
    store: Arc<dyn RecordStore>,
    prober: Arc<dyn ConnectivityCheck>,
    endpoints: Arc<EndpointTable>,
}

impl OfflineAwareClient {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn RecordStore>,
        prober: Arc<dyn ConnectivityCheck>,
        endpoints: Arc<EndpointTable>,
    ) -> Self {
        Self {
            remote,
            store,
            prober,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// 发起请求
    ///
    /// `table_hint` 为空时由请求路径推断表名。
    pub async fn request(
        &self,
        method: HttpMethod,
        resource: &str,
        payload: Option<Value>,
        table_hint: Option<&str>,
    ) -> Result<RequestOutcome> {
        let action = match method.sync_action() {
            Some(action) => action,
            None => return self.read(resource).await,
        };

        let table_name = match table_hint {
            Some(table) => {
                self.endpoints.get(table)?;
                table.to_string()
            }
            None => self.endpoints.table_for_resource(resource)?.to_string(),
        };
        let payload = into_payload(payload)?;
        let target = match action {
            SyncAction::Create => None,
            SyncAction::Update | SyncAction::Delete => self.extract_target(resource, &payload),
        };

        if !self.prober.is_actually_online().await {
            debug!("📴 服务端不可达，写操作入队: {} {}", method, resource);
            return self.enqueue(table_name, action, payload, target).await;
        }

        // 目标记录本身是离线创建的：已同步就改写为服务端地址，否则只能排队
        let mut resource = resource.to_string();
        if let Some(Identifier::Local(local_id)) = target {
            match self.store.resolve_server_id(&local_id).await? {
                Some(server_id) => {
                    resource = self.endpoints.get(&table_name)?.record_url(server_id);
                }
                None => {
                    debug!("目标记录尚未同步，写操作入队: {}", local_id);
                    return self.enqueue(table_name, action, payload, target).await;
                }
            }
        }

        let mut body = payload.clone();
        resolve_references(self.store.as_ref(), &mut body).await?;
        let body = Value::Object(body);
        let body = match (method, body.as_object().map(Map::is_empty)) {
            (HttpMethod::Delete, Some(true)) => None,
            _ => Some(&body),
        };

        match self.remote.send(method, &resource, body).await {
            Ok(value) => Ok(RequestOutcome::Remote(value)),
            Err(e) if e.is_network_failure() => {
                warn!("⚠️ 请求未得到响应，转入本地队列: {} {} ({})", method, resource, e);
                self.enqueue(table_name, action, payload, target).await
            }
            Err(e) => Err(e),
        }
    }

    async fn read(&self, resource: &str) -> Result<RequestOutcome> {
        if !self.prober.is_actually_online().await {
            return Err(SyncError::NoLocalData(resource.to_string()));
        }
        match self.remote.send(HttpMethod::Get, resource, None).await {
            Ok(value) => Ok(RequestOutcome::Remote(value)),
            Err(e) if e.is_network_failure() => {
                warn!("⚠️ 读请求未得到响应: {} ({})", resource, e);
                Err(SyncError::NoLocalData(resource.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue(
        &self,
        table_name: String,
        action: SyncAction,
        payload: Payload,
        target: Option<Identifier>,
    ) -> Result<RequestOutcome> {
        let mut operation = NewOperation::new(table_name.clone(), action, payload).with_target(target);
        // 目标的 create 已同步：服务端 ID 随操作一起保存，不依赖之后可能被清理的映射
        if let Some(Identifier::Local(target_local_id)) = target {
            if let Some(server_id) = self.store.resolve_server_id(&target_local_id).await? {
                operation = operation.with_server_id(server_id);
            }
        }
        let local_id = self.store.append(operation).await?;
        info!("📥 已加入离线队列: {} {} -> {}", action, table_name, local_id);
        Ok(RequestOutcome::Queued {
            local_id,
            table_name,
            action,
        })
    }

    /// update/delete 的目标：先看请求路径，再看负载里的 `id`
    fn extract_target(&self, resource: &str, payload: &Payload) -> Option<Identifier> {
        self.endpoints
            .match_resource(resource)
            .and_then(|m| m.record_ref)
            .and_then(Identifier::parse)
            .or_else(|| payload.get("id").and_then(Identifier::from_json))
    }

    /// 创建记录
    pub async fn create(&self, table_name: &str, payload: Value) -> Result<RequestOutcome> {
        let url = self.endpoints.get(table_name)?.collection_url();
        self.request(HttpMethod::Post, &url, Some(payload), Some(table_name))
            .await
    }

    /// 更新记录
    pub async fn update(&self, table_name: &str, id: Identifier, payload: Value) -> Result<RequestOutcome> {
        let url = self.endpoints.get(table_name)?.record_url(id);
        self.request(HttpMethod::Put, &url, Some(payload), Some(table_name))
            .await
    }

    /// 删除记录
    pub async fn delete(&self, table_name: &str, id: Identifier) -> Result<RequestOutcome> {
        let url = self.endpoints.get(table_name)?.record_url(id);
        self.request(HttpMethod::Delete, &url, None, Some(table_name))
            .await
    }

    /// 读取集合或单条记录，离线时返回 `NoLocalData`
    pub async fn get(&self, table_name: &str, id: Option<Identifier>) -> Result<Value> {
        let endpoint = self.endpoints.get(table_name)?;
        let url = match id {
            Some(id) => endpoint.record_url(id),
            None => endpoint.collection_url(),
        };
        match self.request(HttpMethod::Get, &url, None, Some(table_name)).await? {
            RequestOutcome::Remote(value) => Ok(value),
            RequestOutcome::Queued { .. } => Err(SyncError::NoLocalData(url)),
        }
    }
}

fn into_payload(payload: Option<Value>) -> Result<Payload> {
    match payload {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(SyncError::InvalidArgument(format!(
            "请求负载必须是 JSON 对象: {}",
            other
        ))),
    }
}
