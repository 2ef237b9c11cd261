/// 引用解析
///
/// 负载中以 `_id` 结尾、值为本地标识的字段，若对应的 create 已同步，
/// 替换为服务端 ID；尚无映射的保持原样，留到下一轮。
/// 嵌套对象和对象数组同样处理。

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::identifier::{Identifier, LocalId};
use crate::storage::RecordStore;

const REFERENCE_SUFFIX: &str = "_id";

fn is_reference_field(name: &str) -> bool {
    name.ends_with(REFERENCE_SUFFIX)
}

/// 收集负载中所有本地标识引用
pub fn collect_local_references(payload: &Map<String, Value>) -> Vec<LocalId> {
    let mut found = Vec::new();
    collect_into(payload, &mut found);
    found.sort();
    found.dedup();
    found
}

fn collect_into(object: &Map<String, Value>, found: &mut Vec<LocalId>) {
    for (key, value) in object {
        match value {
            Value::Object(nested) => collect_into(nested, found),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        collect_into(nested, found);
                    }
                }
            }
            _ if is_reference_field(key) => {
                if let Some(Identifier::Local(local_id)) = Identifier::from_json(value) {
                    found.push(local_id);
                }
            }
            _ => {}
        }
    }
}

/// 按映射表替换引用，返回替换的字段数
pub fn rewrite_references(payload: &mut Map<String, Value>, resolved: &HashMap<LocalId, i64>) -> usize {
    let mut rewritten = 0;
    for (key, value) in payload.iter_mut() {
        match value {
            Value::Object(nested) => rewritten += rewrite_references(nested, resolved),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(nested) = item {
                        rewritten += rewrite_references(nested, resolved);
                    }
                }
            }
            _ if is_reference_field(key) => {
                let server_id = Identifier::from_json(value)
                    .and_then(|id| id.as_local())
                    .and_then(|local_id| resolved.get(&local_id).copied());
                if let Some(server_id) = server_id {
                    *value = Value::from(server_id);
                    rewritten += 1;
                }
            }
            _ => {}
        }
    }
    rewritten
}

/// 解析负载中的本地引用（就地修改），返回替换的字段数
pub async fn resolve_references(store: &dyn RecordStore, payload: &mut Map<String, Value>) -> Result<usize> {
    let references = collect_local_references(payload);
    if references.is_empty() {
        return Ok(0);
    }

    let mut resolved = HashMap::with_capacity(references.len());
    for local_id in references {
        if let Some(server_id) = store.resolve_server_id(&local_id).await? {
            resolved.insert(local_id, server_id);
        }
    }

    let rewritten = rewrite_references(payload, &resolved);
    debug!("引用解析: 替换 {} 个字段", rewritten);
    Ok(rewritten)
}
