//! 实体 → 接口映射表
//!
//! 每个表名对应一个基础路径，以及寻址单条记录的方式。
//! 新增实体只需要加一行。

use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

/// 单条记录的寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAddressing {
    /// `{base_path}/{id}`
    Path,
    /// `{base_path}?{fixed_query}&{id_param}={id}`
    Query,
}

/// 一个实体集合的接口配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEndpoint {
    pub base_path: &'static str,
    /// 寻址单条记录时使用的 ID 参数名
    pub id_param: &'static str,
    /// 多个子资源共用一个基础路径时，区分子资源的固定查询参数
    pub fixed_query: Option<(&'static str, &'static str)>,
    pub addressing: RecordAddressing,
}

impl EntityEndpoint {
    pub const fn path(base_path: &'static str) -> Self {
        Self {
            base_path,
            id_param: "id",
            fixed_query: None,
            addressing: RecordAddressing::Path,
        }
    }

    pub const fn query(
        base_path: &'static str,
        id_param: &'static str,
        fixed_query: (&'static str, &'static str),
    ) -> Self {
        Self {
            base_path,
            id_param,
            fixed_query: Some(fixed_query),
            addressing: RecordAddressing::Query,
        }
    }

    /// 集合地址（create 使用）
    pub fn collection_url(&self) -> String {
        match self.fixed_query {
            Some((key, value)) => format!("{}?{}={}", self.base_path, key, value),
            None => self.base_path.to_string(),
        }
    }

    /// 单条记录地址（update / delete 使用）
    pub fn record_url(&self, id: impl std::fmt::Display) -> String {
        match self.addressing {
            RecordAddressing::Path => {
                let base = self.base_path.trim_end_matches('/');
                match self.fixed_query {
                    Some((key, value)) => format!("{}/{}?{}={}", base, id, key, value),
                    None => format!("{}/{}", base, id),
                }
            }
            RecordAddressing::Query => {
                let mut url = self.collection_url();
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&format!("{}={}", self.id_param, id));
                url
            }
        }
    }

    /// 判断请求路径是否指向本实体，命中时返回路径中携带的记录 ID（原文）
    fn match_resource<'a>(&self, path: &'a str, query: &'a str) -> Option<Option<&'a str>> {
        if let Some((key, value)) = self.fixed_query {
            if query_value(query, key) != Some(value) {
                return None;
            }
        }

        let base = self.base_path.trim_end_matches('/');
        let rest = path.strip_prefix(base)?;
        match self.addressing {
            RecordAddressing::Path => {
                if rest.is_empty() || rest == "/" {
                    Some(None)
                } else {
                    let tail = rest.strip_prefix('/')?;
                    if tail.contains('/') {
                        return None;
                    }
                    Some(Some(tail))
                }
            }
            RecordAddressing::Query => {
                if !rest.is_empty() && rest != "/" {
                    return None;
                }
                Some(query_value(query, self.id_param))
            }
        }
    }
}

fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// 请求路径解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMatch<'a> {
    pub table_name: &'a str,
    /// 路径或查询参数中的记录 ID 原文
    pub record_ref: Option<&'a str>,
}

/// 表名 → 接口配置
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    entries: BTreeMap<String, EntityEndpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 工作室业务的默认映射
    pub fn studio_defaults() -> Self {
        Self::new()
            .with("customers", EntityEndpoint::path("/customers"))
            .with("invoices", EntityEndpoint::path("/invoices"))
            .with("invoice_items", EntityEndpoint::path("/invoice-items"))
            .with("purchases", EntityEndpoint::path("/purchases"))
            .with("payments", EntityEndpoint::path("/payments"))
            .with("expenses", EntityEndpoint::path("/expenses"))
            .with("staff", EntityEndpoint::path("/staff"))
            .with("bookings", EntityEndpoint::path("/bookings"))
            .with(
                "pricing_categories",
                EntityEndpoint::query("/pricing", "id", ("type", "categories")),
            )
            .with(
                "pricing_items",
                EntityEndpoint::query("/pricing", "id", ("type", "items")),
            )
    }

    pub fn with(mut self, table_name: impl Into<String>, endpoint: EntityEndpoint) -> Self {
        self.insert(table_name, endpoint);
        self
    }

    pub fn insert(&mut self, table_name: impl Into<String>, endpoint: EntityEndpoint) {
        self.entries.insert(table_name.into(), endpoint);
    }

    pub fn get(&self, table_name: &str) -> Result<&EntityEndpoint> {
        self.entries
            .get(table_name)
            .ok_or_else(|| SyncError::UnmappedTable(table_name.to_string()))
    }

    pub fn contains(&self, table_name: &str) -> bool {
        self.entries.contains_key(table_name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 校验所有表名都有映射，缺失时立即失败（不静默丢弃操作）
    pub fn ensure_mapped<I, S>(&self, tables: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing: Vec<String> = tables
            .into_iter()
            .filter(|t| !self.contains(t.as_ref()))
            .map(|t| t.as_ref().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::UnmappedTable(missing.join(", ")))
        }
    }

    /// 由请求路径推断表名
    ///
    /// 带固定查询参数的条目优先匹配，避免共用基础路径时误判。
    pub fn match_resource<'a>(&'a self, resource: &'a str) -> Option<ResourceMatch<'a>> {
        let (path, query) = resource.split_once('?').unwrap_or((resource, ""));

        let mut candidates: Vec<(&String, &EntityEndpoint)> = self.entries.iter().collect();
        candidates.sort_by_key(|(_, endpoint)| endpoint.fixed_query.is_none());

        candidates.into_iter().find_map(|(table_name, endpoint)| {
            endpoint
                .match_resource(path, query)
                .map(|record_ref| ResourceMatch {
                    table_name: table_name.as_str(),
                    record_ref,
                })
        })
    }

    /// 由请求路径推断表名，无法识别时返回 `UnmappedTable`
    pub fn table_for_resource<'a>(&'a self, resource: &'a str) -> Result<&'a str> {
        self.match_resource(resource)
            .map(|m| m.table_name)
            .ok_or_else(|| SyncError::UnmappedTable(resource.to_string()))
    }
}
