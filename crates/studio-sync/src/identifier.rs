//! 记录标识
//!
//! 离线创建的记录在服务端分配 ID 之前使用本地 UUID 作为占位，
//! 服务端 ID 永远是整数。两者用 [`Identifier`] 区分，不再靠字符串形状判断。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;

/// 本地生成的记录标识（UUID v4，36 字符带连字符格式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    /// 生成新的本地标识
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 解析 36 字符带连字符的 UUID；其他格式（包括纯数字）一律返回 None
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 36 {
            return None;
        }
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for LocalId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| SyncError::InvalidArgument(format!("不是合法的本地标识: {}", s)))
    }
}

/// 记录标识：本地占位或服务端 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identifier {
    /// 尚未同步的本地记录
    Local(LocalId),
    /// 服务端分配的整数 ID
    Remote(i64),
}

impl Identifier {
    /// 从 JSON 值解析标识
    ///
    /// - 整数、纯数字字符串 → `Remote`
    /// - UUID 字符串 → `Local`
    /// - 其他 → None
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Identifier::Remote),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// 从字符串解析标识（路径段、查询参数）
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Some(Identifier::Remote(id));
        }
        LocalId::parse(s).map(Identifier::Local)
    }

    pub fn as_remote(&self) -> Option<i64> {
        match self {
            Identifier::Remote(id) => Some(*id),
            Identifier::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Identifier::Local(id) => Some(*id),
            Identifier::Remote(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Identifier::Remote(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Local(id) => write!(f, "{}", id),
            Identifier::Remote(id) => write!(f, "{}", id),
        }
    }
}

impl From<LocalId> for Identifier {
    fn from(id: LocalId) -> Self {
        Identifier::Local(id)
    }
}
