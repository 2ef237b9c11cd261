use thiserror::Error;

/// 服务端返回“重复记录”时错误消息中可能出现的关键字（英文 / 阿拉伯文）
///
/// 仅在服务端没有返回 409 时作为兜底判断。
const DUPLICATE_MARKERS: &[&str] = &["duplicate", "already exists", "مكرر"];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    /// 网络层失败：请求没有拿到任何响应（连接失败、DNS、传输中断）
    #[error("Network error: {0}")]
    Network(String),

    /// 请求超时（同样视为网络层失败）
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 服务端返回了错误状态码（应用层失败）
    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },

    /// 离线时的读请求：待同步队列不提供读服务
    #[error("No local data: {0}")]
    NoLocalData(String),

    /// 表名没有对应的接口配置
    #[error("Unmapped table: {0}")]
    UnmappedTable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl SyncError {
    /// 从 HTTP 状态码和响应内容构造应用层错误
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        SyncError::Api {
            status,
            message: message.into(),
        }
    }

    /// 是否为网络层失败（没有收到任何响应）
    ///
    /// 这类失败会被当作离线处理：写操作进入本地队列，而不是抛给调用方。
    pub fn is_network_failure(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
    }

    /// 服务端返回的 HTTP 状态码（仅应用层错误有值）
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// HTTP 409
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// HTTP 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 创建操作是否被服务端判定为重复记录
    ///
    /// 409，或者错误消息里带有“重复”关键字。
    // TODO: 服务端提供结构化错误码后改为按错误码判断，去掉关键字匹配
    pub fn is_duplicate(&self) -> bool {
        match self {
            SyncError::Api { status: 409, .. } => true,
            SyncError::Api { message, .. } => {
                let lowered = message.to_lowercase();
                DUPLICATE_MARKERS.iter().any(|marker| lowered.contains(marker))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
