//! 同步引擎配置

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::storage::{DEFAULT_RETENTION_HOURS, MAX_RETENTION_HOURS};

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 离线同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 队列数据库文件名
    pub database_file: String,
    /// 业务 API 基础地址
    pub api_base_url: String,
    /// 可达性探测地址，未设置时使用 `api_base_url`
    pub probe_url: Option<String>,
    /// 探测超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 定时同步间隔（秒）
    pub sync_interval_secs: u64,
    /// 同步时单次请求超时（秒）
    pub operation_timeout_secs: u64,
    /// 已同步记录保留时长（小时）
    pub retention_hours: u64,
    /// 事件广播通道容量
    pub event_capacity: usize,
    pub http_client_config: HttpClientConfig,
    /// 由外部登录层提供的访问令牌
    pub bearer_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            database_file: "offline_queue.db".to_string(),
            api_base_url: String::new(),
            probe_url: None,
            probe_timeout_ms: 3000,
            sync_interval_secs: 30,
            operation_timeout_secs: 15,
            retention_hours: DEFAULT_RETENTION_HOURS,
            event_capacity: 256,
            http_client_config: HttpClientConfig::default(),
            bearer_token: None,
        }
    }
}

/// 获取默认数据目录 ~/.studio-sync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".studio-sync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".studio-sync")
    } else {
        PathBuf::from("./studio_sync_data")
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 文件加载配置，缺省字段使用默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("API 基础地址不能为空".to_string()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "API 基础地址必须是 http(s) 地址: {}",
                self.api_base_url
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("数据目录不能为空".to_string()));
        }
        if self.database_file.is_empty() {
            return Err(SyncError::Config("数据库文件名不能为空".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SyncError::Config("探测超时不能为0".to_string()));
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::Config("同步间隔不能为0".to_string()));
        }
        if self.operation_timeout_secs == 0 {
            return Err(SyncError::Config("请求超时不能为0".to_string()));
        }
        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(SyncError::Config(format!(
                "保留时长不能超过 {} 小时: {}",
                MAX_RETENTION_HOURS, self.retention_hours
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn probe_url(&self) -> &str {
        self.probe_url.as_deref().unwrap_or(&self.api_base_url)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn database_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.database_file = name.into();
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn probe_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.probe_url = Some(url.into());
        self
    }

    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.probe_timeout_ms = ms;
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn operation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.operation_timeout_secs = secs;
        self
    }

    pub fn retention_hours(mut self, hours: u64) -> Self {
        self.config.retention_hours = hours;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn bearer_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.bearer_token = Some(token.into());
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_defaults() {
        let config = SyncConfig::builder()
            .data_dir("/tmp/studio")
            .api_base_url("https://api.studio.test")
            .build();

        assert!(config.validate().is_ok());
        assert_eq!(config.database_path(), PathBuf::from("/tmp/studio/offline_queue.db"));
        assert_eq!(config.probe_url(), "https://api.studio.test");
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.retention_hours, 24);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            SyncConfig::builder().build().validate(),
            Err(SyncError::Config(_))
        ));

        let config = SyncConfig::builder()
            .api_base_url("ftp://api.studio.test")
            .build();
        assert!(config.validate().is_err());

        let config = SyncConfig::builder()
            .api_base_url("https://api.studio.test")
            .sync_interval_secs(0)
            .build();
        assert!(config.validate().is_err());

        let config = SyncConfig::builder()
            .api_base_url("https://api.studio.test")
            .retention_hours(u64::MAX)
            .build();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"api_base_url": "http://localhost:8080/api", "sync_interval_secs": 5, "bearer_token": "abc"}}"#
        )
        .unwrap();

        let config = SyncConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
        assert_eq!(config.sync_interval_secs, 5);
        assert_eq!(config.operation_timeout_secs, 15);
        assert_eq!(config.database_file, "offline_queue.db");
        assert_eq!(config.bearer_token.as_deref(), Some("abc"));
    }
}
