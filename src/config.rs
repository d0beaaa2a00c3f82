//! 配置模块
//!
//! 提供调度器、数据库连接池和日志的配置结构与构建器
//! 支持从 TOML 字符串或文件加载

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ProcedureResult;
use crate::procedure_error;
use crate::task_queue::DEFAULT_QUEUE_CAPACITY;

/// 默认保活间隔（秒）
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 600;
/// 默认连接超时（秒）
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    /// 任务队列初始容量
    pub queue_capacity: usize,
    /// 主线程名称
    pub thread_name: String,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: "procedure-main".to_string(),
        }
    }
}

impl ProcedureConfig {
    /// 创建构建器
    pub fn builder() -> ProcedureConfigBuilder {
        ProcedureConfigBuilder::default()
    }

    /// 校验配置
    pub fn validate(&self) -> ProcedureResult<()> {
        if self.queue_capacity == 0 {
            return Err(procedure_error!(config, "任务队列容量必须大于0"));
        }
        if self.thread_name.is_empty() {
            return Err(procedure_error!(config, "主线程名称不能为空"));
        }
        Ok(())
    }
}

/// 调度器配置构建器
#[derive(Debug, Default)]
pub struct ProcedureConfigBuilder {
    queue_capacity: Option<usize>,
    thread_name: Option<String>,
}

impl ProcedureConfigBuilder {
    /// 设置任务队列初始容量
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// 设置主线程名称
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> ProcedureResult<ProcedureConfig> {
        let defaults = ProcedureConfig::default();
        let config = ProcedureConfig {
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            thread_name: self.thread_name.unwrap_or(defaults.thread_name),
        };
        config.validate()?;
        Ok(config)
    }
}

/// 数据库连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 连接串，`mysql://` 或 `sqlite:` 开头
    pub dsn: String,
    /// 工作线程数量，每个工作线程独占一个连接
    pub worker_count: usize,
    /// 保活 ping 间隔（秒）
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// 建立连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_keepalive_interval_secs() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl PoolConfig {
    /// 创建构建器
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// 校验配置
    pub fn validate(&self) -> ProcedureResult<()> {
        if self.dsn.trim().is_empty() {
            return Err(procedure_error!(config, "连接串不能为空"));
        }
        if self.worker_count == 0 {
            return Err(procedure_error!(config, "工作线程数量必须大于0"));
        }
        if self.keepalive_interval_secs == 0 {
            return Err(procedure_error!(config, "保活间隔必须大于0"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(procedure_error!(config, "连接超时必须大于0"));
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 连接池配置构建器
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    dsn: Option<String>,
    worker_count: Option<usize>,
    keepalive_interval_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

impl PoolConfigBuilder {
    /// 设置连接串
    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// 设置工作线程数量
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// 设置保活间隔（秒）
    pub fn keepalive_interval_secs(mut self, secs: u64) -> Self {
        self.keepalive_interval_secs = Some(secs);
        self
    }

    /// 设置连接超时（秒）
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// 构建配置
    pub fn build(self) -> ProcedureResult<PoolConfig> {
        let dsn = self
            .dsn
            .ok_or_else(|| procedure_error!(config, "必须设置连接串"))?;
        let config = PoolConfig {
            dsn,
            worker_count: self.worker_count.unwrap_or(1),
            keepalive_interval_secs: self
                .keepalive_interval_secs
                .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for rat_logger::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => rat_logger::LevelFilter::Error,
            LogLevel::Warn => rat_logger::LevelFilter::Warn,
            LogLevel::Info => rat_logger::LevelFilter::Info,
            LogLevel::Debug => rat_logger::LevelFilter::Debug,
            LogLevel::Trace => rat_logger::LevelFilter::Trace,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 终端输出是否启用颜色
    pub enable_color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            enable_color: true,
        }
    }
}

/// 应用总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 调度器配置
    pub procedure: ProcedureConfig,
    /// 数据库连接池配置（可选）
    pub pool: Option<PoolConfig>,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从 TOML 字符串加载并校验
    pub fn from_toml_str(content: &str) -> ProcedureResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载并校验
    pub fn from_file(path: impl AsRef<Path>) -> ProcedureResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 校验所有子配置
    pub fn validate(&self) -> ProcedureResult<()> {
        self.procedure.validate()?;
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        Ok(())
    }
}
