//! 错误处理模块
//!
//! 提供统一的错误类型定义和中文错误信息

use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum ProcedureError {
    /// 数据库连接错误（打开连接或首次 ping 失败）
    #[error("数据库连接失败: {message}")]
    ConnectionError { message: String },

    /// 单条语句执行错误
    #[error("语句执行失败: {message} (SQL: {sql})")]
    QueryError { message: String, sql: String },

    /// 连接池已关闭
    #[error("数据库连接池已关闭")]
    PoolClosed,

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },

    /// 不支持的数据库类型
    #[error("不支持的数据库连接串: {dsn}")]
    UnsupportedDatabase { dsn: String },

    /// 任务执行错误
    #[error("任务执行失败: {0}")]
    TaskExecutionError(String),

    /// 响应通道错误
    #[error("响应通道错误: {0}")]
    ResponseChannelError(String),

    /// IO 错误
    #[error("IO 操作失败: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML 解析错误
    #[error("TOML 配置解析失败: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// 结果类型别名
pub type ProcedureResult<T> = Result<T, ProcedureError>;

/// 错误构建器 - 提供便捷的错误创建方法
pub struct ErrorBuilder;

impl ErrorBuilder {
    /// 创建连接错误
    pub fn connection_error(message: impl Into<String>) -> ProcedureError {
        ProcedureError::ConnectionError {
            message: message.into(),
        }
    }

    /// 创建语句执行错误
    pub fn query_error(message: impl Into<String>, sql: impl Into<String>) -> ProcedureError {
        ProcedureError::QueryError {
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// 创建配置错误
    pub fn config_error(message: impl Into<String>) -> ProcedureError {
        ProcedureError::ConfigError {
            message: message.into(),
        }
    }

    /// 创建不支持的数据库错误
    pub fn unsupported_database(dsn: impl Into<String>) -> ProcedureError {
        ProcedureError::UnsupportedDatabase { dsn: dsn.into() }
    }
}

/// 便捷宏 - 快速创建错误
#[macro_export]
macro_rules! procedure_error {
    (connection, $msg:expr) => {
        $crate::error::ErrorBuilder::connection_error($msg)
    };
    (query, $msg:expr, $sql:expr) => {
        $crate::error::ErrorBuilder::query_error($msg, $sql)
    };
    (config, $msg:expr) => {
        $crate::error::ErrorBuilder::config_error($msg)
    };
    (unsupported_db, $dsn:expr) => {
        $crate::error::ErrorBuilder::unsupported_database($dsn)
    };
}

impl ProcedureError {
    /// 是否为连接池关闭导致的错误
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, ProcedureError::PoolClosed)
    }
}
