//! rat_procedure - 单线程任务调度与分片数据库访问
//!
//! 所有应用逻辑运行在唯一的主线程上，阻塞工作（磁盘、网络、数据库）在其他线程执行，
//! 结果通过任务投递回到主线程，从而保持单线程不变式

// 导出所有公共模块
pub mod error;
pub mod config;
pub mod types;
pub mod task_queue;
pub mod procedure;
pub mod pool;

// 重新导出常用类型和函数
pub use error::{ErrorBuilder, ProcedureError, ProcedureResult};
pub use config::{
    AppConfig, LogLevel, LoggingConfig, PoolConfig, PoolConfigBuilder, ProcedureConfig,
    ProcedureConfigBuilder,
};
pub use types::*;
pub use task_queue::{BoxedTask, Task, TaskKind, TaskQueue};
pub use procedure::{
    Procedure, ProcedureState, Service, TaskSubmitter, TimerHandle, launch, protected_execute,
};
pub use pool::ConnectionPool;

use rat_logger::handler::term::TermConfig;
use rat_logger::{LoggerBuilder, info};

/// 按配置初始化终端日志
///
/// 库本身不会自动初始化日志，调用者可以使用此函数或自行配置 rat_logger
pub fn init_logging(config: &LoggingConfig) -> ProcedureResult<()> {
    let term_config = TermConfig {
        enable_color: config.enable_color,
        format: None,
        color: None,
    };

    LoggerBuilder::new()
        .with_level(config.level.into())
        .add_terminal_with_config(term_config)
        .init()
        .map_err(|e| procedure_error!(config, format!("日志初始化失败: {}", e)))?;

    info!("{} 日志已初始化", get_info());
    Ok(())
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
