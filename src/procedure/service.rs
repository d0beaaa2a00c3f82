//! 服务接口与启动入口

use rat_logger::{error, info};
use std::io;

use super::Procedure;
use crate::error::{ProcedureError, ProcedureResult};

/// 运行在主线程上的服务
///
/// `on_init` 与 `on_release` 都在主线程内执行，与其他所有任务共享同一个单线程上下文
///
/// 服务可以在 `on_init` 中保存调度器句柄；`on_release` 执行后服务即被丢弃，
/// 句柄随之释放。从未停止的调度器不会释放服务
pub trait Service: Send + 'static {
    /// 主线程启动后执行的初始化
    fn on_init(&mut self, procedure: &Procedure);

    /// 退出任务中执行的释放
    fn on_release(&mut self);
}

/// 启动服务并阻塞，直到收到 SIGINT/SIGTERM 或服务自行停止
///
/// SIGHUP 会被忽略
pub fn launch(service: impl Service) -> ProcedureResult<()> {
    Procedure::new(service).launch()
}

impl Procedure {
    /// 启动指定调度器并阻塞到退出，可配合 `with_config` 使用
    pub fn launch(&self) -> ProcedureResult<()> {
        self.start()?;
        self.wait_for_quit()
    }

    /// 等待退出信号并完成停止流程
    pub fn wait_for_quit(&self) -> ProcedureResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let waiter = self.clone();
            let mut joined = tokio::task::spawn_blocking(move || waiter.wait());

            tokio::select! {
                result = &mut joined => return flatten_join(result),
                signal = shutdown_signal() => {
                    match signal {
                        Ok(()) => info!("收到退出信号，开始停止主线程"),
                        Err(e) => error!("监听退出信号失败，直接停止主线程: {}", e),
                    }
                    self.stop();
                }
            }

            flatten_join(joined.await)
        })
    }
}

fn flatten_join(
    result: Result<ProcedureResult<()>, tokio::task::JoinError>,
) -> ProcedureResult<()> {
    result.map_err(|e| ProcedureError::TaskExecutionError(format!("等待主线程失败: {}", e)))?
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return result,
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => info!("收到 SIGHUP，忽略"),
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
