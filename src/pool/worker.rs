//! 连接工作线程
//!
//! 每个工作线程独占一个连接和一个请求队列，按入队顺序逐条执行语句，
//! 并在空闲时定期 ping 连接保活

use parking_lot::Mutex;
use rat_logger::{debug, error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::connection::DatabaseConnection;
use super::operation::{DatabaseOperation, QueryRequest};
use crate::config::PoolConfig;
use crate::error::{ProcedureError, ProcedureResult};
use crate::procedure_error;

/// 连接工作线程
pub struct ConnectionWorker {
    /// 工作线程ID
    worker_id: usize,
    /// 独占的连接
    connection: DatabaseConnection,
    /// 请求接收队列
    receiver: mpsc::UnboundedReceiver<DatabaseOperation>,
    /// 保活间隔
    keepalive_interval: Duration,
}

impl ConnectionWorker {
    /// 运行工作线程，直到收到关闭请求
    pub async fn run(mut self) {
        info!(
            "数据库工作线程 {} 启动 ({})",
            self.worker_id,
            self.connection.db_type().as_str()
        );

        let period = self.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                operation = self.receiver.recv() => match operation {
                    Some(DatabaseOperation::Statement(request)) => self.process(request).await,
                    Some(DatabaseOperation::Shutdown) => {
                        info!("数据库工作线程 {} 收到关闭任务", self.worker_id);
                        break;
                    }
                    None => {
                        info!("数据库工作线程 {} 请求通道关闭", self.worker_id);
                        break;
                    }
                },
                _ = keepalive.tick() => self.keepalive().await,
            }
        }

        self.reject_remaining();

        let worker_id = self.worker_id;
        if let Err(e) = self.connection.close().await {
            warn!("数据库工作线程 {} 关闭连接失败: {}", worker_id, e);
        }
        info!("数据库工作线程 {} 退出", worker_id);
    }

    /// 执行单条语句并交付结果，失败时记录语句与参数
    async fn process(&mut self, request: QueryRequest) {
        let QueryRequest {
            sql,
            params,
            kind,
            reply,
        } = request;

        let result = self.connection.execute(kind, &sql, &params).await;
        match &result {
            Ok(_) => debug!("数据库工作线程 {} 执行成功: {}", self.worker_id, sql),
            Err(e) => {
                error!("数据库工作线程 {} 执行语句失败: {}", self.worker_id, e);
                error!("{}; {:?}", sql, params);
            }
        }
        reply.deliver(result);
    }

    async fn keepalive(&mut self) {
        match self.connection.ping().await {
            Ok(()) => debug!("数据库工作线程 {} 保活 ping 成功", self.worker_id),
            Err(e) => warn!("数据库工作线程 {} 保活 ping 失败: {}", self.worker_id, e),
        }
    }

    /// 关闭后仍在队列中的请求全部以连接池关闭错误结束
    fn reject_remaining(&mut self) {
        self.receiver.close();
        let mut rejected = 0usize;
        while let Ok(operation) = self.receiver.try_recv() {
            if let DatabaseOperation::Statement(request) = operation {
                request.reply.deliver(Err(ProcedureError::PoolClosed));
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!("数据库工作线程 {} 关闭时拒绝了 {} 个未执行请求", self.worker_id, rejected);
        }
    }
}

/// 工作线程句柄，由连接池持有
#[derive(Debug)]
pub struct WorkerHandle {
    worker_id: usize,
    sender: mpsc::UnboundedSender<DatabaseOperation>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// 启动工作线程：在线程内建立连接，连接成功后才返回
    pub fn spawn(worker_id: usize, config: &PoolConfig) -> ProcedureResult<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<ProcedureResult<()>>();

        let dsn = config.dsn.clone();
        let keepalive_interval = config.keepalive_interval();
        let connect_timeout = config.connect_timeout();

        let thread = thread::Builder::new()
            .name(format!("db-worker-{}", worker_id))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let connected =
                        tokio::time::timeout(connect_timeout, DatabaseConnection::connect(&dsn)).await;
                    let connection = match connected {
                        Ok(Ok(connection)) => connection,
                        Ok(Err(e)) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                        Err(_) => {
                            let _ = ready_tx.send(Err(procedure_error!(
                                connection,
                                format!("连接超时 ({:?})", connect_timeout)
                            )));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    ConnectionWorker {
                        worker_id,
                        connection,
                        receiver,
                        keepalive_interval,
                    }
                    .run()
                    .await;
                });
            })?;

        let ready = ready_rx.blocking_recv().map_err(|_| {
            ProcedureError::ResponseChannelError(format!("数据库工作线程 {} 启动时异常退出", worker_id))
        });
        let handle = Self {
            worker_id,
            sender,
            thread: Mutex::new(Some(thread)),
        };

        match ready {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) | Err(e) => {
                handle.join();
                Err(e)
            }
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// 投递请求；工作线程已退出时把请求交还调用方
    pub fn send(&self, request: QueryRequest) -> Result<(), QueryRequest> {
        match self.sender.send(DatabaseOperation::Statement(request)) {
            Err(mpsc::error::SendError(DatabaseOperation::Statement(request))) => Err(request),
            _ => Ok(()),
        }
    }

    /// 投递关闭哨兵
    pub fn shutdown(&self) {
        let _ = self.sender.send(DatabaseOperation::Shutdown);
    }

    /// 等待工作线程退出
    pub fn join(&self) {
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("数据库工作线程 {} 异常退出", self.worker_id);
            }
        }
    }
}
