//! 分片数据库连接池
//!
//! 连接池由若干独立的工作线程组成，每个工作线程独占一个连接。
//! 调用方传入的分片索引对工作线程数取模后选中工作线程，
//! 同一分片上的语句严格按提交顺序逐条执行

pub mod connection;
pub mod operation;
pub mod worker;

pub use connection::DatabaseConnection;
pub use operation::{CompletionCallback, DatabaseOperation, QueryRequest, Reply};
pub use worker::{ConnectionWorker, WorkerHandle};

use rat_logger::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::error::{ProcedureError, ProcedureResult};
use crate::procedure::TaskSubmitter;
use crate::types::{DataValue, DatabaseType, ExecResult, QueryKind, QueryOutput, Row};

/// 分片数据库连接池
///
/// 同步接口会阻塞调用线程直到工作线程返回结果，不能在 tokio 运行时内调用；
/// 异步接口立即返回，结果回调通过 [`TaskSubmitter`] 回到主线程执行
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    db_type: DatabaseType,
    workers: Vec<WorkerHandle>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// 以默认保活间隔和连接超时打开连接池
    pub fn open(dsn: impl Into<String>, worker_count: usize) -> ProcedureResult<Self> {
        let config = PoolConfig::builder()
            .dsn(dsn)
            .worker_count(worker_count)
            .build()?;
        Self::with_config(config)
    }

    /// 按配置打开连接池，任一工作线程连接失败时关闭已打开的工作线程并返回错误
    pub fn with_config(config: PoolConfig) -> ProcedureResult<Self> {
        config.validate()?;
        let db_type = DatabaseType::from_dsn(&config.dsn)?;

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            match WorkerHandle::spawn(worker_id, &config) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    warn!("数据库工作线程 {} 启动失败，关闭已启动的 {} 个工作线程: {}", worker_id, workers.len(), e);
                    shutdown_workers(&workers);
                    return Err(e);
                }
            }
        }

        info!("{}连接池已打开，工作线程数: {}", db_type.as_str(), workers.len());
        Ok(Self {
            config,
            db_type,
            workers,
            closed: AtomicBool::new(false),
        })
    }

    /// 关闭连接池：向所有工作线程投递关闭哨兵并等待其退出
    ///
    /// 重复调用是无操作
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shutdown_workers(&self.workers);
        info!("{}连接池已关闭", self.db_type.as_str());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 分片索引对应的工作线程序号
    pub fn worker_index(&self, shard: usize) -> usize {
        shard % self.workers.len()
    }

    /// 同步查询多行
    pub fn query(
        &self,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<Vec<Row>> {
        self.call(shard, QueryKind::Query, sql.into(), params)?
            .into_rows()
    }

    /// 同步查询单行，没有结果时返回 `None`
    pub fn query_row(
        &self,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<Option<Row>> {
        self.call(shard, QueryKind::QueryRow, sql.into(), params)?
            .into_row()
    }

    /// 同步执行语句
    pub fn exec(
        &self,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<ExecResult> {
        self.call(shard, QueryKind::Exec, sql.into(), params)?
            .into_exec()
    }

    /// 异步查询多行，回调在主线程执行
    pub fn async_query<S, F>(
        &self,
        submitter: &S,
        callback: F,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<()>
    where
        S: TaskSubmitter + Clone + 'static,
        F: FnOnce(ProcedureResult<Vec<Row>>) + Send + 'static,
    {
        let reply = Reply::scheduled(submitter.clone(), move |result: ProcedureResult<QueryOutput>| {
            callback(result.and_then(QueryOutput::into_rows))
        });
        self.dispatch(shard, QueryKind::Query, sql.into(), params, reply)
    }

    /// 异步查询单行，回调在主线程执行
    pub fn async_query_row<S, F>(
        &self,
        submitter: &S,
        callback: F,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<()>
    where
        S: TaskSubmitter + Clone + 'static,
        F: FnOnce(ProcedureResult<Option<Row>>) + Send + 'static,
    {
        let reply = Reply::scheduled(submitter.clone(), move |result: ProcedureResult<QueryOutput>| {
            callback(result.and_then(QueryOutput::into_row))
        });
        self.dispatch(shard, QueryKind::QueryRow, sql.into(), params, reply)
    }

    /// 异步执行语句，回调在主线程执行
    pub fn async_exec<S, F>(
        &self,
        submitter: &S,
        callback: F,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<()>
    where
        S: TaskSubmitter + Clone + 'static,
        F: FnOnce(ProcedureResult<ExecResult>) + Send + 'static,
    {
        let reply = Reply::scheduled(submitter.clone(), move |result: ProcedureResult<QueryOutput>| {
            callback(result.and_then(QueryOutput::into_exec))
        });
        self.dispatch(shard, QueryKind::Exec, sql.into(), params, reply)
    }

    /// 异步执行语句且不关心结果，失败只记录日志
    pub fn async_exec_detached(
        &self,
        shard: usize,
        sql: impl Into<String>,
        params: Vec<DataValue>,
    ) -> ProcedureResult<()> {
        self.dispatch(shard, QueryKind::Exec, sql.into(), params, Reply::Detached)
    }

    fn call(
        &self,
        shard: usize,
        kind: QueryKind,
        sql: String,
        params: Vec<DataValue>,
    ) -> ProcedureResult<QueryOutput> {
        let (sender, receiver) = oneshot::channel();
        self.dispatch(shard, kind, sql, params, Reply::Sync(sender))?;
        // 工作线程退出时未交付的结果视为连接池已关闭
        receiver
            .blocking_recv()
            .unwrap_or(Err(ProcedureError::PoolClosed))
    }

    /// 把请求投递到分片对应的工作线程
    fn dispatch(
        &self,
        shard: usize,
        kind: QueryKind,
        sql: String,
        params: Vec<DataValue>,
        reply: Reply,
    ) -> ProcedureResult<()> {
        if self.is_closed() {
            return Err(ProcedureError::PoolClosed);
        }

        let request = QueryRequest {
            sql,
            params,
            kind,
            reply,
        };
        let worker = &self.workers[self.worker_index(shard)];
        if let Err(rejected) = worker.send(request) {
            warn!("数据库工作线程 {} 已退出，请求被拒绝: {}", worker.worker_id(), rejected.sql);
            rejected.reply.deliver(Err(ProcedureError::PoolClosed));
        }
        Ok(())
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn shutdown_workers(workers: &[WorkerHandle]) {
    for worker in workers {
        worker.shutdown();
    }
    for worker in workers {
        worker.join();
    }
}
