//! 数据库操作请求定义
//!
//! 请求由调用方创建，进入目标工作线程的队列后归其所有，直到被执行

use std::fmt;
use tokio::sync::oneshot;

use crate::error::ProcedureResult;
use crate::procedure::TaskSubmitter;
use crate::types::{DataValue, QueryKind, QueryOutput};

/// 异步结果回调
pub type CompletionCallback = Box<dyn FnOnce(ProcedureResult<QueryOutput>) + Send + 'static>;

/// 工作线程队列中的操作
#[derive(Debug)]
pub enum DatabaseOperation {
    /// 执行语句
    Statement(QueryRequest),
    /// 关闭工作线程
    Shutdown,
}

/// 语句请求
#[derive(Debug)]
pub struct QueryRequest {
    /// SQL 语句
    pub sql: String,
    /// 位置参数
    pub params: Vec<DataValue>,
    /// 语句类型
    pub kind: QueryKind,
    /// 结果交付方式
    pub reply: Reply,
}

/// 结果交付方式
pub enum Reply {
    /// 同步调用：单槽交接，唤醒阻塞的调用方
    Sync(oneshot::Sender<ProcedureResult<QueryOutput>>),
    /// 异步调用：回调被投递回主线程执行
    Async(CompletionCallback),
    /// 不关心结果，仅记录错误日志
    Detached,
}

impl Reply {
    /// 包装回调，使其在主线程上执行
    pub fn scheduled<S, F>(submitter: S, callback: F) -> Self
    where
        S: TaskSubmitter + 'static,
        F: FnOnce(ProcedureResult<QueryOutput>) + Send + 'static,
    {
        Reply::Async(Box::new(move |result| {
            submitter.submit(Box::new(move || callback(result)));
        }))
    }

    /// 交付结果
    pub fn deliver(self, result: ProcedureResult<QueryOutput>) {
        match self {
            Reply::Sync(sender) => {
                // 调用方已放弃等待时结果无人接收
                let _ = sender.send(result);
            }
            Reply::Async(callback) => callback(result),
            Reply::Detached => {}
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Sync(_) => f.write_str("Reply::Sync"),
            Reply::Async(_) => f.write_str("Reply::Async"),
            Reply::Detached => f.write_str("Reply::Detached"),
        }
    }
}
