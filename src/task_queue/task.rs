//! 调度任务定义
//!
//! 任务入队后归队列所有，出队后归执行线程所有，创建后不可修改

use std::fmt;

/// 任务闭包，携带自身需要的上下文
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 普通任务，在主线程执行
    New,
    /// 异步任务结束的记账任务，不携带函数
    Finish,
    /// 退出任务，携带服务的释放回调
    Quit,
}

/// 调度任务
pub struct Task {
    kind: TaskKind,
    func: Option<BoxedTask>,
}

impl Task {
    /// 创建普通任务
    pub fn new(func: BoxedTask) -> Self {
        Self {
            kind: TaskKind::New,
            func: Some(func),
        }
    }

    /// 创建异步任务结束标记
    pub fn finish() -> Self {
        Self {
            kind: TaskKind::Finish,
            func: None,
        }
    }

    /// 创建退出任务
    pub fn quit(func: BoxedTask) -> Self {
        Self {
            kind: TaskKind::Quit,
            func: Some(func),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// 拆出任务函数
    pub fn into_func(self) -> Option<BoxedTask> {
        self.func
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("has_func", &self.func.is_some())
            .finish()
    }
}
