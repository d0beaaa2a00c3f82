//! 主线程调度模块
//!
//! 所有应用逻辑都在唯一的主线程上顺序执行：
//! - 任意线程通过 `sync_task` 向主线程投递任务
//! - `async_task` 在临时线程执行阻塞工作，结束后回到主线程记账
//! - `after_func` 定时投递任务，可在触发前取消
//! - 退出任务执行且未完成计数归零后主线程才结束

pub mod protect;
pub mod service;
pub mod timer;

pub use protect::protected_execute;
pub use service::{Service, launch};
pub use timer::{TimerHandle, TimerThread};

use parking_lot::{Condvar, Mutex};
use rat_logger::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::config::ProcedureConfig;
use crate::error::{ProcedureError, ProcedureResult};
use crate::task_queue::{BoxedTask, Task, TaskKind, TaskQueue};

/// 向主线程投递任务的能力
///
/// 数据库连接池通过它把异步结果送回主线程
pub trait TaskSubmitter: Send + Sync {
    /// 投递任务，任务将在主线程执行
    fn submit(&self, task: BoxedTask);
}

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureState {
    /// 已创建，尚未启动
    Created,
    /// 运行中
    Running,
    /// 已请求停止，等待未完成任务归零
    Draining,
    /// 已停止
    Stopped,
}

impl ProcedureState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcedureState::Created,
            1 => ProcedureState::Running,
            2 => ProcedureState::Draining,
            _ => ProcedureState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProcedureState::Created => 0,
            ProcedureState::Running => 1,
            ProcedureState::Draining => 2,
            ProcedureState::Stopped => 3,
        }
    }
}

struct Shared {
    config: ProcedureConfig,
    /// 待执行队列，仅在锁内访问
    pending_queue: Mutex<TaskQueue<Task>>,
    cond: Condvar,
    /// 已投递或执行中的任务数，只在持有队列锁时增加
    pending: AtomicI32,
    state: AtomicU8,
    /// 退出任务执行释放回调后置空，断开服务持有的句柄与调度器之间的引用环
    service: Mutex<Option<Box<dyn Service>>>,
    timer: Arc<TimerThread>,
    main_thread: Mutex<Option<JoinHandle<()>>>,
    main_thread_id: OnceLock<ThreadId>,
    /// 主循环是否已退出
    exited: Mutex<bool>,
    exit_cond: Condvar,
}

impl Shared {
    fn state(&self) -> ProcedureState {
        ProcedureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ProcedureState, to: ProcedureState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 投递不计数的任务（异步任务结束标记）
    fn push_task(&self, task: Task) {
        self.pending_queue.lock().push(task);
        self.cond.notify_one();
    }

    /// 计数并投递任务，主线程已停止时返回 false
    ///
    /// 状态检查与计数都在队列锁内完成，主循环在同一把锁内决定退出
    fn submit_counted(&self, task: Task) -> bool {
        let mut pending_queue = self.pending_queue.lock();
        if self.state() == ProcedureState::Stopped {
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        pending_queue.push(task);
        drop(pending_queue);
        self.cond.notify_one();
        true
    }

    /// 为异步任务预留计数，主线程已停止时返回 false
    fn reserve(&self) -> bool {
        let _pending_queue = self.pending_queue.lock();
        if self.state() == ProcedureState::Stopped {
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn sync_task(&self, func: BoxedTask) {
        if !self.submit_counted(Task::new(func)) {
            warn!("主线程已停止，丢弃投递的任务");
        }
    }

    fn mark_exited(&self) {
        *self.exited.lock() = true;
        self.exit_cond.notify_all();
    }

    /// 主循环：交换双缓冲队列后在锁外逐个执行
    fn run_loop(&self) {
        let _ = self.main_thread_id.set(thread::current().id());
        let mut running = TaskQueue::with_capacity(self.config.queue_capacity);
        let mut quit = false;

        loop {
            {
                let mut pending_queue = self.pending_queue.lock();
                while pending_queue.is_empty() {
                    self.cond.wait(&mut pending_queue);
                }
                std::mem::swap(&mut *pending_queue, &mut running);
            }

            while let Some(task) = running.pop() {
                let kind = task.kind();
                if let Some(func) = task.into_func() {
                    protected_execute(func);
                }
                if kind == TaskKind::Quit {
                    quit = true;
                }
                self.pending.fetch_sub(1, Ordering::AcqRel);
            }

            if quit {
                // 计数归零时队列必然为空，持锁切换状态后不会再有任务进入
                let _pending_queue = self.pending_queue.lock();
                if self.pending.load(Ordering::Acquire) <= 0 {
                    self.state
                        .store(ProcedureState::Stopped.as_u8(), Ordering::Release);
                    break;
                }
            }
        }

        self.timer.stop();
        info!("主线程退出，未完成任务数: {}", self.pending.load(Ordering::Acquire));
        self.mark_exited();
    }
}

/// 单线程任务调度器
///
/// 句柄可廉价克隆并跨线程传递，所有克隆共享同一个主线程
#[derive(Clone)]
pub struct Procedure {
    shared: Arc<Shared>,
}

impl Procedure {
    /// 使用默认配置创建调度器
    pub fn new(service: impl Service) -> Self {
        Self::build(service, ProcedureConfig::default())
    }

    /// 使用指定配置创建调度器
    pub fn with_config(service: impl Service, config: ProcedureConfig) -> ProcedureResult<Self> {
        config.validate()?;
        Ok(Self::build(service, config))
    }

    fn build(service: impl Service, config: ProcedureConfig) -> Self {
        let capacity = config.queue_capacity;
        Self {
            shared: Arc::new(Shared {
                config,
                pending_queue: Mutex::new(TaskQueue::with_capacity(capacity)),
                cond: Condvar::new(),
                pending: AtomicI32::new(0),
                state: AtomicU8::new(ProcedureState::Created.as_u8()),
                service: Mutex::new(Some(Box::new(service))),
                timer: TimerThread::new(),
                main_thread: Mutex::new(None),
                main_thread_id: OnceLock::new(),
                exited: Mutex::new(false),
                exit_cond: Condvar::new(),
            }),
        }
    }

    /// 在主线程执行任务，可在任意线程调用且不会阻塞
    ///
    /// 同一线程先后投递的任务按投递顺序执行
    pub fn sync_task<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.sync_task(Box::new(func));
    }

    /// 在临时线程执行阻塞任务，结束后回到主线程记账
    pub fn async_task<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.reserve() {
            warn!("主线程已停止，丢弃异步任务");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-async", self.shared.config.thread_name))
            .spawn(move || {
                protected_execute(Box::new(func));
                shared.push_task(Task::finish());
            });

        if let Err(e) = spawned {
            error!("异步任务线程创建失败: {}", e);
            // 保持计数平衡
            self.shared.push_task(Task::finish());
        }
    }

    /// 延迟后在主线程执行任务，返回可取消的定时器句柄
    pub fn after_func<F>(&self, delay: Duration, func: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        if self.state() == ProcedureState::Stopped {
            warn!("主线程已停止，定时任务不会被投递");
            return TimerHandle::cancelled();
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.timer.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.sync_task(Box::new(func));
                }
            }),
        )
    }

    /// 启动主线程，并在主线程内执行服务初始化
    pub fn start(&self) -> ProcedureResult<()> {
        if !self
            .shared
            .transition(ProcedureState::Created, ProcedureState::Running)
        {
            warn!("主线程已启动，忽略重复启动: 状态={:?}", self.state());
            return Ok(());
        }

        let name = self.shared.config.thread_name.clone();
        if let Err(e) = self.shared.timer.start(format!("{}-timer", name)) {
            error!("定时器线程创建失败: {}", e);
            self.mark_stopped();
            return Err(e.into());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || shared.run_loop());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("主线程创建失败: {}", e);
                self.shared.timer.stop();
                self.mark_stopped();
                return Err(e.into());
            }
        };
        *self.shared.main_thread.lock() = Some(handle);
        info!("主线程启动: {}", name);

        let procedure = self.clone();
        self.sync_task(move || {
            if let Some(service) = procedure.shared.service.lock().as_mut() {
                service.on_init(&procedure);
            }
        });
        Ok(())
    }

    /// 请求停止：投递退出任务，执行服务释放回调
    ///
    /// 主线程在退出任务执行且未完成任务全部结束后退出，
    /// 需要等待退出时配合 `wait` 使用
    pub fn stop(&self) {
        let previous = self.state();
        match previous {
            ProcedureState::Running => {
                if !self
                    .shared
                    .transition(ProcedureState::Running, ProcedureState::Draining)
                {
                    warn!("主线程状态已变化，忽略停止请求");
                    return;
                }
            }
            ProcedureState::Created => {
                warn!("主线程尚未启动，忽略停止请求");
                return;
            }
            ProcedureState::Draining | ProcedureState::Stopped => {
                debug!("主线程已在停止流程中: 状态={:?}", previous);
                return;
            }
        }

        let shared = Arc::clone(&self.shared);
        self.shared.submit_counted(Task::quit(Box::new(move || {
            // 释放后丢弃服务，服务持有的调度器句柄随之释放
            let service = shared.service.lock().take();
            if let Some(mut service) = service {
                service.on_release();
            }
        })));
    }

    fn mark_stopped(&self) {
        self.shared
            .state
            .store(ProcedureState::Stopped.as_u8(), Ordering::Release);
        self.shared.mark_exited();
    }

    /// 等待主线程退出
    ///
    /// 可在多个线程同时调用，都会阻塞到主循环退出；未启动时立即返回
    pub fn wait(&self) -> ProcedureResult<()> {
        if self.is_main_thread() {
            return Err(ProcedureError::TaskExecutionError(
                "不能在主线程内等待主线程退出".to_string(),
            ));
        }

        let handle = self.shared.main_thread.lock().take();
        if let Some(handle) = handle {
            return handle.join().map_err(|payload| {
                ProcedureError::TaskExecutionError(format!(
                    "主线程异常退出: {}",
                    protect::panic_message(payload.as_ref())
                ))
            });
        }

        let mut exited = self.shared.exited.lock();
        while !*exited && self.state() != ProcedureState::Created {
            self.shared.exit_cond.wait(&mut exited);
        }
        Ok(())
    }

    /// 停止并等待主线程退出
    pub fn shutdown(&self) -> ProcedureResult<()> {
        self.stop();
        self.wait()
    }

    /// 当前状态
    pub fn state(&self) -> ProcedureState {
        self.shared.state()
    }

    /// 已投递或执行中的任务数
    pub fn pending_count(&self) -> i32 {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// 当前是否在主线程上
    pub fn is_main_thread(&self) -> bool {
        self.shared.main_thread_id.get() == Some(&thread::current().id())
    }
}

impl TaskSubmitter for Procedure {
    fn submit(&self, task: BoxedTask) {
        self.shared.sync_task(task);
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("thread_name", &self.shared.config.thread_name)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}
