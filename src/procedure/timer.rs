//! 定时器线程
//!
//! 单线程最小堆 + 条件变量等待最近的到期时间，
//! 到期后把任务投递回主线程，未触发前可取消

use parking_lot::{Condvar, Mutex};
use rat_logger::debug;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::task_queue::BoxedTask;

const TIMER_ARMED: u8 = 0;
const TIMER_FIRED: u8 = 1;
const TIMER_CANCELLED: u8 = 2;

/// 定时器句柄，可在触发前取消
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    fn armed() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TIMER_ARMED)),
        }
    }

    /// 创建一个已取消的句柄
    pub(crate) fn cancelled() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TIMER_CANCELLED)),
        }
    }

    /// 取消定时器，返回是否成功阻止了任务投递
    ///
    /// 已触发的定时器无法取消，已投递的任务仍会执行
    pub fn stop(&self) -> bool {
        self.state
            .compare_exchange(TIMER_ARMED, TIMER_CANCELLED, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    /// 是否已触发
    pub fn is_fired(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == TIMER_FIRED
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == TIMER_CANCELLED
    }

    /// 抢占触发权
    fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(TIMER_ARMED, TIMER_FIRED, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }
}

/// 堆中的定时条目
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    fire: BoxedTask,
}

// 反向比较构成最小堆，同一时刻按登记顺序触发
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    /// 到期时间超出时钟范围的定时器，只能被取消
    unbounded: Vec<TimerHandle>,
    next_seq: u64,
}

/// 定时器线程
pub struct TimerThread {
    state: Mutex<TimerState>,
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                unbounded: Vec::new(),
                next_seq: 0,
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// 启动定时器线程
    pub fn start(self: &Arc<Self>, name: String) -> io::Result<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop())?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// 停止定时器线程，未触发的定时器全部视为取消
    pub fn stop(&self) {
        {
            // 持锁设置标志，避免与 run_loop 的检查交错丢失通知
            let _state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
        }
        self.notify.notify_one();

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// 登记定时任务
    pub fn schedule(&self, delay: Duration, fire: BoxedTask) -> TimerHandle {
        let handle = TimerHandle::armed();
        let mut state = self.state.lock();
        if self.shutdown.load(AtomicOrdering::Acquire) {
            handle.stop();
            return handle;
        }

        let Some(deadline) = Instant::now().checked_add(delay) else {
            debug!("定时器延迟 {:?} 超出时钟范围，永不触发", delay);
            state.unbounded.push(handle.clone());
            return handle;
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            deadline,
            seq,
            handle: handle.clone(),
            fire,
        });
        drop(state);
        self.notify.notify_one();
        handle
    }

    fn run_loop(&self) {
        let mut due = Vec::new();
        loop {
            {
                let mut state = self.state.lock();
                if self.shutdown.load(AtomicOrdering::Acquire) {
                    for entry in state.entries.drain() {
                        entry.handle.stop();
                    }
                    for handle in state.unbounded.drain(..) {
                        handle.stop();
                    }
                    break;
                }

                let now = Instant::now();
                while state.entries.peek().is_some_and(|entry| entry.deadline <= now) {
                    if let Some(entry) = state.entries.pop() {
                        due.push(entry);
                    }
                }

                if due.is_empty() {
                    match state.entries.peek().map(|entry| entry.deadline) {
                        Some(deadline) => {
                            self.notify.wait_until(&mut state, deadline);
                        }
                        None => {
                            self.notify.wait(&mut state);
                        }
                    }
                    continue;
                }
            }

            // 释放锁后投递，投递路径会获取主线程队列锁
            for entry in due.drain(..) {
                if entry.handle.try_fire() {
                    (entry.fire)();
                }
            }
        }
        debug!("定时器线程退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_timer_fires_in_deadline_order() {
        let timer = TimerThread::new();
        timer.start("test-timer".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        for (delay, tag) in [(60u64, 3), (20, 1), (40, 2)] {
            let tx = tx.clone();
            timer.schedule(Duration::from_millis(delay), Box::new(move || {
                let _ = tx.send(tag);
            }));
        }

        let fired: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![1, 2, 3]);
        timer.stop();
    }

    #[test]
    fn test_timer_cancel_before_fire() {
        let timer = TimerThread::new();
        timer.start("test-timer".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = timer.schedule(Duration::from_millis(100), Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(handle.stop());
        assert!(handle.is_cancelled());
        assert!(!handle.stop(), "重复取消应返回 false");

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(!handle.is_fired());
        timer.stop();
    }

    #[test]
    fn test_timer_cannot_cancel_after_fire() {
        let timer = TimerThread::new();
        timer.start("test-timer".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = timer.schedule(Duration::from_millis(10), Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(handle.is_fired());
        assert!(!handle.stop());
        timer.stop();
    }

    #[test]
    fn test_schedule_after_stop_is_cancelled() {
        let timer = TimerThread::new();
        timer.start("test-timer".to_string()).unwrap();
        let pending = timer.schedule(Duration::from_secs(60), Box::new(|| {}));
        timer.stop();

        assert!(pending.is_cancelled());
        let late = timer.schedule(Duration::from_millis(1), Box::new(|| {}));
        assert!(late.is_cancelled());
    }

    #[test]
    fn test_unbounded_delay_never_fires() {
        let timer = TimerThread::new();
        timer.start("test-timer".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        let cancelled = timer.schedule(Duration::MAX, Box::new(|| {}));
        let pending = timer.schedule(Duration::MAX, Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(!pending.is_fired());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(cancelled.stop());
        timer.stop();
        // 停止定时器线程后同样视为取消
        assert!(pending.is_cancelled());
        assert!(!pending.stop());
    }
}
