//! 任务队列模块
//!
//! 可增长的环形缓冲区，容量始终为2的幂
//! 队列本身不加锁，由持有者在外部保证互斥

pub mod task;

pub use task::*;

/// 默认初始容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// 环形任务队列
#[derive(Debug)]
pub struct TaskQueue<T> {
    /// 槽位缓冲区
    slots: Vec<Option<T>>,
    /// 读位置
    read: usize,
    /// 写位置
    write: usize,
    /// 是否为空（读写位置重合时用于区分空和满）
    empty: bool,
}

impl<T> TaskQueue<T> {
    /// 创建队列，容量向上取整到2的幂（最小为2）
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = ceil_to_power_of_two(capacity);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            read: 0,
            write: 0,
            empty: true,
        }
    }

    /// 追加到队尾，满时先扩容
    pub fn push(&mut self, item: T) {
        if !self.empty && self.read == self.write {
            self.grow();
        }

        self.slots[self.write] = Some(item);
        self.write = (self.write + 1) & self.mask();
        self.empty = false;
    }

    /// 取出最早入队的元素
    pub fn pop(&mut self) -> Option<T> {
        if self.empty {
            return None;
        }

        let item = self.slots[self.read].take();
        self.read = (self.read + 1) & self.mask();
        if self.read == self.write {
            self.empty = true;
        }
        item
    }

    /// 当前元素个数
    pub fn len(&self) -> usize {
        if self.empty {
            return 0;
        }
        if self.read < self.write {
            self.write - self.read
        } else {
            self.capacity() - self.read + self.write
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// 当前容量
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// 扩容到下一个2的幂，保持先进先出顺序，读位置归零
    fn grow(&mut self) {
        let len = self.len();
        let new_capacity = ceil_to_power_of_two(self.capacity() + 1);
        let mut slots = Vec::with_capacity(new_capacity);

        // 满队列时 read == write，按逻辑顺序搬运
        slots.extend(self.slots.drain(self.read..));
        slots.extend(self.slots.drain(..));
        slots.resize_with(new_capacity, || None);

        self.slots = slots;
        self.read = 0;
        self.write = len;
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

/// 向上取整到2的幂，最小为2
pub fn ceil_to_power_of_two(n: usize) -> usize {
    if n <= 2 {
        return 2;
    }
    n.checked_next_power_of_two()
        .unwrap_or_else(|| panic!("任务队列容量过大: {}", n))
}
