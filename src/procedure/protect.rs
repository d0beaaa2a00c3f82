//! 任务保护执行
//!
//! 在每个任务外包一层 panic 捕获，记录 panic 位置与调用栈后继续执行，
//! 保证应用代码的异常不会终止主线程

use rat_logger::error;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::task_queue::BoxedTask;

/// panic 现场信息
struct PanicSite {
    location: String,
    backtrace: Backtrace,
}

thread_local! {
    /// 当前线程是否处于保护执行中
    static IN_PROTECTED: Cell<bool> = const { Cell::new(false) };
    /// 保护执行期间捕获的 panic 现场
    static CAPTURED: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// 安装 panic 钩子：保护执行中的 panic 记录调用栈，其余情况交给原钩子
fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_PROTECTED.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                    .unwrap_or_else(|| "<unknown>".to_string());
                CAPTURED.with(|captured| {
                    *captured.borrow_mut() = Some(PanicSite {
                        location,
                        backtrace: Backtrace::force_capture(),
                    });
                });
            } else {
                previous(info);
            }
        }));
    });
}

/// 保护执行任务，返回任务是否正常完成
pub fn protected_execute(func: BoxedTask) -> bool {
    install_panic_hook();

    let was_protected = IN_PROTECTED.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(func));
    IN_PROTECTED.with(|flag| flag.set(was_protected));

    match result {
        Ok(()) => true,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            match CAPTURED.with(|captured| captured.borrow_mut().take()) {
                Some(site) => {
                    error!("任务执行发生 panic: {} 位置: {}\n{}", message, site.location, site.backtrace);
                }
                None => {
                    error!("任务执行发生 panic: {}\n{}", message, Backtrace::force_capture());
                }
            }
            false
        }
    }
}

/// 提取 panic 负载中的文本
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<非文本 panic 负载>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_protected_execute_ok() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        assert!(protected_execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_protected_execute_traps_panic() {
        assert!(!protected_execute(Box::new(|| panic!("boom"))));
        assert!(!protected_execute(Box::new(|| {
            let v: Vec<u8> = Vec::new();
            let _value: u8 = v[3];
        })));
        // 捕获后当前线程恢复为非保护状态，现场已被取走
        assert!(!IN_PROTECTED.with(Cell::get));
        assert!(CAPTURED.with(|c| c.borrow().is_none()));
    }

    #[test]
    fn test_nested_protected_execute() {
        let inner_ok = Arc::new(AtomicUsize::new(0));
        let flag = inner_ok.clone();
        assert!(protected_execute(Box::new(move || {
            if !protected_execute(Box::new(|| panic!("inner"))) {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        })));
        assert_eq!(inner_ok.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "<非文本 panic 负载>");
    }
}
