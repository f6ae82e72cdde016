//! 不关中断的自旋互斥锁
//!
//! 在 `lock_api` 之上实现，得到完整的 `Mutex`/`MutexGuard` 接口
//! （`try_lock`、`get_mut`、`into_inner`、`MutexGuard::map` 等）。
//! 持锁期间中断保持原样，所以临界区里可以等待磁盘。

use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 自旋实现的原始互斥锁
#[derive(Debug)]
pub struct RawSpinMutex {
    locked: AtomicBool,
}

// SAFETY: Acquire/Release 配对保证临界区之间的 happens-before 关系
unsafe impl lock_api::RawMutex for RawSpinMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinMutex {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 不关中断的自旋互斥锁
pub type SpinMutex<T> = lock_api::Mutex<RawSpinMutex, T>;

/// [`SpinMutex`] 的 RAII 保护器
pub type SpinMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinMutex, T>;
