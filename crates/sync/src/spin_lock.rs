//! 关中断自旋锁
//!
//! 获取锁之前先关闭本地中断，释放锁之后再恢复，
//! 避免持锁任务被本 CPU 上的中断处理程序抢占后形成自死锁。

use core::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::intr_guard::IntrGuard;

/// 持锁期间关闭本地中断的自旋锁
///
/// 不可重入。临界区应尽量短，不要在持锁时做磁盘 I/O，
/// 那类场景使用 [`SpinMutex`](crate::SpinMutex)。
///
/// ```ignore
/// let lock = SpinLock::new(0);
/// *lock.lock() += 1;
/// ```
#[derive(Debug)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: locked 标志保证同一时刻只有一个持有者访问 data
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// 创建一个未上锁的 SpinLock
    pub const fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// 关中断并自旋直到拿到锁
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let intr = IntrGuard::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        SpinLockGuard { lock: self, _intr: intr }
    }

    /// 只尝试一次；失败时立即恢复中断状态并返回 None
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let intr = IntrGuard::new();
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self, _intr: intr })
    }

    /// 锁当前是否被占用（仅用于调试/测试）
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// 通过独占引用直接访问数据，不需要加锁
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// [`SpinLock`] 的 RAII 保护器
///
/// 字段顺序保证先释放锁标志、再恢复中断。
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _intr: IntrGuard,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: 持有保护器即持有锁
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: 持有保护器即持有锁
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
