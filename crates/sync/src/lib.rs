//! 同步原语
//!
//! 为虚拟内存子系统提供两类锁：
//!
//! - [`SpinLock`]：持锁期间关闭本地中断，只适合极短的临界区
//!   （帧链表、位图这类纯内存操作）
//! - [`SpinMutex`]：基于 `lock_api` 的普通自旋互斥锁，不触碰中断状态，
//!   临界区内允许发生磁盘 I/O（页锁、文件系统锁、驱逐串行锁）
//!
//! # 架构依赖
//!
//! [`SpinLock`] 通过 [`ArchOps`] 开关中断。
//! 使用前必须调用 [`register_arch_ops`] 注册实现；[`SpinMutex`] 没有这个要求。

#![no_std]

mod intr_guard;
mod mutex;
mod spin_lock;

pub use intr_guard::IntrGuard;
pub use mutex::{RawSpinMutex, SpinMutex, SpinMutexGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关的中断控制操作
///
/// 由内核在启动早期实现并注册。
pub trait ArchOps: Send + Sync {
    /// 读取并禁用本地中断，返回之前的状态字
    ///
    /// # Safety
    /// 返回值必须原样交还给 [`ArchOps::restore_interrupts`]
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 状态字中表示"中断已启用"的位
    fn interrupt_enable_bit(&self) -> usize;
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在任何 [`SpinLock`] 被使用之前调用；重复注册时后一次覆盖前一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 是否已经注册过架构操作
pub fn arch_ops_registered() -> bool {
    ARCH_OPS_DATA.load(Ordering::Acquire) != 0
}

#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 来自 register_arch_ops 保存的 &'static 引用
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
extern crate test_support;

#[cfg(test)]
impl ArchOps for test_support::mock::arch::MockArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        // SAFETY: 转发给 mock 实现
        unsafe { test_support::mock::arch::MockArchOps::read_and_disable_interrupts(self) }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        // SAFETY: 转发给 mock 实现
        unsafe { test_support::mock::arch::MockArchOps::restore_interrupts(self, flags) }
    }

    fn interrupt_enable_bit(&self) -> usize {
        test_support::mock::arch::MockArchOps::interrupt_enable_bit(self)
    }
}

#[cfg(test)]
pub(crate) fn init_test_arch_ops() {
    if !arch_ops_registered() {
        // SAFETY: MOCK_ARCH_OPS 是 'static 的；并发重复注册写入的是同一个值
        unsafe { register_arch_ops(&test_support::mock::arch::MOCK_ARCH_OPS) };
    }
}
