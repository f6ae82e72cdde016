//! 中断保护器
//!
//! 创建时关闭本地中断，销毁时恢复进入前的状态。
//!
//! 关中断只能挡住本 CPU 上"任务 vs 中断处理"的并发，
//! 挡不住其他 CPU，所以它总是和自旋锁一起使用。

use crate::arch_ops;

/// 中断保护器
///
/// ```ignore
/// {
///     let _guard = IntrGuard::new();
///     // 本地中断已关闭
/// } // 恢复原来的中断状态
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 关闭本地中断并记住之前的状态
    pub fn new() -> Self {
        // SAFETY: flags 只会在 Drop 中原样交还给 restore_interrupts
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入临界区之前中断是否处于启用状态
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().interrupt_enable_bit() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是 new() 中保存的值
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
