//! 中断控制的 Mock 实现

use core::sync::atomic::{AtomicBool, Ordering};

/// 状态字中的中断使能位
const INTR_ENABLE: usize = 0x2;

/// Mock 架构操作，用一个原子布尔值模拟本地中断开关
pub struct MockArchOps {
    /// 当前中断是否开启
    pub interrupt_state: AtomicBool,
}

impl MockArchOps {
    /// 创建一个中断处于开启状态的实例
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
        }
    }

    /// 关中断，返回之前的状态字
    ///
    /// # Safety
    /// 与真实实现保持同样的调用约定
    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        if self.interrupt_state.swap(false, Ordering::SeqCst) {
            INTR_ENABLE
        } else {
            0
        }
    }

    /// 按状态字恢复中断
    ///
    /// # Safety
    /// flags 必须来自 read_and_disable_interrupts
    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state
            .store(flags & INTR_ENABLE != 0, Ordering::SeqCst);
    }

    /// 中断使能位
    pub fn interrupt_enable_bit(&self) -> usize {
        INTR_ENABLE
    }
}

impl Default for MockArchOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
