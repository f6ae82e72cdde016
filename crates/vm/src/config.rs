//! 虚拟内存布局配置

/// 页大小
pub const PAGE_SIZE: usize = 4096;

/// 交换设备扇区大小
pub const SECTOR_SIZE: usize = 512;

/// 一个页在交换区中占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 虚拟内存布局常量
///
/// 由内核在初始化 [`VmSystem`](crate::VmSystem) 时注入，
/// 默认值对应 x86-64 教学内核的布局。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 用户栈顶（不包含）
    pub user_stack_top: usize,
    /// 用户栈允许增长到的最大尺寸
    pub max_stack_size: usize,
    /// 内核地址空间起始地址，此地址及以上都属于内核
    pub kernel_base: usize,
}

impl VmConfig {
    /// 默认布局
    pub const fn new() -> Self {
        Self {
            user_stack_top: 0x4748_0000,
            max_stack_size: 1 << 20,
            kernel_base: 0x80_0400_0000,
        }
    }

    /// 地址是否落在内核地址空间
    pub const fn is_kernel_vaddr(&self, addr: usize) -> bool {
        addr >= self.kernel_base
    }

    /// 栈能增长到的最低地址
    pub const fn stack_limit(&self) -> usize {
        self.user_stack_top - self.max_stack_size
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
