//! 虚拟内存子系统的全局状态
//!
//! 帧表、交换表和文件系统锁在内核初始化时创建一次，
//! 之后以 [`VmSystem`] 句柄的形式交给每个地址空间。

use alloc::sync::Arc;

use crate::{
    config::VmConfig,
    file::FsLock,
    frame::{FrameTable, PhysPool},
    page::Backing,
    swap::{SwapDevice, SwapTable},
};

/// 虚拟内存子系统句柄，克隆开销只是几次引用计数
#[derive(Clone)]
pub struct VmSystem {
    config: VmConfig,
    frames: Arc<FrameTable>,
    swap: Arc<SwapTable>,
    fs_lock: Arc<FsLock>,
}

impl VmSystem {
    /// 初始化虚拟内存子系统
    ///
    /// # 参数
    /// - `config`: 地址空间布局
    /// - `pool`: 用户物理页池
    /// - `swap_device`: 交换设备，整个设备都用作交换区
    /// - `fs_lock`: 与系统调用层共享的文件系统锁
    pub fn new(
        config: VmConfig,
        pool: Arc<dyn PhysPool>,
        swap_device: Arc<dyn SwapDevice>,
        fs_lock: Arc<FsLock>,
    ) -> Self {
        let swap = SwapTable::new(swap_device);
        let frames = FrameTable::new(pool, Arc::clone(&swap), Arc::clone(&fs_lock));
        log::debug!(
            "vm: initialized, {} swap slots, stack top {:#x}",
            swap.total_slots(),
            config.user_stack_top
        );
        VmSystem {
            config,
            frames,
            swap,
            fs_lock,
        }
    }

    /// 地址空间布局
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 全局帧表
    pub fn frames(&self) -> &Arc<FrameTable> {
        &self.frames
    }

    /// 交换表
    pub fn swap(&self) -> &Arc<SwapTable> {
        &self.swap
    }

    /// 文件系统锁
    pub fn fs_lock(&self) -> &Arc<FsLock> {
        &self.fs_lock
    }

    pub(crate) fn backing(&self) -> Backing<'_> {
        Backing {
            swap: &self.swap,
            fs_lock: &self.fs_lock,
        }
    }
}
