//! 硬件页表接口
//!
//! 每个进程一张页表，由架构层实现。所有方法都取 `&self`：
//! 页表项的更新需要与驱逐扫描（在其他线程上清除访问位）并发进行，
//! 实现内部自行同步。

use crate::address::{Ppn, Vaddr};

/// 进程页表
pub trait PageTable: Send + Sync {
    /// 建立 `va -> ppn` 映射，页表页分配失败时返回 false
    ///
    /// 已有映射时覆盖；仍指向同一帧时保留访问位和脏位，只改变权限。
    fn map(&self, va: Vaddr, ppn: Ppn, writable: bool) -> bool;

    /// 移除 `va` 的映射；未映射时什么也不做
    fn unmap(&self, va: Vaddr);

    /// 访问位
    fn is_accessed(&self, va: Vaddr) -> bool;

    /// 设置访问位
    fn set_accessed(&self, va: Vaddr, accessed: bool);

    /// 脏位
    fn is_dirty(&self, va: Vaddr) -> bool;

    /// 设置脏位
    fn set_dirty(&self, va: Vaddr, dirty: bool);
}
