//! 按需分页的虚拟内存子系统
//!
//! 为每个用户进程维护补充页表，在缺页时按需载入页内容；
//! 物理帧不足时用时钟算法驱逐驻留页，匿名页换出到交换区，
//! 文件映射页写回文件；fork 时以写时复制方式共享匿名页。
//!
//! # 组成
//!
//! - [`VmSystem`]：全局状态（帧表、交换表、文件系统锁），内核初始化时创建一次
//! - [`AddressSpace`]：一个进程的地址空间，缺页处理、mmap、fork 的入口
//! - [`SupplementalPageTable`]：虚拟页到 [`Page`] 的映射
//! - [`FrameTable`]：驻留帧的驱逐链表
//! - [`SwapTable`]：交换区槽位管理
//!
//! # 外部依赖
//!
//! 通过 trait 与内核其他部分解耦：
//! - [`PhysPool`]：用户物理页来源（参考实现 [`UserPool`]）
//! - [`PageTable`]：进程硬件页表
//! - [`SwapDevice`]：交换块设备
//! - [`VmFile`]：可映射文件
//!
//! [`SpinLock`](sync::SpinLock) 依赖 `sync::register_arch_ops`，
//! 使用本 crate 之前必须先完成注册。

#![no_std]

extern crate alloc;

mod bitmap;
mod error;
mod file;
mod mmu;
mod system;

pub mod address;
pub mod config;
pub mod frame;
pub mod page;
pub mod space;
pub mod spt;
pub mod swap;

pub use address::{Ppn, Vaddr};
pub use bitmap::Bitmap;
pub use config::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE, VmConfig};
pub use error::{VmError, VmResult};
pub use file::{FileHandle, FsLock, VmFile};
pub use frame::{FrameTable, FrameTracker, LruToken, PhysPool, UserPool};
pub use mmu::PageTable;
pub use page::{AnonPage, FilePage, LazyLoad, Page, PageKind, PageRef, Pid, UninitPage, VmType};
pub use space::{AddressSpace, FaultFlags, PageFault};
pub use spt::SupplementalPageTable;
pub use swap::{SwapDevice, SwapSlot, SwapTable};
pub use system::VmSystem;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests;
