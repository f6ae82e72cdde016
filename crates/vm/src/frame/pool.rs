//! 用户物理页池
//!
//! [`PhysPool`] 是虚拟内存核心对物理页来源的全部要求；
//! [`UserPool`] 是基于位图的参考实现，管理内核交给用户进程使用的那一段物理内存。
//!
//! [`FrameTracker`] 是单个物理帧的 RAII 封装：被 drop 时自动归还给来源页池。

use alloc::sync::Arc;
use core::fmt;

use sync::SpinLock;

use crate::{address::Ppn, bitmap::Bitmap, config::PAGE_SIZE};

/// 物理页来源
pub trait PhysPool: Send + Sync {
    /// 分配一个清零的物理帧；页池耗尽时返回 None
    fn alloc_zeroed(&self) -> Option<Ppn>;

    /// 归还一个物理帧
    fn dealloc(&self, ppn: Ppn);

    /// 物理帧在内核直接映射区中的虚拟地址
    fn ppn_to_vaddr(&self, ppn: Ppn) -> usize;
}

/// 位图管理的用户页池
pub struct UserPool {
    start: Ppn,
    base_vaddr: usize,
    bitmap: SpinLock<Bitmap>,
}

impl UserPool {
    /// 用一段连续物理内存创建页池
    ///
    /// # 参数
    /// - `start`: 第一个帧的物理页号
    /// - `base_vaddr`: 第一个帧在内核直接映射区中的虚拟地址
    /// - `frames`: 帧数
    ///
    /// # Safety
    /// `[base_vaddr, base_vaddr + frames * PAGE_SIZE)` 必须是可读写、
    /// 且在页池生命周期内只由页池的使用者访问的内存
    pub unsafe fn new(start: Ppn, base_vaddr: usize, frames: usize) -> Self {
        debug_assert!(base_vaddr % PAGE_SIZE == 0, "UserPool: unaligned base");
        UserPool {
            start,
            base_vaddr,
            bitmap: SpinLock::new(Bitmap::new(frames)),
        }
    }

    /// 总帧数
    pub fn total_frames(&self) -> usize {
        self.bitmap.lock().len()
    }

    /// 已分配帧数
    pub fn allocated_frames(&self) -> usize {
        self.bitmap.lock().used()
    }

    /// 空闲帧数
    pub fn free_frames(&self) -> usize {
        self.bitmap.lock().free()
    }

    /// 页池当前状态
    ///
    /// # 返回值
    /// (总帧数, 已分配帧数, 空闲帧数)
    pub fn get_stats(&self) -> (usize, usize, usize) {
        let bm = self.bitmap.lock();
        (bm.len(), bm.used(), bm.free())
    }

    fn index_of(&self, ppn: Ppn) -> usize {
        ppn.as_usize() - self.start.as_usize()
    }
}

impl PhysPool for UserPool {
    fn alloc_zeroed(&self) -> Option<Ppn> {
        let idx = self.bitmap.lock().alloc()?;
        let ppn = Ppn::from_usize(self.start.as_usize() + idx);
        // SAFETY: 帧在页池管理的区域内，且刚刚分配出来，没有其他使用者
        unsafe { core::ptr::write_bytes(self.ppn_to_vaddr(ppn) as *mut u8, 0, PAGE_SIZE) };
        Some(ppn)
    }

    fn dealloc(&self, ppn: Ppn) {
        let idx = self.index_of(ppn);
        self.bitmap.lock().free_range(idx, 1);
    }

    fn ppn_to_vaddr(&self, ppn: Ppn) -> usize {
        self.base_vaddr + self.index_of(ppn) * PAGE_SIZE
    }
}

/// 物理帧跟踪器
///
/// 持有期间帧归持有者独占（或经 `Arc` 在写时复制的页之间共享），
/// drop 时归还给来源页池。
pub struct FrameTracker {
    ppn: Ppn,
    pool: Arc<dyn PhysPool>,
}

impl FrameTracker {
    pub(crate) fn new(ppn: Ppn, pool: Arc<dyn PhysPool>) -> Self {
        FrameTracker { ppn, pool }
    }

    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }

    fn as_ptr(&self) -> *mut u8 {
        self.pool.ppn_to_vaddr(self.ppn) as *mut u8
    }

    /// 帧内容
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: 帧在持有期间一直有效，长度为一页
        unsafe { core::slice::from_raw_parts(self.as_ptr(), PAGE_SIZE) }
    }

    /// 可写的帧内容
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: &mut self 保证独占
        unsafe { core::slice::from_raw_parts_mut(self.as_ptr(), PAGE_SIZE) }
    }

    /// 清零整个帧
    pub fn zero(&mut self) {
        self.as_bytes_mut().fill(0);
    }

    /// 以用户访存的方式写入帧内容
    ///
    /// # Safety
    /// 与用户态经 MMU 的写入一样，不受 Rust 别名规则约束：
    /// 调用者必须保证写入期间没有其他对这段字节的引用
    pub(crate) unsafe fn write_user(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= PAGE_SIZE);
        // SAFETY: 范围在帧内，别名由调用者保证
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len()) };
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        self.pool.dealloc(self.ppn);
    }
}

impl fmt::Debug for FrameTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FrameTracker").field(&self.ppn).finish()
    }
}
