//! 物理内存的 Mock 实现
//!
//! 在宿主机堆上申请一段按页对齐、清零的内存，充当内核直接映射区里的用户页池。

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

/// Mock 页大小，与被测内核保持一致
pub const MOCK_PAGE_SIZE: usize = 4096;

/// 一段按页对齐的"物理内存"
///
/// Drop 时归还给宿主机堆，使用者必须保证此前所有帧都已不再被访问。
pub struct MockPhysMemory {
    base: *mut u8,
    layout: Layout,
    pages: usize,
}

// SAFETY: 只是一段普通堆内存，访问同步由使用者负责
unsafe impl Send for MockPhysMemory {}
unsafe impl Sync for MockPhysMemory {}

impl MockPhysMemory {
    /// 申请 `pages` 个页
    pub fn new(pages: usize) -> Self {
        assert!(pages > 0, "MockPhysMemory: empty region");
        let layout = Layout::from_size_align(pages * MOCK_PAGE_SIZE, MOCK_PAGE_SIZE)
            .expect("MockPhysMemory: bad layout");
        // SAFETY: layout 大小非零
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }
        Self {
            base,
            layout,
            pages,
        }
    }

    /// 区域起始地址
    pub fn base(&self) -> usize {
        self.base as usize
    }

    /// 区域包含的页数
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// 区域起始地址对应的页号
    pub fn start_ppn(&self) -> usize {
        self.base() / MOCK_PAGE_SIZE
    }
}

impl Drop for MockPhysMemory {
    fn drop(&mut self) {
        // SAFETY: base/layout 与 new() 中的分配一致
        unsafe { dealloc(self.base, self.layout) };
    }
}
