//! 地址类型
//!
//! - [`Vaddr`]：用户虚拟地址
//! - [`Ppn`]：物理页号

use core::fmt;

use crate::config::PAGE_SIZE;

/// 用户虚拟地址
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vaddr(usize);

impl Vaddr {
    /// 从 usize 构造
    pub const fn from_usize(addr: usize) -> Self {
        Vaddr(addr)
    }

    /// 转为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 向下取整到页边界
    pub const fn page_floor(self) -> Self {
        Vaddr(self.0 & !(PAGE_SIZE - 1))
    }

    /// 页内偏移
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// 是否页对齐
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// 向后偏移 `pages` 个页，溢出时返回 None
    pub const fn checked_add_pages(self, pages: usize) -> Option<Self> {
        match pages.checked_mul(PAGE_SIZE) {
            Some(bytes) => match self.0.checked_add(bytes) {
                Some(addr) => Some(Vaddr(addr)),
                None => None,
            },
            None => None,
        }
    }

    /// 向后偏移 `pages` 个页
    ///
    /// 调用者保证不会溢出
    pub const fn add_pages(self, pages: usize) -> Self {
        Vaddr(self.0 + pages * PAGE_SIZE)
    }
}

impl fmt::Debug for Vaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vaddr({:#x})", self.0)
    }
}

impl From<usize> for Vaddr {
    fn from(addr: usize) -> Self {
        Vaddr(addr)
    }
}

/// 物理页号
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ppn(usize);

impl Ppn {
    /// 从 usize 构造
    pub const fn from_usize(ppn: usize) -> Self {
        Ppn(ppn)
    }

    /// 转为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Ppn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ppn({:#x})", self.0)
    }
}
