//! 文件映射
//!
//! mmap 只登记延迟加载的文件页，首次访问时才读文件；
//! munmap 把被修改过的驻留页写回文件后销毁整个映射。

use alloc::sync::Arc;

use crate::{
    address::Vaddr,
    config::PAGE_SIZE,
    error::{VmError, VmResult},
    file::FileHandle,
    page::{FilePage, UninitPage},
};

use super::AddressSpace;

impl AddressSpace {
    /// 把 `file` 从 `offset` 开始的 `length` 字节映射到 `addr`
    ///
    /// # 参数
    /// - `addr`: 映射起始地址，必须页对齐且非零
    /// - `length`: 映射长度，最后一页不足的部分清零
    /// - `writable`: 是否可写
    /// - `file`: 调用者打开的文件，映射持有它的一次重新打开
    /// - `offset`: 文件偏移，必须页对齐
    ///
    /// # 返回
    /// 映射起始地址
    pub fn mmap(
        &mut self,
        addr: usize,
        length: usize,
        writable: bool,
        file: &FileHandle,
        offset: usize,
    ) -> VmResult<Vaddr> {
        let start = Vaddr::from_usize(addr);
        if addr == 0 || !start.is_page_aligned() || length == 0 || offset % PAGE_SIZE != 0 {
            return Err(VmError::InvalidAddress);
        }
        let end = addr.checked_add(length).ok_or(VmError::InvalidAddress)?;
        offset.checked_add(length).ok_or(VmError::InvalidAddress)?;
        if self.vm.config().is_kernel_vaddr(end - 1) {
            return Err(VmError::InvalidAddress);
        }

        let pages = length.div_ceil(PAGE_SIZE);
        if (0..pages).any(|i| self.spt.find(start.add_pages(i)).is_some()) {
            return Err(VmError::DuplicateMapping);
        }

        let file = file.reopen().ok_or(VmError::StorageFailure)?;
        // 文件末尾之后的部分只清零不读取
        let mut remaining = length.min(file.length().saturating_sub(offset));

        for i in 0..pages {
            let read_bytes = remaining.min(PAGE_SIZE);
            let page = FilePage::new(
                Arc::clone(&file),
                start,
                length,
                offset + i * PAGE_SIZE,
                read_bytes,
            );
            if let Err(err) = self.alloc_page_with_initializer(
                start.add_pages(i),
                writable,
                UninitPage::File(page),
            ) {
                for j in 0..i {
                    self.remove_page(start.add_pages(j));
                }
                return Err(err);
            }
            remaining -= read_bytes;
        }

        log::debug!(
            "vm: pid {} mmap {:?} len {:#x} offset {:#x}",
            self.pid,
            start,
            length,
            offset
        );
        Ok(start)
    }

    /// 解除从 `addr` 开始的映射
    ///
    /// 被修改过的驻留页先写回文件；写回失败不会中断解除过程，
    /// 第一个错误在全部页销毁后返回。
    pub fn munmap(&mut self, addr: usize) -> VmResult<()> {
        let start = Vaddr::from_usize(addr);
        let (file, length) = {
            let page_ref = self.spt.find(start).ok_or(VmError::NotMapped)?;
            let page = page_ref.lock();
            let mapping = page.file_page().ok_or(VmError::NotMapped)?;
            if mapping.start() != start {
                return Err(VmError::InvalidAddress);
            }
            (Arc::clone(mapping.file()), mapping.length())
        };

        let mut result = Ok(());
        for i in 0..length.div_ceil(PAGE_SIZE) {
            let va = start.add_pages(i);
            let Some(page_ref) = self.spt.find(va) else {
                continue;
            };
            {
                let page = page_ref.lock();
                let Some(mapping) = page.file_page() else {
                    continue;
                };
                if !Arc::ptr_eq(mapping.file(), &file) {
                    continue;
                }
                if let Some(frame) = page.frame() {
                    let written =
                        mapping.write_back_if_dirty(va, frame, &*self.mmu, self.vm.fs_lock());
                    if let Err(err) = written {
                        log::error!("vm: pid {} munmap write-back of {:?}: {}", self.pid, va, err);
                        result = result.and(Err(err));
                    }
                }
            }
            drop(page_ref);
            self.remove_page(va);
        }

        log::debug!("vm: pid {} munmap {:?} len {:#x}", self.pid, start, length);
        // 最后一个引用：关闭 mmap 时重新打开的文件
        drop(file);
        result
    }
}
