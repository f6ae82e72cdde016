//! 进程地址空间
//!
//! [`AddressSpace`] 把一个进程的补充页表、硬件页表、mmap 页列表和
//! 用户栈指针组织在一起，提供虚拟内存子系统对进程的全部操作：
//!
//! - 页的登记与认领：[`AddressSpace::alloc_anon`]、
//!   [`AddressSpace::alloc_page_with_initializer`]、[`AddressSpace::claim_page`]
//! - 缺页处理与栈增长：见 `fault` 子模块
//! - 文件映射：见 `mmap` 子模块
//! - fork 与进程退出：[`AddressSpace::fork`]、[`AddressSpace::kill`]
//! - 用户内存读写：[`AddressSpace::write_bytes_at`]、[`AddressSpace::read_bytes_at`]

mod fault;
mod mmap;

pub use fault::{FaultFlags, PageFault};

use alloc::{collections::BTreeSet, sync::Arc};

use crate::{
    address::Vaddr,
    config::PAGE_SIZE,
    error::{VmError, VmResult},
    mmu::PageTable,
    page::{Page, PageKind, PageRef, Pid, UninitPage},
    spt::SupplementalPageTable,
    system::VmSystem,
};

/// 进程地址空间
pub struct AddressSpace {
    pid: Pid,
    vm: VmSystem,
    mmu: Arc<dyn PageTable>,
    spt: SupplementalPageTable,
    /// 已经载入过的文件映射页
    mmap_pages: BTreeSet<Vaddr>,
    /// 进入内核时保存的用户栈指针
    user_rsp: usize,
}

impl AddressSpace {
    /// 创建空地址空间
    pub fn new(vm: &VmSystem, pid: Pid, mmu: Arc<dyn PageTable>) -> Self {
        AddressSpace {
            pid,
            vm: vm.clone(),
            mmu,
            spt: SupplementalPageTable::new(),
            mmap_pages: BTreeSet::new(),
            user_rsp: vm.config().user_stack_top,
        }
    }

    /// 进程标识
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 补充页表
    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// 硬件页表
    pub fn mmu(&self) -> &Arc<dyn PageTable> {
        &self.mmu
    }

    /// 子系统句柄
    pub fn vm(&self) -> &VmSystem {
        &self.vm
    }

    /// 记录陷入内核时的用户栈指针
    pub fn set_user_rsp(&mut self, rsp: usize) {
        self.user_rsp = rsp;
    }

    /// 最近一次记录的用户栈指针
    pub fn user_rsp(&self) -> usize {
        self.user_rsp
    }

    /// 已载入过的文件映射页，按地址排序
    pub fn mmap_pages(&self) -> impl Iterator<Item = Vaddr> + '_ {
        self.mmap_pages.iter().copied()
    }

    /// 查找包含 `va` 的页
    pub fn find_page(&self, va: Vaddr) -> Option<PageRef> {
        self.spt.find(va)
    }

    /// 登记一个首次访问时清零的匿名页
    pub fn alloc_anon(&mut self, va: Vaddr, writable: bool) -> VmResult<()> {
        let init = UninitPage::Anon {
            owner: self.pid,
            load: None,
        };
        self.alloc_page_with_initializer(va, writable, init)
    }

    /// 登记一个延迟初始化的页
    pub fn alloc_page_with_initializer(
        &mut self,
        va: Vaddr,
        writable: bool,
        init: UninitPage,
    ) -> VmResult<()> {
        if !va.is_page_aligned() || self.vm.config().is_kernel_vaddr(va.as_usize()) {
            return Err(VmError::InvalidAddress);
        }
        if let UninitPage::Anon { load: Some(l), .. } = &init {
            if !l.fits_page() {
                return Err(VmError::InvalidAddress);
            }
        }
        self.spt
            .insert(Page::new(va, writable, PageKind::Uninit(init)))
            .map(|_| ())
    }

    /// 认领包含 `va` 的页：分配帧、填充内容、建立映射
    pub fn claim_page(&mut self, va: Vaddr) -> VmResult<()> {
        let page = self.spt.find(va).ok_or(VmError::NotMapped)?;
        self.do_claim(&page)
    }

    fn do_claim(&mut self, page_ref: &PageRef) -> VmResult<()> {
        let mut page = page_ref.lock();
        let va = page.va();
        let writable = page.writable() && !page.copy_writable();

        if let Some(ppn) = page.ppn() {
            // 已驻留：只刷新映射权限
            if !self.mmu.map(va, ppn, writable) {
                return Err(VmError::OutOfMemory);
            }
            page.set_mapped_writable(writable);
            return Ok(());
        }

        let mut frame = self.vm.frames().acquire()?;
        if let Err(err) = page.swap_in(&mut frame, &self.vm.backing()) {
            log::warn!("vm: pid {} failed to load {:?}: {}", self.pid, va, err);
            drop(page);
            drop(frame);
            self.spt.remove(va, self.vm.frames(), &*self.mmu);
            return Err(err);
        }

        if !self.mmu.map(va, frame.ppn(), writable) {
            return Err(VmError::OutOfMemory);
        }
        if page.file_page().is_some() {
            self.mmu.set_dirty(va, false);
            self.mmap_pages.insert(va);
        }
        let token = self.vm.frames().register(frame.ppn(), va, page_ref, &self.mmu);
        log::debug!("vm: pid {} claimed {:?} -> {:?}", self.pid, va, frame.ppn());
        page.attach(Arc::new(frame), token, writable);
        Ok(())
    }

    /// 删除并销毁包含 `va` 的页
    pub fn remove_page(&mut self, va: Vaddr) -> bool {
        self.mmap_pages.remove(&va.page_floor());
        self.spt.remove(va, self.vm.frames(), &*self.mmu)
    }

    /// fork：为子进程构造地址空间
    ///
    /// 失败时已经复制的部分随子地址空间一起销毁。
    pub fn fork(&mut self, child_pid: Pid, child_mmu: Arc<dyn PageTable>) -> VmResult<AddressSpace> {
        let mut child = AddressSpace::new(&self.vm, child_pid, child_mmu);
        child.user_rsp = self.user_rsp;
        child
            .spt
            .copy(&self.spt, &self.vm, &self.mmu, &child.mmu, child_pid)?;
        log::debug!(
            "vm: pid {} forked {} ({} pages)",
            self.pid,
            child_pid,
            child.spt.len()
        );
        Ok(child)
    }

    /// 进程退出：写回所有驻留的脏文件映射页，然后销毁全部页
    pub fn kill(&mut self) {
        for (va, page_ref) in self.spt.iter() {
            let page = page_ref.lock();
            let (Some(file), Some(frame)) = (page.file_page(), page.frame()) else {
                continue;
            };
            if let Err(err) = file.write_back_if_dirty(va, frame, &*self.mmu, self.vm.fs_lock()) {
                log::error!("vm: pid {} lost write-back of {:?}: {}", self.pid, va, err);
            }
        }
        self.mmap_pages.clear();
        self.spt.kill(self.vm.frames(), &*self.mmu);
    }

    /// 以用户访存的方式把 `data` 写到 `addr`
    ///
    /// 逐页解决缺页（包括写时复制和栈增长），并像硬件一样置上访问位和脏位。
    pub fn write_bytes_at(&mut self, addr: usize, data: &[u8]) -> VmResult<()> {
        addr.checked_add(data.len()).ok_or(VmError::InvalidAccess)?;
        let mut done = 0;
        while done < data.len() {
            let va = Vaddr::from_usize(addr + done);
            let off = va.page_offset();
            let chunk = &data[done..done + (PAGE_SIZE - off).min(data.len() - done)];
            self.with_user_page(va, true, |page| {
                if let Some(frame) = page.frame() {
                    // SAFETY: 内核此时没有持有该帧内容的引用，等价于一次用户态写入
                    unsafe { frame.write_user(off, chunk) };
                }
            })?;
            self.mmu.set_accessed(va.page_floor(), true);
            self.mmu.set_dirty(va.page_floor(), true);
            done += chunk.len();
        }
        Ok(())
    }

    /// 以用户访存的方式从 `addr` 读取 `buf.len()` 字节
    pub fn read_bytes_at(&mut self, addr: usize, buf: &mut [u8]) -> VmResult<()> {
        addr.checked_add(buf.len()).ok_or(VmError::InvalidAccess)?;
        let mut done = 0;
        while done < buf.len() {
            let va = Vaddr::from_usize(addr + done);
            let off = va.page_offset();
            let len = (PAGE_SIZE - off).min(buf.len() - done);
            let dst = &mut buf[done..done + len];
            self.with_user_page(va, false, |page| {
                if let Some(frame) = page.frame() {
                    dst.copy_from_slice(&frame.as_bytes()[off..off + len]);
                }
            })?;
            self.mmu.set_accessed(va.page_floor(), true);
            done += len;
        }
        Ok(())
    }

    /// 在页驻留且可按 `write` 访问的状态下执行 `f`
    ///
    /// 缺页解决后、加锁前页可能又被其他线程驱逐，此时重新解决。
    fn with_user_page<R>(
        &mut self,
        va: Vaddr,
        write: bool,
        f: impl FnOnce(&Page) -> R,
    ) -> VmResult<R> {
        loop {
            let page_ref = self.resolve_user_page(va, write)?;
            let page = page_ref.lock();
            if page.is_resident() && (!write || page.is_mapped_writable()) {
                return Ok(f(&page));
            }
        }
    }

    /// 硬件访问会触发缺页的情况，先走一遍缺页处理
    fn resolve_user_page(&mut self, va: Vaddr, write: bool) -> VmResult<PageRef> {
        let fault = match self.spt.find(va) {
            None => Some(true),
            Some(page_ref) => {
                let page = page_ref.lock();
                if !page.is_resident() {
                    Some(true)
                } else if write && !page.is_mapped_writable() {
                    Some(false)
                } else {
                    None
                }
            }
        };
        if let Some(not_present) = fault {
            self.handle_fault(va.as_usize(), true, write, not_present)?;
        }
        self.spt.find(va).ok_or(VmError::InvalidAccess)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.kill();
    }
}
