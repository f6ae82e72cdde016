//! 补充页表
//!
//! 以页对齐的用户虚拟地址为键，记录进程每个已登记页的完整信息。
//! 硬件页表只知道"当前映射到哪个帧"，缺页时需要的其余信息都在这里。
//!
//! 只有所属进程自己（缺页处理、系统调用）和 fork 时的父进程会访问它；
//! 驱逐线程通过帧表里的 `Weak` 直接找到页，不经过补充页表。

use alloc::{collections::BTreeMap, sync::Arc};

use sync::SpinMutex;

use crate::{
    address::Vaddr,
    error::{VmError, VmResult},
    frame::FrameTable,
    mmu::PageTable,
    page::{AnonPage, Page, PageKind, PageRef, Pid, UninitPage},
    system::VmSystem,
};

/// 补充页表
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Vaddr, PageRef>,
}

impl SupplementalPageTable {
    /// 创建空表
    pub fn new() -> Self {
        SupplementalPageTable {
            pages: BTreeMap::new(),
        }
    }

    /// 查找包含 `va` 的页
    ///
    /// 同一个页的多次查找返回指向同一对象的引用。
    pub fn find(&self, va: Vaddr) -> Option<PageRef> {
        self.pages.get(&va.page_floor()).cloned()
    }

    /// 登记新页；该地址已有页时返回 [`VmError::DuplicateMapping`]
    pub fn insert(&mut self, page: Page) -> VmResult<PageRef> {
        let va = page.va();
        if self.pages.contains_key(&va) {
            return Err(VmError::DuplicateMapping);
        }
        let page = Arc::new(SpinMutex::new(page));
        self.pages.insert(va, Arc::clone(&page));
        Ok(page)
    }

    /// 删除并销毁包含 `va` 的页，驻留时同时解除硬件映射
    ///
    /// 调用者不应再持有该页的其他引用，否则销毁推迟到最后一个引用释放时。
    pub fn remove(&mut self, va: Vaddr, frames: &FrameTable, mmu: &dyn PageTable) -> bool {
        let _serial = frames.serialize();
        let va = va.page_floor();
        let Some(page) = self.pages.remove(&va) else {
            return false;
        };
        if page.lock().is_resident() {
            mmu.unmap(va);
        }
        drop(page);
        true
    }

    /// 销毁所有页
    ///
    /// 与驱逐互斥：销毁期间不会有驱逐线程同时操作这些页的帧。
    pub fn kill(&mut self, frames: &FrameTable, mmu: &dyn PageTable) {
        let _serial = frames.serialize();
        for (va, page) in core::mem::take(&mut self.pages) {
            if page.lock().is_resident() {
                mmu.unmap(va);
            }
            drop(page);
        }
    }

    /// fork 时把 `src` 复制到本表（子进程）
    ///
    /// - 未初始化的匿名页：复制延迟加载描述（连同文件句柄）
    /// - 驻留的匿名页：与父进程共享同一个帧，可写页双方都改为只读映射
    /// - 已换出的匿名页：从交换区读入一个新帧，成为子进程私有页
    /// - 文件映射页：不被子进程继承
    pub fn copy(
        &mut self,
        src: &SupplementalPageTable,
        vm: &VmSystem,
        src_mmu: &Arc<dyn PageTable>,
        dst_mmu: &Arc<dyn PageTable>,
        child: Pid,
    ) -> VmResult<()> {
        for (&va, page_ref) in &src.pages {
            let mut parent = page_ref.lock();
            let writable = parent.writable();
            if parent.file_page().is_some() {
                continue;
            }
            if let PageKind::Uninit(UninitPage::Anon { load, .. }) = parent.kind() {
                let load = load
                    .as_ref()
                    .map(|l| l.duplicate().ok_or(VmError::StorageFailure))
                    .transpose()?;
                let init = UninitPage::Anon { owner: child, load };
                self.insert(Page::new(va, writable, PageKind::Uninit(init)))?;
                continue;
            }

            let shared = parent.frame().cloned();
            match shared {
                Some(frame) => {
                    let ppn = frame.ppn();
                    if writable {
                        if !src_mmu.map(va, ppn, false) {
                            return Err(VmError::OutOfMemory);
                        }
                        parent.set_mapped_writable(false);
                    }
                    drop(parent);

                    let child_ref =
                        self.insert(Page::new(va, writable, PageKind::Anon(AnonPage::new(child))))?;
                    let mut page = child_ref.lock();
                    if !dst_mmu.map(va, ppn, false) {
                        return Err(VmError::OutOfMemory);
                    }
                    let token = vm.frames().register(ppn, va, &child_ref, dst_mmu);
                    page.attach(frame, token, false);
                }
                None => {
                    let mut frame = vm.frames().acquire()?;
                    if let Some(anon) = parent.anon() {
                        anon.swap_in(&mut frame, vm.swap())?;
                    }
                    drop(parent);

                    let child_ref =
                        self.insert(Page::new(va, writable, PageKind::Anon(AnonPage::new(child))))?;
                    let mut page = child_ref.lock();
                    if !dst_mmu.map(va, frame.ppn(), writable) {
                        return Err(VmError::OutOfMemory);
                    }
                    let token = vm.frames().register(frame.ppn(), va, &child_ref, dst_mmu);
                    page.attach(Arc::new(frame), token, writable);
                }
            }
        }
        Ok(())
    }

    /// 已登记的页数
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// 是否没有任何页
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 按地址顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (Vaddr, &PageRef)> {
        self.pages.iter().map(|(&va, page)| (va, page))
    }
}
