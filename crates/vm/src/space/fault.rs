//! 缺页处理
//!
//! 处理顺序：
//!
//! 1. 用户态访问内核地址：失败
//! 2. 页存在、写访问、页在内存中且处于写时复制：复制出私有帧
//! 3. 页不存在：在栈增长范围内则扩展栈，否则失败
//! 4. 写只读页：失败
//! 5. 其余情况：认领该页

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::{
    address::Vaddr,
    config::PAGE_SIZE,
    error::{VmError, VmResult},
    page::PageRef,
};

use super::AddressSpace;

bitflags! {
    /// x86-64 缺页错误码
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultFlags: u64 {
        /// 0：页不存在；1：页存在但权限不足
        const PRESENT = 1 << 0;
        /// 写访问
        const WRITE = 1 << 1;
        /// 用户态访问
        const USER = 1 << 2;
    }
}

/// 一次缺页
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    /// 出错地址（CR2）
    pub addr: usize,
    /// 错误码
    pub flags: FaultFlags,
}

impl PageFault {
    /// 由出错地址和硬件错误码构造
    pub fn new(addr: usize, error_code: u64) -> Self {
        PageFault {
            addr,
            flags: FaultFlags::from_bits_truncate(error_code),
        }
    }

    /// 是否为写访问
    pub fn is_write(&self) -> bool {
        self.flags.contains(FaultFlags::WRITE)
    }

    /// 是否来自用户态
    pub fn is_user(&self) -> bool {
        self.flags.contains(FaultFlags::USER)
    }

    /// 是否因为页不存在
    pub fn is_not_present(&self) -> bool {
        !self.flags.contains(FaultFlags::PRESENT)
    }
}

impl AddressSpace {
    /// 处理一次已解码的缺页
    pub fn try_handle_fault(&mut self, fault: &PageFault) -> VmResult<()> {
        self.handle_fault(
            fault.addr,
            fault.is_user(),
            fault.is_write(),
            fault.is_not_present(),
        )
    }

    /// 处理缺页
    ///
    /// # 参数
    /// - `addr`: 出错地址
    /// - `user`: 是否来自用户态
    /// - `write`: 是否为写访问
    /// - `not_present`: 是否因为页不存在（否则是权限错误）
    ///
    /// # 返回
    /// 成功时出错指令可以重新执行；失败时调用者应终止进程
    pub fn handle_fault(
        &mut self,
        addr: usize,
        user: bool,
        write: bool,
        not_present: bool,
    ) -> VmResult<()> {
        if user && self.vm.config().is_kernel_vaddr(addr) {
            log::warn!("vm: pid {} touched kernel address {:#x}", self.pid, addr);
            return Err(VmError::InvalidAccess);
        }

        let va = Vaddr::from_usize(addr);
        let Some(page) = self.spt.find(va) else {
            if self.in_stack_envelope(addr) {
                return self.grow_stack(va);
            }
            log::warn!("vm: pid {} faulted on unmapped {:#x}", self.pid, addr);
            return Err(VmError::InvalidAccess);
        };

        // 可写页被只读映射：写时复制或恢复可写
        let write_protected = write && !not_present && {
            let p = page.lock();
            p.writable() && !p.is_mapped_writable()
        };
        if write_protected {
            return self.resolve_cow(&page);
        }

        if write && !page.lock().writable() {
            log::warn!("vm: pid {} wrote read-only {:#x}", self.pid, addr);
            return Err(VmError::InvalidAccess);
        }

        self.do_claim(&page)
    }

    /// 是否可以通过扩展栈来解决
    ///
    /// 地址不低于当前栈指针下方一页，并且栈的总尺寸不超过上限。
    fn in_stack_envelope(&self, addr: usize) -> bool {
        let config = self.vm.config();
        let floor = Vaddr::from_usize(addr).page_floor().as_usize();
        addr < config.user_stack_top
            && floor >= config.stack_limit()
            && addr >= self.user_rsp.saturating_sub(PAGE_SIZE)
    }

    /// 从出错页开始向上逐页登记并认领匿名页，直到遇到已有的页或栈顶
    fn grow_stack(&mut self, va: Vaddr) -> VmResult<()> {
        let top = self.vm.config().user_stack_top;
        let mut cur = va.page_floor();
        let mut grown = 0;
        while cur.as_usize() < top && self.spt.find(cur).is_none() {
            self.alloc_anon(cur, true)?;
            self.claim_page(cur)?;
            cur = cur.add_pages(1);
            grown += 1;
        }
        log::debug!(
            "vm: pid {} stack grew by {} pages down to {:?}",
            self.pid,
            grown,
            va.page_floor()
        );
        Ok(())
    }

    /// 写时复制
    ///
    /// 帧仍被共享时复制到新帧；只剩本页持有时直接恢复可写映射。
    /// 新映射建立之前页保持原状，失败时可以重试。
    fn resolve_cow(&mut self, page_ref: &PageRef) -> VmResult<()> {
        let mut page = page_ref.lock();
        let va = page.va();
        if !page.is_resident() {
            drop(page);
            return self.do_claim(page_ref);
        }

        if page.is_frame_shared() {
            match self.vm.frames().acquire() {
                Ok(mut private) => {
                    if let Some(shared) = page.frame() {
                        private.as_bytes_mut().copy_from_slice(shared.as_bytes());
                    }
                    if !self.mmu.map(va, private.ppn(), true) {
                        return Err(VmError::OutOfMemory);
                    }
                    drop(page.detach());
                    let token = self.vm.frames().register(private.ppn(), va, page_ref, &self.mmu);
                    page.attach(Arc::new(private), token, true);
                    log::debug!("vm: pid {} copied {:?} on write", self.pid, va);
                    return Ok(());
                }
                Err(err) if page.is_frame_shared() => return Err(err),
                // 申请帧时其余共享者都被驱逐了
                Err(_) => {}
            }
        }

        let ppn = page.ppn().ok_or(VmError::NotMapped)?;
        if !self.mmu.map(va, ppn, true) {
            return Err(VmError::OutOfMemory);
        }
        page.set_mapped_writable(true);
        Ok(())
    }
}
