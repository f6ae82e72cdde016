//! 匿名页
//!
//! 没有后备文件的页，首次访问时清零。被驱逐时写入交换区，
//! 槽位在第一次换出时预留，此后一直复用，直到页被销毁。

use alloc::sync::Arc;

use crate::{
    error::{VmError, VmResult},
    frame::FrameTracker,
    swap::{SwapSlot, SwapTable},
};

/// 进程标识，仅用于诊断输出
pub type Pid = usize;

/// 匿名页
#[derive(Debug)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
    owner: Pid,
}

impl AnonPage {
    pub(crate) fn new(owner: Pid) -> Self {
        AnonPage { slot: None, owner }
    }

    /// 所属进程
    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// 交换槽下标；从未换出过时为 None
    pub fn swap_slot(&self) -> Option<usize> {
        self.slot.as_ref().map(SwapSlot::index)
    }

    /// 从未换出的页保持清零；否则从槽位读回
    pub(crate) fn swap_in(&self, frame: &mut FrameTracker, swap: &SwapTable) -> VmResult<()> {
        match &self.slot {
            None => Ok(()),
            Some(slot) => swap.read_page(slot, frame.as_bytes_mut()),
        }
    }

    pub(crate) fn swap_out(&mut self, frame: &FrameTracker, swap: &Arc<SwapTable>) -> VmResult<()> {
        if self.slot.is_none() {
            let slot = swap.alloc_slot().ok_or_else(|| {
                log::warn!("swap: no free slot for page of pid {}", self.owner);
                VmError::StorageFailure
            })?;
            self.slot = Some(slot);
        }
        match &self.slot {
            Some(slot) => swap.write_page(slot, frame.as_bytes()),
            None => Err(VmError::StorageFailure),
        }
    }
}
