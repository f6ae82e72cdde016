//! 交换区
//!
//! 交换设备按扇区寻址。一个页大小的交换槽由 [`SECTORS_PER_PAGE`] 个
//! 连续、按槽对齐的扇区组成，占用情况记录在扇区位图里。
//!
//! [`SwapSlot`] 是已预留槽位的 RAII 句柄：被 drop 时自动清除位图中的占用位。

use alloc::sync::Arc;
use core::fmt;

use sync::SpinLock;

use crate::{
    bitmap::Bitmap,
    config::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE},
    error::{VmError, VmResult},
};

/// 交换块设备
pub trait SwapDevice: Send + Sync {
    /// 读取一个扇区到 `buf`（长度为 [`SECTOR_SIZE`]）
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 将 `buf`（长度为 [`SECTOR_SIZE`]）写入一个扇区
    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool;

    /// 设备扇区总数
    fn sector_count(&self) -> usize;
}

/// 交换表：交换设备加上扇区占用位图
pub struct SwapTable {
    device: Arc<dyn SwapDevice>,
    sectors: SpinLock<Bitmap>,
}

impl SwapTable {
    /// 接管整个交换设备
    pub fn new(device: Arc<dyn SwapDevice>) -> Arc<Self> {
        // 不足一个槽的尾部扇区不参与分配
        let usable = device.sector_count() / SECTORS_PER_PAGE * SECTORS_PER_PAGE;
        Arc::new(SwapTable {
            device,
            sectors: SpinLock::new(Bitmap::new(usable)),
        })
    }

    /// 预留一个交换槽；交换区已满时返回 None
    pub fn alloc_slot(self: &Arc<Self>) -> Option<SwapSlot> {
        let sector = self
            .sectors
            .lock()
            .alloc_aligned(SECTORS_PER_PAGE, SECTORS_PER_PAGE)?;
        Some(SwapSlot {
            sector,
            table: Arc::clone(self),
        })
    }

    /// 把一页数据写入槽位
    pub fn write_page(&self, slot: &SwapSlot, data: &[u8]) -> VmResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        for (i, chunk) in data.chunks_exact(SECTOR_SIZE).enumerate() {
            if !self.device.write_sector(slot.sector + i, chunk) {
                log::warn!("swap: write of sector {} failed", slot.sector + i);
                return Err(VmError::StorageFailure);
            }
        }
        Ok(())
    }

    /// 从槽位读回一页数据
    pub fn read_page(&self, slot: &SwapSlot, data: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        for (i, chunk) in data.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            if !self.device.read_sector(slot.sector + i, chunk) {
                log::warn!("swap: read of sector {} failed", slot.sector + i);
                return Err(VmError::StorageFailure);
            }
        }
        Ok(())
    }

    /// 交换区可容纳的槽数
    pub fn total_slots(&self) -> usize {
        self.sectors.lock().len() / SECTORS_PER_PAGE
    }

    /// 已占用的槽数
    pub fn used_slots(&self) -> usize {
        self.sectors.lock().used() / SECTORS_PER_PAGE
    }

    fn release(&self, sector: usize) {
        self.sectors.lock().free_range(sector, SECTORS_PER_PAGE);
    }
}

/// 已预留的交换槽
pub struct SwapSlot {
    sector: usize,
    table: Arc<SwapTable>,
}

impl SwapSlot {
    /// 槽位的起始扇区
    pub fn sector(&self) -> usize {
        self.sector
    }

    /// 槽位下标
    pub fn index(&self) -> usize {
        self.sector / SECTORS_PER_PAGE
    }
}

impl Drop for SwapSlot {
    fn drop(&mut self) {
        self.table.release(self.sector);
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapSlot").field("sector", &self.sector).finish()
    }
}
