//! 文件映射页
//!
//! 描述 mmap 区域中的一个页大小的切片：从文件 `offset` 处读取
//! `read_bytes` 字节，其余 `zero_bytes` 字节清零。
//! 被驱逐或解除映射时，只有脏页才写回文件。

use crate::{
    address::Vaddr,
    config::PAGE_SIZE,
    error::VmResult,
    file::{FileHandle, FsLock},
    frame::FrameTracker,
    mmu::PageTable,
};

/// 文件映射页
pub struct FilePage {
    file: FileHandle,
    start: Vaddr,
    length: usize,
    offset: usize,
    read_bytes: usize,
    zero_bytes: usize,
}

impl FilePage {
    pub(crate) fn new(
        file: FileHandle,
        start: Vaddr,
        length: usize,
        offset: usize,
        read_bytes: usize,
    ) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);
        FilePage {
            file,
            start,
            length,
            offset,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
        }
    }

    /// mmap 时重新打开得到的文件句柄
    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    /// 所属映射的起始地址
    pub fn start(&self) -> Vaddr {
        self.start
    }

    /// 所属映射的总长度
    pub fn length(&self) -> usize {
        self.length
    }

    /// 本页在文件中的偏移
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 从文件读取的字节数
    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    /// 清零的字节数
    pub fn zero_bytes(&self) -> usize {
        self.zero_bytes
    }

    pub(crate) fn load(&self, frame: &mut FrameTracker, fs_lock: &FsLock) -> VmResult<()> {
        let buf = frame.as_bytes_mut();
        fs_lock.read_exact_at(&*self.file, self.offset, &mut buf[..self.read_bytes])?;
        buf[self.read_bytes..].fill(0);
        Ok(())
    }

    pub(crate) fn write_back(&self, frame: &FrameTracker, fs_lock: &FsLock) -> VmResult<()> {
        fs_lock.write_all_at(&*self.file, self.offset, &frame.as_bytes()[..self.read_bytes])
    }

    /// 脏页写回并清除脏位；干净页什么也不做
    pub(crate) fn write_back_if_dirty(
        &self,
        va: Vaddr,
        frame: &FrameTracker,
        mmu: &dyn PageTable,
        fs_lock: &FsLock,
    ) -> VmResult<bool> {
        if !mmu.is_dirty(va) {
            return Ok(false);
        }
        self.write_back(frame, fs_lock)?;
        mmu.set_dirty(va, false);
        Ok(true)
    }
}

impl core::fmt::Debug for FilePage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilePage")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}
