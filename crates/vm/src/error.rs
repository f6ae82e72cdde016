//! 虚拟内存错误类型

use core::fmt;

/// 虚拟内存操作的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 补充页表中该虚拟页已有条目
    DuplicateMapping,
    /// 物理帧耗尽且无法驱逐，或页表项无法建立
    OutOfMemory,
    /// 缺页无法解决：内核地址、只读页写入、未映射且不在栈增长范围内
    InvalidAccess,
    /// 交换区或文件读写失败 / 长度不足
    StorageFailure,
    /// 参数中的地址、长度或偏移不合法
    InvalidAddress,
    /// 地址上没有对应的映射
    NotMapped,
}

impl VmError {
    /// 转换为系统调用层使用的负 errno
    pub const fn to_errno(self) -> isize {
        match self {
            VmError::DuplicateMapping => -17, // EEXIST
            VmError::OutOfMemory => -12,      // ENOMEM
            VmError::InvalidAccess => -14,    // EFAULT
            VmError::StorageFailure => -5,    // EIO
            VmError::InvalidAddress | VmError::NotMapped => -22, // EINVAL
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::DuplicateMapping => "page already present in supplemental page table",
            VmError::OutOfMemory => "out of physical frames",
            VmError::InvalidAccess => "invalid memory access",
            VmError::StorageFailure => "swap or file I/O failed",
            VmError::InvalidAddress => "invalid address argument",
            VmError::NotMapped => "address not mapped",
        };
        f.write_str(msg)
    }
}

/// 虚拟内存操作结果
pub type VmResult<T> = Result<T, VmError>;
