//! 文件接口与全局文件系统锁

use alloc::sync::Arc;

use sync::{SpinMutex, SpinMutexGuard};

use crate::error::{VmError, VmResult};

/// 可映射到内存的文件
///
/// 每个 [`FileHandle`] 是一次独立的打开；drop 即关闭。
/// 文件系统本身不是线程安全的，所有读写都必须在 [`FsLock`] 下进行。
pub trait VmFile: Send + Sync {
    /// 从 `offset` 读取数据到 `buf`，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将 `buf` 写入 `offset`，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度
    fn length(&self) -> usize;

    /// 对同一个 inode 做一次新的打开，拥有独立的生命周期
    fn reopen(&self) -> Option<FileHandle>;

    /// 复制句柄（fork 时子进程继承）
    fn duplicate(&self) -> Option<FileHandle>;
}

/// 打开的文件
pub type FileHandle = Arc<dyn VmFile>;

/// 全局文件系统锁
///
/// 内核只有一把，由系统调用层和虚拟内存核心共享。
#[derive(Default)]
pub struct FsLock {
    lock: SpinMutex<()>,
}

impl FsLock {
    /// 创建文件系统锁
    pub const fn new() -> Self {
        FsLock {
            lock: SpinMutex::new(()),
        }
    }

    /// 供系统调用层在自己的文件操作周围持锁
    pub fn lock(&self) -> SpinMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// 在锁内从 `offset` 读满 `buf`，读不满即失败
    pub fn read_exact_at(&self, file: &dyn VmFile, offset: usize, buf: &mut [u8]) -> VmResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        match file.read_at(offset, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                log::warn!(
                    "vm: short file read at offset {:#x}: {} of {} bytes",
                    offset,
                    n,
                    buf.len()
                );
                Err(VmError::StorageFailure)
            }
            Err(errno) => {
                log::warn!("vm: file read at offset {:#x} failed: {}", offset, errno);
                Err(VmError::StorageFailure)
            }
        }
    }

    /// 在锁内把 `buf` 全部写到 `offset`，写不满即失败
    pub fn write_all_at(&self, file: &dyn VmFile, offset: usize, buf: &[u8]) -> VmResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        match file.write_at(offset, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                log::error!(
                    "vm: partial write-back at offset {:#x}: {} of {} bytes",
                    offset,
                    n,
                    buf.len()
                );
                Err(VmError::StorageFailure)
            }
            Err(errno) => {
                log::error!("vm: write-back at offset {:#x} failed: {}", offset, errno);
                Err(VmError::StorageFailure)
            }
        }
    }
}
