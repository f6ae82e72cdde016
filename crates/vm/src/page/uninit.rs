//! 未初始化页
//!
//! 已登记但尚未首次访问的页。保存首次访问时如何填充内容的描述，
//! 首次认领（claim）并建立映射之后变成对应的 [`AnonPage`] 或 [`FilePage`]。

use crate::{
    config::PAGE_SIZE,
    error::VmResult,
    file::{FileHandle, FsLock},
    frame::FrameTracker,
};

use super::{AnonPage, FilePage, PageKind, Pid, VmType};

/// 匿名页的延迟加载描述
///
/// 从文件 `offset` 处读取 `read_bytes` 字节，其余清零。
/// 用于可执行文件段这类"内容来自文件、但换出到交换区"的页。
pub struct LazyLoad {
    /// 数据来源
    pub file: FileHandle,
    /// 文件偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 清零的字节数
    pub zero_bytes: usize,
}

impl LazyLoad {
    /// 读取与清零的部分恰好拼成一页
    pub fn fits_page(&self) -> bool {
        self.read_bytes <= PAGE_SIZE
            && self.read_bytes.checked_add(self.zero_bytes) == Some(PAGE_SIZE)
    }

    /// 复制描述，同时复制文件句柄
    pub fn duplicate(&self) -> Option<Self> {
        Some(LazyLoad {
            file: self.file.duplicate()?,
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
        })
    }
}

/// 未初始化页的初始化方式
pub enum UninitPage {
    /// 变成匿名页；`load` 为 None 时清零
    Anon {
        /// 所属进程
        owner: Pid,
        /// 可选的延迟加载描述
        load: Option<LazyLoad>,
    },
    /// 变成文件映射页
    File(FilePage),
}

impl UninitPage {
    /// 首次认领后的页类型
    pub fn target(&self) -> VmType {
        match self {
            UninitPage::Anon { .. } => VmType::Anon,
            UninitPage::File(_) => VmType::File,
        }
    }

    /// 把初始内容写入刚拿到的清零帧
    pub(crate) fn load(&self, frame: &mut FrameTracker, fs_lock: &FsLock) -> VmResult<()> {
        match self {
            UninitPage::Anon { load: None, .. } => Ok(()),
            UninitPage::Anon { load: Some(l), .. } => {
                let buf = frame.as_bytes_mut();
                fs_lock.read_exact_at(&*l.file, l.offset, &mut buf[..l.read_bytes])?;
                buf[l.read_bytes..].fill(0);
                Ok(())
            }
            UninitPage::File(f) => f.load(frame, fs_lock),
        }
    }

    /// 初始化完成后的页内容；延迟加载用的文件句柄在这里关闭
    pub(crate) fn into_kind(self) -> PageKind {
        match self {
            UninitPage::Anon { owner, .. } => PageKind::Anon(AnonPage::new(owner)),
            UninitPage::File(f) => PageKind::File(f),
        }
    }
}

impl core::fmt::Debug for UninitPage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UninitPage::Anon { owner, load } => f
                .debug_struct("Anon")
                .field("owner", owner)
                .field("lazy", &load.is_some())
                .finish(),
            UninitPage::File(page) => f.debug_tuple("File").field(page).finish(),
        }
    }
}
