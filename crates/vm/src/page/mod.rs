//! 页
//!
//! [`Page`] 是补充页表中的一个条目：记录一个用户虚拟页的属性、
//! 内容来源（[`PageKind`]）以及驻留时所占用的物理帧。
//!
//! # 页的生命周期
//!
//! ```text
//!   alloc_page ──► Uninit ──claim──► Anon / File ──evict──► (不驻留)
//!                                        ▲                     │
//!                                        └──────── claim ──────┘
//! ```
//!
//! 页的销毁就是它的 `Drop`：驻留帧（及其在驱逐链表中的登记）、
//! 交换槽、文件句柄都是 RAII 对象，页释放时各自归还一次。

mod anon;
mod file;
mod uninit;

pub use anon::{AnonPage, Pid};
pub use file::FilePage;
pub use uninit::{LazyLoad, UninitPage};

use alloc::sync::Arc;
use core::fmt;

use sync::SpinMutex;

use crate::{
    address::{Ppn, Vaddr},
    error::{VmError, VmResult},
    file::FsLock,
    frame::{FrameTracker, LruToken},
    mmu::PageTable,
    swap::SwapTable,
};

/// 页类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    /// 匿名页
    Anon,
    /// 文件映射页
    File,
}

/// 页的内容来源
#[derive(Debug)]
pub enum PageKind {
    /// 尚未首次访问
    Uninit(UninitPage),
    /// 匿名页
    Anon(AnonPage),
    /// 文件映射页
    File(FilePage),
}

/// 补充页表中共享的页引用
///
/// 驱逐扫描需要从全局帧链表回到页本身，所以页以 `Arc` 共享，
/// 帧链表只持有 `Weak`。
pub type PageRef = Arc<SpinMutex<Page>>;

/// 驻留状态：占用的物理帧、它在驱逐链表中的登记，以及当前映射的权限
pub(crate) struct Resident {
    pub(crate) frame: Arc<FrameTracker>,
    pub(crate) token: LruToken,
    pub(crate) mapped_writable: bool,
}

/// 换入换出时需要的后备存储
pub(crate) struct Backing<'a> {
    pub(crate) swap: &'a Arc<SwapTable>,
    pub(crate) fs_lock: &'a FsLock,
}

/// 用户虚拟页
pub struct Page {
    va: Vaddr,
    writable: bool,
    kind: PageKind,
    resident: Option<Resident>,
}

impl Page {
    pub(crate) fn new(va: Vaddr, writable: bool, kind: PageKind) -> Self {
        debug_assert!(va.is_page_aligned());
        Page {
            va,
            writable,
            kind,
            resident: None,
        }
    }

    /// 页起始地址
    pub fn va(&self) -> Vaddr {
        self.va
    }

    /// 进程是否有权写入
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 是否正以写时复制方式共享物理帧
    ///
    /// 可写页的帧被其他页共享时成立；共享者只剩自己时随即失效。
    pub fn copy_writable(&self) -> bool {
        self.writable && self.is_frame_shared()
    }

    /// 当前硬件映射是否可写；不驻留时为 false
    pub fn is_mapped_writable(&self) -> bool {
        self.resident.as_ref().is_some_and(|r| r.mapped_writable)
    }

    pub(crate) fn set_mapped_writable(&mut self, writable: bool) {
        if let Some(resident) = &mut self.resident {
            resident.mapped_writable = writable;
        }
    }

    /// 驱逐链表登记号，用来识别链表项是否仍对应当前驻留帧
    pub(crate) fn lru_id(&self) -> Option<usize> {
        self.resident.as_ref().map(|r| r.token.id())
    }

    /// 内容来源
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// 页类型；未初始化页报告它将要变成的类型
    pub fn vm_type(&self) -> VmType {
        match &self.kind {
            PageKind::Uninit(init) => init.target(),
            PageKind::Anon(_) => VmType::Anon,
            PageKind::File(_) => VmType::File,
        }
    }

    /// 是否尚未首次访问
    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit(_))
    }

    /// 是否驻留在物理帧中
    pub fn is_resident(&self) -> bool {
        self.resident.is_some()
    }

    /// 驻留帧
    pub fn frame(&self) -> Option<&Arc<FrameTracker>> {
        self.resident.as_ref().map(|r| &r.frame)
    }

    /// 驻留帧的物理页号
    pub fn ppn(&self) -> Option<Ppn> {
        self.frame().map(|f| f.ppn())
    }

    /// 驻留帧是否同时被其他页引用（写时复制共享中）
    pub fn is_frame_shared(&self) -> bool {
        self.frame().is_some_and(|f| Arc::strong_count(f) > 1)
    }

    /// 匿名页数据
    pub fn anon(&self) -> Option<&AnonPage> {
        match &self.kind {
            PageKind::Anon(anon) => Some(anon),
            _ => None,
        }
    }

    /// 文件映射描述，未初始化的文件页也会返回
    pub fn file_page(&self) -> Option<&FilePage> {
        match &self.kind {
            PageKind::File(file) | PageKind::Uninit(UninitPage::File(file)) => Some(file),
            _ => None,
        }
    }

    /// 把页内容填入刚拿到的帧
    ///
    /// 未初始化页保持原样，映射建立之后在 `attach` 里完成类型转换；
    /// 之间失败时初始化描述仍在，下次认领可以重来。
    pub(crate) fn swap_in(&self, frame: &mut FrameTracker, io: &Backing<'_>) -> VmResult<()> {
        match &self.kind {
            PageKind::Uninit(init) => init.load(frame, io.fs_lock),
            PageKind::Anon(anon) => anon.swap_in(frame, io.swap),
            PageKind::File(file) => file.load(frame, io.fs_lock),
        }
    }

    fn finish_init(&mut self) {
        if !self.is_uninit() {
            return;
        }
        // 占位值随即被覆盖
        let taken = core::mem::replace(&mut self.kind, PageKind::Anon(AnonPage::new(0)));
        if let PageKind::Uninit(init) = taken {
            self.kind = init.into_kind();
        }
    }

    /// 把驻留内容保存到后备存储，帧本身保持不动
    pub(crate) fn swap_out(&mut self, mmu: &dyn PageTable, io: &Backing<'_>) -> VmResult<()> {
        let Some(resident) = &self.resident else {
            return Err(VmError::NotMapped);
        };
        match &mut self.kind {
            PageKind::Uninit(_) => Err(VmError::NotMapped),
            PageKind::Anon(anon) => anon.swap_out(&resident.frame, io.swap),
            PageKind::File(file) => file
                .write_back_if_dirty(self.va, &resident.frame, mmu, io.fs_lock)
                .map(|_| ()),
        }
    }

    /// 挂上已经映射好的帧；未初始化页在这里变成目标类型
    pub(crate) fn attach(
        &mut self,
        frame: Arc<FrameTracker>,
        token: LruToken,
        mapped_writable: bool,
    ) {
        debug_assert!(self.resident.is_none(), "attach: page already resident");
        self.finish_init();
        self.resident = Some(Resident {
            frame,
            token,
            mapped_writable,
        });
    }

    pub(crate) fn detach(&mut self) -> Option<Resident> {
        self.resident.take()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("va", &self.va)
            .field("writable", &self.writable)
            .field("copy_writable", &self.copy_writable())
            .field("kind", &self.kind)
            .field("ppn", &self.ppn())
            .finish()
    }
}
