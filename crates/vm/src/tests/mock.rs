//! 测试用的外部组件：页表、文件、交换盘和物理内存

use alloc::{collections::BTreeMap, sync::Arc, vec, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sync::SpinMutex;
use test_support::mock::mem::MockPhysMemory;

use crate::{
    AddressSpace, FileHandle, FsLock, PageTable, Pid, Ppn, SECTOR_SIZE, SECTORS_PER_PAGE,
    SwapDevice, UserPool, Vaddr, VmConfig, VmFile, VmSystem,
};

// ============================================================================
// ArchOps
// ============================================================================

struct DummyArchOps;

impl sync::ArchOps for DummyArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        0
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}

    fn interrupt_enable_bit(&self) -> usize {
        0
    }
}

static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;

pub fn init_sync_arch_ops() {
    if !sync::arch_ops_registered() {
        // SAFETY: 'static 实例；并发重复注册写入的是同一个值
        unsafe { sync::register_arch_ops(&DUMMY_ARCH_OPS) };
    }
}

// ============================================================================
// 页表
// ============================================================================

/// 一个页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPte {
    pub ppn: Ppn,
    pub writable: bool,
    pub accessed: bool,
    pub dirty: bool,
}

#[derive(Default)]
pub struct MockMmu {
    entries: SpinMutex<BTreeMap<Vaddr, MockPte>>,
    fail_map: AtomicBool,
}

impl MockMmu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pte(&self, va: usize) -> Option<MockPte> {
        self.entries.lock().get(&Vaddr::from_usize(va)).copied()
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn set_fail_map(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::SeqCst);
    }

    fn update(&self, va: Vaddr, f: impl FnOnce(&mut MockPte)) {
        if let Some(pte) = self.entries.lock().get_mut(&va) {
            f(pte);
        }
    }
}

impl PageTable for MockMmu {
    fn map(&self, va: Vaddr, ppn: Ppn, writable: bool) -> bool {
        if self.fail_map.load(Ordering::SeqCst) {
            return false;
        }
        let mut entries = self.entries.lock();
        let (accessed, dirty) = match entries.get(&va) {
            Some(old) if old.ppn == ppn => (old.accessed, old.dirty),
            _ => (false, false),
        };
        entries.insert(
            va,
            MockPte {
                ppn,
                writable,
                accessed,
                dirty,
            },
        );
        true
    }

    fn unmap(&self, va: Vaddr) {
        self.entries.lock().remove(&va);
    }

    fn is_accessed(&self, va: Vaddr) -> bool {
        self.entries.lock().get(&va).is_some_and(|p| p.accessed)
    }

    fn set_accessed(&self, va: Vaddr, accessed: bool) {
        self.update(va, |p| p.accessed = accessed);
    }

    fn is_dirty(&self, va: Vaddr) -> bool {
        self.entries.lock().get(&va).is_some_and(|p| p.dirty)
    }

    fn set_dirty(&self, va: Vaddr, dirty: bool) {
        self.update(va, |p| p.dirty = dirty);
    }
}

// ============================================================================
// 文件
// ============================================================================

/// 文件内容与统计，所有打开共享同一个 inode
pub struct MockInode {
    data: SpinMutex<Vec<u8>>,
    open: AtomicUsize,
    writes: AtomicUsize,
    short_reads: AtomicBool,
    fail_reopen: AtomicBool,
}

impl MockInode {
    pub fn new(data: &[u8]) -> Arc<Self> {
        Arc::new(MockInode {
            data: SpinMutex::new(data.to_vec()),
            open: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            short_reads: AtomicBool::new(false),
            fail_reopen: AtomicBool::new(false),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 当前未关闭的句柄数
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// 累计 write_at 调用次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_short_reads(&self, short: bool) {
        self.short_reads.store(short, Ordering::SeqCst);
    }

    pub fn set_fail_reopen(&self, fail: bool) {
        self.fail_reopen.store(fail, Ordering::SeqCst);
    }
}

pub struct MockFile {
    inode: Arc<MockInode>,
}

impl MockFile {
    pub fn open(inode: &Arc<MockInode>) -> FileHandle {
        inode.open.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockFile {
            inode: Arc::clone(inode),
        })
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        self.inode.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl VmFile for MockFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let data = self.inode.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let mut n = buf.len().min(data.len() - offset);
        if self.inode.short_reads.load(Ordering::SeqCst) {
            n /= 2;
        }
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        self.inode.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.inode.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn length(&self) -> usize {
        self.inode.data.lock().len()
    }

    fn reopen(&self) -> Option<FileHandle> {
        if self.inode.fail_reopen.load(Ordering::SeqCst) {
            return None;
        }
        Some(MockFile::open(&self.inode))
    }

    fn duplicate(&self) -> Option<FileHandle> {
        Some(MockFile::open(&self.inode))
    }
}

// ============================================================================
// 交换盘
// ============================================================================

pub struct RamSwap {
    data: SpinMutex<Vec<u8>>,
    sectors: usize,
}

impl RamSwap {
    pub fn new(sectors: usize) -> Arc<Self> {
        Arc::new(RamSwap {
            data: SpinMutex::new(vec![0u8; sectors * SECTOR_SIZE]),
            sectors,
        })
    }
}

impl SwapDevice for RamSwap {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if sector >= self.sectors || buf.len() != SECTOR_SIZE {
            return false;
        }
        let off = sector * SECTOR_SIZE;
        buf.copy_from_slice(&self.data.lock()[off..off + SECTOR_SIZE]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if sector >= self.sectors || buf.len() != SECTOR_SIZE {
            return false;
        }
        let off = sector * SECTOR_SIZE;
        self.data.lock()[off..off + SECTOR_SIZE].copy_from_slice(buf);
        true
    }

    fn sector_count(&self) -> usize {
        self.sectors
    }
}

// ============================================================================
// 测试环境
// ============================================================================

/// 一个独立的虚拟内存子系统实例
///
/// 字段按声明顺序析构，物理内存最后归还。
pub struct Fixture {
    pub vm: VmSystem,
    pub pool: Arc<UserPool>,
    _mem: MockPhysMemory,
}

impl Fixture {
    /// `frames` 个用户帧，`swap_slots` 个交换槽
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        init_sync_arch_ops();
        let mem = MockPhysMemory::new(frames);
        // SAFETY: mem 只交给这个页池使用，且比页池活得久
        let pool = Arc::new(unsafe {
            UserPool::new(Ppn::from_usize(mem.start_ppn()), mem.base(), frames)
        });
        let vm = VmSystem::new(
            VmConfig::new(),
            pool.clone(),
            RamSwap::new(swap_slots * SECTORS_PER_PAGE),
            Arc::new(FsLock::new()),
        );
        Fixture {
            vm,
            pool,
            _mem: mem,
        }
    }

    pub fn space(&self, pid: Pid) -> (AddressSpace, Arc<MockMmu>) {
        let mmu = MockMmu::new();
        (AddressSpace::new(&self.vm, pid, mmu.clone()), mmu)
    }

    /// 系统中驻留页的数量（驱逐链表长度）
    pub fn resident(&self) -> usize {
        self.vm.frames().resident_count()
    }

    pub fn allocated_frames(&self) -> usize {
        self.pool.allocated_frames()
    }
}

/// 检查"驻留页 <-> 帧"的双向对应：每个驻留页在驱逐链表中恰有一项，
/// 链表中也没有多余的项
pub fn assert_frame_bijection(fx: &Fixture, spaces: &[&AddressSpace]) {
    let mut listed = fx.vm.frames().resident_frames();
    let mut resident = Vec::new();
    for space in spaces {
        for (va, page_ref) in space.spt().iter() {
            let page = page_ref.lock();
            if let Some(ppn) = page.ppn() {
                resident.push((ppn, va));
            }
        }
    }
    listed.sort();
    resident.sort();
    assert_eq!(listed, resident);
}

pub const PAGE: usize = crate::PAGE_SIZE;
