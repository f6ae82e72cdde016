//! 帧表与驱逐
//!
//! 所有进程的驻留页按登记顺序排在一条全局链表上。页池耗尽时，
//! 用时钟（二次机会）算法从链表头开始挑选牺牲者：
//!
//! 1. 访问位为 1：清零并移到链表尾，给它第二次机会
//! 2. 访问位为 0：选中
//! 3. 整整一圈都没有选中：强制选择此时的链表头（退化为 FIFO）
//!
//! 页锁被其他线程占用的项不会被选中，扫描时把它们移到链表尾。
//!
//! 写时复制共享的帧按映射逐个驱逐：每个共享者换出到自己的交换槽并解除映射，
//! 最后一个共享者被驱逐时帧才回到调用者手里。
//!
//! 链表项由驻留页持有的 [`LruToken`] 管理：token 被 drop 时对应链表项随之删除，
//! 因此"驱逐链表长度 == 驻留页数"始终成立。

use alloc::{
    collections::VecDeque,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::{SpinLock, SpinMutex, SpinMutexGuard};

use crate::{
    address::{Ppn, Vaddr},
    error::{VmError, VmResult},
    file::FsLock,
    mmu::PageTable,
    page::{Backing, Page, PageRef},
    swap::SwapTable,
};

use super::pool::{FrameTracker, PhysPool};

/// 驱逐链表中的一项
struct FrameEntry {
    id: usize,
    ppn: Ppn,
    va: Vaddr,
    page: Weak<SpinMutex<Page>>,
    mmu: Arc<dyn PageTable>,
}

struct FrameTableInner {
    lru: VecDeque<FrameEntry>,
    next_id: usize,
}

/// 全局帧表
pub struct FrameTable {
    pool: Arc<dyn PhysPool>,
    swap: Arc<SwapTable>,
    fs_lock: Arc<FsLock>,
    inner: SpinLock<FrameTableInner>,
    /// 串行化驱逐与补充页表的销毁
    evict_lock: SpinMutex<()>,
    evictions: AtomicUsize,
}

impl FrameTable {
    /// 创建帧表
    pub fn new(pool: Arc<dyn PhysPool>, swap: Arc<SwapTable>, fs_lock: Arc<FsLock>) -> Arc<Self> {
        Arc::new(FrameTable {
            pool,
            swap,
            fs_lock,
            inner: SpinLock::new(FrameTableInner {
                lru: VecDeque::new(),
                next_id: 0,
            }),
            evict_lock: SpinMutex::new(()),
            evictions: AtomicUsize::new(0),
        })
    }

    /// 获取一个清零的帧
    ///
    /// 页池耗尽时驱逐一个驻留页；没有可驱逐的页时返回 [`VmError::OutOfMemory`]。
    pub fn acquire(&self) -> VmResult<FrameTracker> {
        if let Some(ppn) = self.pool.alloc_zeroed() {
            return Ok(FrameTracker::new(ppn, Arc::clone(&self.pool)));
        }
        self.evict()
    }

    /// 把驻留页登记到链表尾
    pub(crate) fn register(
        self: &Arc<Self>,
        ppn: Ppn,
        va: Vaddr,
        page: &PageRef,
        mmu: &Arc<dyn PageTable>,
    ) -> LruToken {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.lru.push_back(FrameEntry {
            id,
            ppn,
            va,
            page: Arc::downgrade(page),
            mmu: Arc::clone(mmu),
        });
        LruToken {
            id,
            table: Arc::clone(self),
        }
    }

    fn unregister(&self, id: usize) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.lru.iter().position(|e| e.id == id) {
            inner.lru.remove(pos);
        }
    }

    /// 进入驱逐/销毁临界区
    pub(crate) fn serialize(&self) -> SpinMutexGuard<'_, ()> {
        self.evict_lock.lock()
    }

    /// 驱逐链表长度，即系统中驻留页的数量
    pub fn resident_count(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// 按链表顺序（从头到尾）列出驻留页
    pub fn resident_frames(&self) -> Vec<(Ppn, Vaddr)> {
        self.inner.lock().lru.iter().map(|e| (e.ppn, e.va)).collect()
    }

    /// 累计驱逐次数
    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// 页锁空闲的页才能驱逐
    fn is_evictable(page: &PageRef) -> bool {
        page.try_lock().is_some()
    }

    /// 时钟扫描
    ///
    /// 扫描中升级得到的页引用放进 `hold`，由调用者在释放链表锁之后再丢弃：
    /// 如果它恰好是最后一个引用，页的析构会回头获取链表锁。
    fn select_victim(inner: &mut FrameTableInner, hold: &mut Vec<PageRef>) -> Option<FrameEntry> {
        for _ in 0..inner.lru.len() {
            let entry = inner.lru.pop_front()?;
            let Some(page) = entry.page.upgrade() else {
                continue;
            };
            if entry.mmu.is_accessed(entry.va) {
                entry.mmu.set_accessed(entry.va, false);
                inner.lru.push_back(entry);
            } else if Self::is_evictable(&page) {
                hold.push(page);
                return Some(entry);
            } else {
                inner.lru.push_back(entry);
            }
            hold.push(page);
        }

        // 一整圈都是刚被访问过的页：从头开始取第一个能驱逐的
        let pos = inner.lru.iter().position(|e| match e.page.upgrade() {
            Some(page) => {
                let ok = Self::is_evictable(&page);
                hold.push(page);
                ok
            }
            None => false,
        })?;
        inner.lru.remove(pos)
    }

    fn evict(&self) -> VmResult<FrameTracker> {
        let _serial = self.evict_lock.lock();
        let attempts = self.inner.lock().lru.len() + 1;

        for _ in 0..attempts {
            let mut hold = Vec::new();
            let victim = Self::select_victim(&mut self.inner.lock(), &mut hold);
            let Some(entry) = victim else {
                break;
            };
            let Some(page) = entry.page.upgrade() else {
                continue;
            };
            // 扫描和这里之间页锁可能刚被拿走
            let Some(mut guard) = page.try_lock() else {
                self.inner.lock().lru.push_back(entry);
                continue;
            };
            // 链表项已经摘下，页的登记号不一致说明它不再对应这一帧
            if guard.lru_id() != Some(entry.id) {
                continue;
            }
            match self.evict_page(&mut guard, &entry) {
                Ok(Some(frame)) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    log::debug!("vm: evicted {:?} from {:?}", entry.va, entry.ppn);
                    return Ok(frame);
                }
                Ok(None) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    log::debug!("vm: evicted shared mapping {:?} of {:?}", entry.va, entry.ppn);
                }
                Err(err) => {
                    drop(guard);
                    log::warn!("vm: eviction of {:?} failed: {}", entry.va, err);
                    self.inner.lock().lru.push_back(entry);
                    return Err(err);
                }
            }
        }

        log::warn!("vm: no evictable frame");
        Err(VmError::OutOfMemory)
    }

    /// 换出、解除映射、脱离帧并清零
    ///
    /// 只有换出可能失败，此时页保持驻留。帧还被其他页共享时返回 `None`。
    fn evict_page(&self, page: &mut Page, entry: &FrameEntry) -> VmResult<Option<FrameTracker>> {
        let io = Backing {
            swap: &self.swap,
            fs_lock: &self.fs_lock,
        };
        page.swap_out(&*entry.mmu, &io)?;
        entry.mmu.unmap(entry.va);

        let Some(resident) = page.detach() else {
            return Ok(None);
        };
        // 对应的链表项已经摘下，token 的析构找不到它
        drop(resident.token);
        Ok(Arc::try_unwrap(resident.frame).ok().map(|mut frame| {
            frame.zero();
            frame
        }))
    }
}

/// 驱逐链表登记凭证
///
/// 由驻留页持有；drop 时从链表中删除对应项。
pub struct LruToken {
    id: usize,
    table: Arc<FrameTable>,
}

impl LruToken {
    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

impl Drop for LruToken {
    fn drop(&mut self) {
        self.table.unregister(self.id);
    }
}

impl core::fmt::Debug for LruToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("LruToken").field(&self.id).finish()
    }
}
