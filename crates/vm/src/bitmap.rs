//! 位图
//!
//! 用户页池和交换区共用的分配位图：每个 bit 表示一个资源单元
//! （0=空闲，1=已占用），按 `u64` 存储以便整字跳过。
//!
//! - 单个分配：从上次分配位置开始循环查找，利用局部性
//! - 对齐的连续分配：从对齐边界开始检查 `num` 个连续空闲位
//!
//! 释放时直接清位，O(1)。

use alloc::{vec, vec::Vec};

/// 分配位图
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
    /// 上次分配所在的字下标
    hint: usize,
}

impl Bitmap {
    /// 创建 `len` 位、全部空闲的位图
    pub fn new(len: usize) -> Self {
        Bitmap {
            words: vec![0u64; len.div_ceil(64)],
            len,
            used: 0,
            hint: 0,
        }
    }

    /// 总位数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 位图是否为空（0 位）
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 已占用位数
    pub fn used(&self) -> usize {
        self.used
    }

    /// 空闲位数
    pub fn free(&self) -> usize {
        self.len - self.used
    }

    /// 第 `idx` 位是否已占用
    pub fn is_set(&self, idx: usize) -> bool {
        idx < self.len && (self.words[idx / 64] & (1u64 << (idx % 64))) != 0
    }

    #[inline]
    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1u64 << (idx % 64);
    }

    #[inline]
    fn clear(&mut self, idx: usize) {
        self.words[idx / 64] &= !(1u64 << (idx % 64));
    }

    /// 分配一个空闲位
    ///
    /// 循环查找 [hint, end) + [0, hint)
    pub fn alloc(&mut self) -> Option<usize> {
        let nwords = self.words.len();
        for offset in 0..nwords {
            let w = (self.hint + offset) % nwords;
            let word = self.words[w];
            if word == u64::MAX {
                continue;
            }
            let idx = w * 64 + (!word).trailing_zeros() as usize;
            // 最后一个字里超出 len 的部分
            if idx >= self.len {
                continue;
            }
            self.set(idx);
            self.used += 1;
            self.hint = w;
            return Some(idx);
        }
        None
    }

    /// 分配 `num` 个连续空闲位，起始下标对齐到 `align`（2 的幂）
    pub fn alloc_aligned(&mut self, num: usize, align: usize) -> Option<usize> {
        if num == 0 || num > self.free() {
            return None;
        }
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");

        let mut idx = 0;
        while idx < self.len {
            let start = (idx + align - 1) & !(align - 1);
            if start + num > self.len {
                break;
            }
            match (0..num).find(|&i| self.is_set(start + i)) {
                Some(i) => idx = start + i + 1,
                None => {
                    for i in 0..num {
                        self.set(start + i);
                    }
                    self.used += num;
                    return Some(start);
                }
            }
        }
        None
    }

    /// 释放从 `start` 开始的 `num` 位
    pub fn free_range(&mut self, start: usize, num: usize) {
        debug_assert!(start + num <= self.len, "free_range: out of range");
        for idx in start..start + num {
            debug_assert!(self.is_set(idx), "free_range: double free at {}", idx);
            self.clear(idx);
        }
        self.used -= num;
    }
}
