//! 以完整地址空间为单位的行为测试
//!
//! 物理内存、页表、交换盘和文件都用 [`mock`] 中的内存实现代替。

pub(crate) mod mock;

mod eviction;
