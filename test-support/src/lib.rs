//! 测试支持 crate
//!
//! 为各 crate 的宿主机单元测试提供 Mock 实现。
//!
//! 这里不依赖任何被测 crate（避免循环依赖）：Mock 只提供固有方法，
//! 被测 crate 在 `cfg(test)` 下为它们实现自己的 trait。

#![no_std]

extern crate alloc;

pub mod mock;
