//! 物理帧管理
//!
//! - [`pool`]：物理页来源与 [`FrameTracker`]
//! - [`table`]：全局帧表，驻留帧的驱逐链表与时钟置换

pub mod pool;
pub mod table;

pub use pool::{FrameTracker, PhysPool, UserPool};
pub use table::{FrameTable, LruToken};
