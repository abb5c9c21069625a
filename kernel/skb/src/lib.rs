//! 帧缓冲（skb）
//!
//! - [`SkBuff`]：单帧缓冲，`[ headroom | data | tailroom ]`，支持 put/pull/push
//! - [`SkbQueue`]：FIFO，TX 回收时按完成顺序交还帧

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod queue;
mod skbuff;

pub use queue::SkbQueue;
pub use skbuff::SkBuff;
