//! RX 路径：缓冲池、描述符环与页内包格式

pub mod allocator;
pub mod packet;
pub mod queue;
