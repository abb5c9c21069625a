//! TX 路径：环下标运算与 TX/命令队列

pub mod queue;
pub mod ring;
