//! PCIe 无线网卡传输层（gen2）
//!
//! 位于 op-mode（802.11 协议层）与设备之间，负责:
//! - CSR 寄存器访问与 APM 上电/下电、设备所有权握手
//! - 中断屏蔽（legacy/MSI + ICT，或 MSI-X）与中断下半部分发
//! - RX 缓冲池与描述符环、TX/命令环
//! - host command 下发与同步等待
//! - RF-kill 检测与上报
//!
//! 平台只需提供 [`CsrBus`]（BAR0 读写）和 [`DmaAllocator`]（一致性内存），
//! 固件镜像的解析与分段下载由 [`FwLoader`] 完成。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod csr;
pub mod dma;
pub mod error;
pub mod hcmd;
pub mod io;
pub mod irq;
pub mod ops;
pub mod power;
pub mod rfkill;
pub mod rx;
pub mod status;
pub mod sync;
pub mod tx;

mod trans;

#[cfg(test)]
pub mod sim;

pub use config::{DeviceFamily, IrqMode, TransConfig};
pub use dma::{DmaAllocator, DmaBuf};
pub use error::{TransError, TransResult};
pub use hcmd::{CmdFlags, HostCmd};
pub use io::{CsrBus, CsrIo, Io, MmioBus};
pub use irq::IsrStats;
pub use ops::{FwLoader, FwMemory, OpModeOps, RingBases};
pub use rfkill::RfKillOverride;
pub use rx::packet::RxPacket;
pub use status::TransStatus;
pub use trans::{DeviceState, Transport};
