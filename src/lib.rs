//! StarryOS wireless crate
//!
//! PCIe 无线网卡的传输层封装：
//! - trans: CSR/APM、中断、RX/TX 环、host command、RF-kill
//! - skb: 帧缓冲与帧队列
//!
//! 平台探测到设备后调用 [`WirelessDevice::probe`]，再由 op-mode 通过
//! [`WirelessDevice::up`] / [`WirelessDevice::down`] 控制设备生命周期。

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;

use axerrno::AxResult;

pub use skb;
pub use trans;

use trans::{CsrBus, DmaAllocator, FwLoader, OpModeOps, TransConfig, Transport};

/// 一块无线网卡：transport + 固件镜像
pub struct WirelessDevice<B: CsrBus, D: DmaAllocator> {
    trans: Transport<B, D>,
    fw_image: &'static [u8],
}

impl<B: CsrBus, D: DmaAllocator> WirelessDevice<B, D> {
    /// 建立 transport 并取得设备所有权；之后只开 RF-kill 中断
    pub fn probe(
        cfg: TransConfig,
        bus: B,
        dma: D,
        op_mode: Arc<dyn OpModeOps>,
        loader: Box<dyn FwLoader>,
        fw_image: &'static [u8],
    ) -> AxResult<Self> {
        let trans = Transport::attach(cfg, bus, dma, op_mode, loader)?;
        trans.start_hw()?;
        log::info!(target: "wireless", "wireless: device probed, fw image {} bytes", fw_image.len());
        Ok(Self { trans, fw_image })
    }

    /// 装载固件并打开全部中断
    pub fn up(&self, run_in_rfkill: bool) -> AxResult {
        self.trans.start_hw()?;
        self.trans.start_fw(self.fw_image, run_in_rfkill)?;
        Ok(())
    }

    /// 停止设备，保留 RF-kill 中断
    pub fn down(&self) {
        self.trans.stop_device(true);
    }

    #[inline]
    pub fn transport(&self) -> &Transport<B, D> {
        &self.trans
    }
}
