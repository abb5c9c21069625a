//! 外部协作方接口：op-mode 回调与固件加载器
//!
//! 两者都由上层实现并在 attach 时交给 transport；带默认实现的回调可按需覆盖。

use alloc::vec::Vec;

use crate::dma::{DmaAllocator, DmaBuf};
use crate::error::TransResult;
use crate::io::CsrIo;
use crate::rx::packet::RxPacket;

/// op-mode（802.11 层）回调
pub trait OpModeOps: Send + Sync {
    /// NIC 上电后、固件加载前的设备相关配置
    fn nic_config(&self, _io: &dyn CsrIo) {}
    /// RF-kill 上报状态变化
    fn hw_rf_kill(&self, killed: bool);
    /// 固件或硬件报错
    fn nic_error(&self) {}
    /// 设备上送的每个包（含命令响应）
    ///
    /// 在中断下半部、持有 RX 队列锁时调用。可以下发 `ASYNC` 命令，
    /// 不能下发同步命令：等待响应要重入 RX 处理，会在 RX 队列锁上死锁。
    fn rx(&self, pkt: &RxPacket<'_>);
    /// 数据队列低于高水位，应暂停该队列发包
    fn queue_full(&self, _txq: u32) {}
    /// 数据队列恢复到低水位以上
    fn queue_not_full(&self, _txq: u32) {}
}

/// 固件加载器需要的环基址
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingBases {
    pub rx_bd: u64,
    pub rx_used_bd: u64,
    pub rx_rb_stts: u64,
    pub cmd_tfds: u64,
    pub cmd_queue: u32,
}

/// 加载器分配、transport 持有的固件内存
#[derive(Default)]
pub struct FwMemory {
    /// 仅启动阶段需要，alive 后释放
    pub boot: Vec<DmaBuf>,
    /// 固件运行期分页内存，停止设备时才释放
    pub paging: Vec<DmaBuf>,
}

impl FwMemory {
    pub fn free_boot(&mut self, dma: &mut dyn DmaAllocator) {
        for b in self.boot.drain(..) {
            dma.free_coherent(b);
        }
    }

    pub fn free_all(&mut self, dma: &mut dyn DmaAllocator) {
        self.free_boot(dma);
        for b in self.paging.drain(..) {
            dma.free_coherent(b);
        }
    }
}

/// 固件加载器：不解析镜像，只负责把它交给设备
pub trait FwLoader: Send {
    fn load(
        &mut self,
        io: &dyn CsrIo,
        rings: &RingBases,
        image: &[u8],
        dma: &mut dyn DmaAllocator,
    ) -> TransResult<FwMemory>;
}
