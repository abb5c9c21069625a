//! 传输层配置

/// 芯片系列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceFamily {
    F8000,
    F9000,
    F22000,
}

/// 中断投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// 单向量 INTx/MSI，配合 ICT 表
    Legacy,
    /// 多向量 MSI-X，屏蔽寄存器位清零 = 使能
    Msix,
}

/// 传输层配置，attach 时确定，运行期只读
#[derive(Debug, Clone)]
pub struct TransConfig {
    pub family: DeviceFamily,
    pub irq_mode: IrqMode,
    /// MSI-X 已分配向量数；非 RX 原因映射到最后一个向量
    pub msix_vectors: u8,
    /// RX 描述符环大小（2 的幂）
    pub rx_queue_size: usize,
    /// RX 缓冲池大小（vid 必须能放进 12 位）
    pub rx_pool_size: usize,
    pub rx_buf_size: usize,
    /// TX 队列总数（含命令队列）
    pub num_tx_queues: usize,
    pub cmd_queue: usize,
    /// 每个 TX/命令槽位的首 TB 缓冲大小
    pub tx_slot_size: usize,
    /// 链路启用 ASPM L1 时关闭 L0s
    pub aspm_l1: bool,
    pub hcmd_timeout_ms: u32,
}

impl TransConfig {
    pub const fn default_const() -> Self {
        Self {
            family: DeviceFamily::F22000,
            irq_mode: IrqMode::Msix,
            msix_vectors: 2,
            rx_queue_size: 256,
            rx_pool_size: 512,
            rx_buf_size: 4096,
            num_tx_queues: 4,
            cmd_queue: 0,
            tx_slot_size: 2048,
            aspm_l1: true,
            hcmd_timeout_ms: 2000,
        }
    }
}

impl Default for TransConfig {
    fn default() -> Self {
        Self::default_const()
    }
}
