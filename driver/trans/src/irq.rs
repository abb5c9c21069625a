//! 中断屏蔽与 ICT 表
//!
//! legacy/MSI 模式下 `CSR_INT_MASK` 位置位 = 使能；MSI-X 模式下 FH/HW 两个屏蔽寄存器
//! 位清零 = 使能。极性只在本模块出现：调用方按 [`IrqCause`] 命名原因，不直接写掩码。
//!
//! 所有方法都要求调用方持有 transport 的中断自旋锁（`spin::Mutex<InterruptController>`）。

use crate::config::{DeviceFamily, IrqMode, TransConfig};
use crate::csr::{self, gp_cntrl, ict, int, msix, prph};
use crate::dma::DmaBuf;
use crate::io::{CsrBus, Io};
use crate::status::{StatusFlags, TransStatus};

/// MSI-X 原因所在的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqDomain {
    Fh,
    Hw,
}

/// 中断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqCause {
    Alive,
    Wakeup,
    RfKill,
    CtKill,
    SwErr,
    HwErr,
    /// FH TX DMA 完成（固件分段加载）
    FhTx,
    Scd,
    Periodic,
    Rx,
    FhErr,
}

impl IrqCause {
    /// legacy 模式下在 CSR_INT 中的位
    pub const fn legacy_bits(self) -> u32 {
        match self {
            IrqCause::Alive => int::ALIVE,
            IrqCause::Wakeup => int::WAKEUP,
            IrqCause::RfKill => int::RF_KILL,
            IrqCause::CtKill => int::CT_KILL,
            IrqCause::SwErr => int::SW_ERR,
            IrqCause::HwErr => int::HW_ERR,
            IrqCause::FhTx => int::FH_TX,
            IrqCause::Scd => int::SCD,
            IrqCause::Periodic => int::RX_PERIODIC,
            IrqCause::Rx => int::FH_RX | int::SW_RX,
            // legacy 下 FH 错误经 CSR_FH_INT_STATUS 上报，归入 HW_ERR
            IrqCause::FhErr => int::HW_ERR,
        }
    }

    /// MSI-X 模式下所在寄存器与位
    pub const fn msix_bits(self) -> (IrqDomain, u32) {
        use csr::msix::{fh_cause, hw_cause};
        match self {
            IrqCause::Alive => (IrqDomain::Hw, hw_cause::ALIVE),
            IrqCause::Wakeup => (IrqDomain::Hw, hw_cause::WAKEUP),
            IrqCause::RfKill => (IrqDomain::Hw, hw_cause::RF_KILL),
            IrqCause::CtKill => (IrqDomain::Hw, hw_cause::CT_KILL),
            IrqCause::SwErr => (IrqDomain::Hw, hw_cause::SW_ERR),
            IrqCause::HwErr => (IrqDomain::Hw, hw_cause::HW_ERR),
            IrqCause::FhTx => (IrqDomain::Fh, fh_cause::D2S_CH0_NUM),
            IrqCause::Scd => (IrqDomain::Hw, hw_cause::SCD),
            IrqCause::Periodic => (IrqDomain::Hw, hw_cause::PERIODIC),
            IrqCause::Rx => (IrqDomain::Fh, fh_cause::Q0),
            IrqCause::FhErr => (IrqDomain::Fh, fh_cause::FH_ERR),
        }
    }
}

/// 非 RX 原因：(IVAR 字节偏移, 所在屏蔽寄存器, 原因位)
const NON_RX_CAUSES: [(u32, IrqDomain, u32); 14] = {
    use csr::msix::{fh_cause, hw_cause, ivar_cause};
    [
        (ivar_cause::D2S_CH0_NUM, IrqDomain::Fh, fh_cause::D2S_CH0_NUM),
        (ivar_cause::D2S_CH1_NUM, IrqDomain::Fh, fh_cause::D2S_CH1_NUM),
        (ivar_cause::S2D_UCODE_INT, IrqDomain::Fh, fh_cause::S2D),
        (ivar_cause::FH_ERR, IrqDomain::Fh, fh_cause::FH_ERR),
        (ivar_cause::REG_ALIVE, IrqDomain::Hw, hw_cause::ALIVE),
        (ivar_cause::REG_WAKEUP, IrqDomain::Hw, hw_cause::WAKEUP),
        (ivar_cause::REG_CT_KILL, IrqDomain::Hw, hw_cause::CT_KILL),
        (ivar_cause::REG_RF_KILL, IrqDomain::Hw, hw_cause::RF_KILL),
        (ivar_cause::REG_PERIODIC, IrqDomain::Hw, hw_cause::PERIODIC),
        (ivar_cause::REG_SW_ERR, IrqDomain::Hw, hw_cause::SW_ERR),
        (ivar_cause::REG_SCD, IrqDomain::Hw, hw_cause::SCD),
        (ivar_cause::REG_FH_TX, IrqDomain::Hw, hw_cause::FH_TX),
        (ivar_cause::REG_HW_ERR, IrqDomain::Hw, hw_cause::HW_ERR),
        (ivar_cause::REG_HAP, IrqDomain::Hw, hw_cause::HAP),
    ]
};

/// 各原因的中断计数
#[derive(Debug, Clone, Default)]
pub struct IsrStats {
    pub hw: u32,
    pub sw: u32,
    pub err_code: u32,
    pub sch: u32,
    pub alive: u32,
    pub rfkill: u32,
    pub ctkill: u32,
    pub wakeup: u32,
    pub rx: u32,
    pub tx: u32,
    pub unhandled: u32,
    /// RX used 环中非法 vid
    pub invalid_vid: u32,
}

/// legacy 模式下的中断原因表（ICT），设备把 CSR_INT 快照按顺序写入
pub struct IctTable {
    table: DmaBuf,
    index: usize,
    enabled: bool,
}

impl IctTable {
    pub fn new(table: DmaBuf) -> Self {
        Self {
            table,
            index: 0,
            enabled: false,
        }
    }

    pub fn into_inner(self) -> DmaBuf {
        self.table
    }

    /// 取出并清零从当前下标开始的全部非零项，折叠成 CSR_INT 布局
    fn read_causes(&mut self) -> u32 {
        let mut read = self.table.read_u32(self.index * 4);
        if read == 0 {
            return 0;
        }
        let mut val = 0u32;
        while read != 0 {
            val |= read;
            self.table.write_u32(self.index * 4, 0);
            self.index = (self.index + 1) & (ict::COUNT - 1);
            read = self.table.read_u32(self.index * 4);
        }
        // 设备被拔出时全 1
        if val == 0xffff_ffff {
            val = 0;
        }
        // RX 中断位 18/19 偶发丢失，用 bit 15 补上
        if val & 0x000C_0000 != 0 {
            val |= 0x8000;
        }
        (val & 0xff) | ((val & 0xff00) << 16)
    }
}

pub struct InterruptController {
    mode: IrqMode,
    family: DeviceFamily,
    msix_vectors: u8,
    /// legacy：当前写入 CSR_INT_MASK 的值
    inta_mask: u32,
    /// MSI-X：已在 IVAR 中配置的原因全集
    fh_init_mask: u32,
    hw_init_mask: u32,
    /// MSI-X：当前使能的原因（寄存器中写入其补码）
    fh_mask: u32,
    hw_mask: u32,
    ict: Option<IctTable>,
    pub stats: IsrStats,
}

impl InterruptController {
    pub fn new(cfg: &TransConfig, ict_table: Option<DmaBuf>) -> Self {
        Self {
            mode: cfg.irq_mode,
            family: cfg.family,
            msix_vectors: cfg.msix_vectors.max(1),
            inta_mask: 0,
            fh_init_mask: 0,
            hw_init_mask: 0,
            fh_mask: 0,
            hw_mask: 0,
            ict: ict_table.map(IctTable::new),
            stats: IsrStats::default(),
        }
    }

    #[inline]
    pub fn mode(&self) -> IrqMode {
        self.mode
    }

    #[inline]
    pub fn inta_mask(&self) -> u32 {
        self.inta_mask
    }

    /// MSI-X 当前使能的 (FH, HW) 原因
    #[inline]
    pub fn msix_masks(&self) -> (u32, u32) {
        (self.fh_mask, self.hw_mask)
    }

    #[inline]
    pub fn msix_init_masks(&self) -> (u32, u32) {
        (self.fh_init_mask, self.hw_init_mask)
    }

    #[inline]
    pub fn use_ict(&self) -> bool {
        self.ict.as_ref().map(|t| t.enabled).unwrap_or(false)
    }

    pub fn take_ict_table(&mut self) -> Option<DmaBuf> {
        self.ict.take().map(IctTable::into_inner)
    }

    /// 关闭全部中断并清除挂起原因
    pub fn disable<B: CsrBus>(&mut self, io: &Io<B>, status: &StatusFlags) {
        status.clear(TransStatus::INT_ENABLED);
        match self.mode {
            IrqMode::Legacy => {
                io.write32(csr::CSR_INT_MASK, 0);
                // 关屏蔽后再清挂起原因
                io.write32(csr::CSR_INT, 0xffff_ffff);
                io.write32(csr::CSR_FH_INT_STATUS, 0xffff_ffff);
            }
            IrqMode::Msix => {
                io.write32(msix::FH_INT_MASK_AD, self.fh_init_mask);
                io.write32(msix::HW_INT_MASK_AD, self.hw_init_mask);
            }
        }
        log::debug!(target: "wireless::trans::irq", "interrupts disabled");
    }

    /// 使能全部已配置原因
    pub fn enable<B: CsrBus>(&mut self, io: &Io<B>, status: &StatusFlags) {
        status.set(TransStatus::INT_ENABLED);
        match self.mode {
            IrqMode::Legacy => {
                self.inta_mask = int::INI_SET_MASK;
                io.write32(csr::CSR_INT_MASK, self.inta_mask);
            }
            IrqMode::Msix => {
                self.fh_mask = self.fh_init_mask;
                self.hw_mask = self.hw_init_mask;
                io.write32(msix::FH_INT_MASK_AD, !self.fh_mask);
                io.write32(msix::HW_INT_MASK_AD, !self.hw_mask);
            }
        }
        log::debug!(target: "wireless::trans::irq", "interrupts enabled");
    }

    fn write_domain<B: CsrBus>(&self, io: &Io<B>, domain: IrqDomain) {
        match domain {
            IrqDomain::Fh => io.write32(msix::FH_INT_MASK_AD, !self.fh_mask),
            IrqDomain::Hw => io.write32(msix::HW_INT_MASK_AD, !self.hw_mask),
        }
    }

    pub fn enable_cause<B: CsrBus>(&mut self, io: &Io<B>, cause: IrqCause) {
        match self.mode {
            IrqMode::Legacy => {
                self.inta_mask |= cause.legacy_bits();
                io.write32(csr::CSR_INT_MASK, self.inta_mask);
            }
            IrqMode::Msix => {
                let (domain, bit) = cause.msix_bits();
                match domain {
                    IrqDomain::Fh => self.fh_mask |= bit,
                    IrqDomain::Hw => self.hw_mask |= bit,
                }
                self.write_domain(io, domain);
            }
        }
    }

    pub fn disable_cause<B: CsrBus>(&mut self, io: &Io<B>, cause: IrqCause) {
        match self.mode {
            IrqMode::Legacy => {
                self.inta_mask &= !cause.legacy_bits();
                io.write32(csr::CSR_INT_MASK, self.inta_mask);
            }
            IrqMode::Msix => {
                let (domain, bit) = cause.msix_bits();
                match domain {
                    IrqDomain::Fh => self.fh_mask &= !bit,
                    IrqDomain::Hw => self.hw_mask &= !bit,
                }
                self.write_domain(io, domain);
            }
        }
    }

    /// 只使能 `causes`，其余全部屏蔽；MSI-X 下没有原因的寄存器写回 init 掩码
    pub fn enable_only<B: CsrBus>(&mut self, io: &Io<B>, causes: &[IrqCause]) {
        match self.mode {
            IrqMode::Legacy => {
                self.inta_mask = causes.iter().fold(0, |m, c| m | c.legacy_bits());
                io.write32(csr::CSR_INT_MASK, self.inta_mask);
            }
            IrqMode::Msix => {
                let mut fh = 0;
                let mut hw = 0;
                for c in causes {
                    match c.msix_bits() {
                        (IrqDomain::Fh, bit) => fh |= bit,
                        (IrqDomain::Hw, bit) => hw |= bit,
                    }
                }
                self.fh_mask = fh;
                self.hw_mask = hw;
                if fh == 0 {
                    io.write32(msix::FH_INT_MASK_AD, self.fh_init_mask);
                } else {
                    io.write32(msix::FH_INT_MASK_AD, !fh);
                }
                if hw == 0 {
                    io.write32(msix::HW_INT_MASK_AD, self.hw_init_mask);
                } else {
                    io.write32(msix::HW_INT_MASK_AD, !hw);
                }
            }
        }
    }

    /// 停止态只保留 RF-kill，保证开关变化仍可被观察到
    pub fn enable_rfkill_only<B: CsrBus>(&mut self, io: &Io<B>) {
        log::debug!(target: "wireless::trans::irq", "enabling rfkill interrupt");
        self.enable_only(io, &[IrqCause::RfKill]);
        if self.family == DeviceFamily::F9000 {
            // L1A 下 RF-kill 可唤醒设备
            io.set_bit(csr::CSR_GP_CNTRL, gp_cntrl::RFKILL_WAKE_L1A_EN);
        }
    }

    /// 固件加载期间只等 FH TX 完成
    pub fn enable_fw_load_only<B: CsrBus>(&mut self, io: &Io<B>) {
        log::debug!(target: "wireless::trans::irq", "enabling fw load interrupt");
        self.enable_only(io, &[IrqCause::FhTx]);
    }

    /// 编程 IVAR 表并重新计算 init 掩码
    ///
    /// 软复位会擦除 IVAR，复位后必须重新配置，否则 RF-kill 中断丢失。
    /// 只写 CSR，不轮询；UMAC 侧的模式选择见 [`select_umac_irq_mode`]。
    pub fn configure_msix_hw<B: CsrBus>(&mut self, io: &Io<B>) {
        if self.mode != IrqMode::Msix {
            return;
        }

        // RX 队列 0 独占向量 0；非 RX 原因走最后一个向量
        io.write8(msix::rx_ivar(0), msix::NON_AUTO_CLEAR_CAUSE);
        io.clear_bit(msix::FH_INT_MASK_AD, msix::fh_cause::queue(0));

        let def_vector = self.msix_vectors - 1;
        let val = def_vector | msix::NON_AUTO_CLEAR_CAUSE;
        for &(ivar, domain, bit) in NON_RX_CAUSES.iter() {
            io.write8(msix::ivar(ivar), val);
            let reg = match domain {
                IrqDomain::Fh => msix::FH_INT_MASK_AD,
                IrqDomain::Hw => msix::HW_INT_MASK_AD,
            };
            io.clear_bit(reg, bit);
        }

        self.fh_init_mask = !io.read32(msix::FH_INT_MASK_AD);
        self.fh_mask = self.fh_init_mask;
        self.hw_init_mask = !io.read32(msix::HW_INT_MASK_AD);
        self.hw_mask = self.hw_init_mask;
        log::debug!(
            target: "wireless::trans::irq",
            "msix configured: fh_init=0x{:08x} hw_init=0x{:08x} def_vector={}",
            self.fh_init_mask,
            self.hw_init_mask,
            def_vector
        );
    }

    /// 清零 ICT 表、把基址告知设备并重新使能中断；没有 ICT 表时只使能中断
    pub fn reset_ict<B: CsrBus>(&mut self, io: &Io<B>, status: &StatusFlags) {
        if self.ict.is_none() {
            self.enable(io, status);
            return;
        }
        self.disable(io, status);
        if let Some(t) = self.ict.as_mut() {
            t.table.zero();
            let val = (t.table.bus_addr() >> ict::SHIFT) as u32
                | ict::ENABLE
                | ict::WRAP_CHECK
                | ict::WRITE_POINTER;
            log::debug!(target: "wireless::trans::irq", "CSR_DRAM_INT_TBL_REG = 0x{:08x}", val);
            io.write32(csr::CSR_DRAM_INT_TBL_REG, val);
            t.enabled = true;
            t.index = 0;
        }
        io.write32(csr::CSR_INT, self.inta_mask);
        self.enable(io, status);
    }

    pub fn disable_ict(&mut self) {
        if let Some(t) = self.ict.as_mut() {
            t.enabled = false;
        }
    }

    /// legacy：取本次中断原因（ICT 或直接读 CSR_INT）
    pub fn read_legacy_causes<B: CsrBus>(&mut self, io: &Io<B>) -> u32 {
        match self.ict.as_mut() {
            Some(t) if t.enabled => t.read_causes(),
            _ => io.read32(csr::CSR_INT),
        }
    }

    /// legacy：应答原因；未使能的挂起位一并清除
    pub fn ack_legacy<B: CsrBus>(&self, io: &Io<B>, inta: u32) {
        io.write32(csr::CSR_INT, inta | !self.inta_mask);
    }

    /// legacy：处理期间临时屏蔽，记录的掩码不变
    pub fn mask_legacy<B: CsrBus>(&self, io: &Io<B>) {
        if self.mode == IrqMode::Legacy {
            io.write32(csr::CSR_INT_MASK, 0);
        }
    }

    /// legacy：按记录的掩码恢复
    pub fn restore_legacy<B: CsrBus>(&self, io: &Io<B>) {
        if self.mode == IrqMode::Legacy {
            io.write32(csr::CSR_INT_MASK, self.inta_mask);
        }
    }

    /// MSI-X：读取并应答 (FH, HW) 原因
    pub fn take_msix_causes<B: CsrBus>(&self, io: &Io<B>) -> (u32, u32) {
        let fh = io.read32(msix::FH_INT_CAUSES_AD);
        let hw = io.read32(msix::HW_INT_CAUSES_AD);
        io.write32(msix::FH_INT_CAUSES_AD, fh);
        io.write32(msix::HW_INT_CAUSES_AD, hw);
        (fh & self.fh_mask, hw & self.hw_mask)
    }

    /// MSI-X：解除向量自动屏蔽
    pub fn clear_automask<B: CsrBus>(&self, io: &Io<B>) {
        if self.mode == IrqMode::Msix {
            let vectors = (1u32 << self.msix_vectors) - 1;
            io.write32(msix::AUTOMASK_ST_AD, vectors);
        }
    }

    /// 模拟设备向 ICT 表写入一项
    #[cfg(test)]
    pub fn ict_inject(&mut self, slot: usize, val: u32) {
        if let Some(t) = self.ict.as_mut() {
            let off = ((t.index + slot) & (ict::COUNT - 1)) * 4;
            t.table.write_u32(off, val);
        }
    }
}

/// 告诉 UMAC 中断走 MSI-X
///
/// 经 PRPH 写入，会轮询 MAC 访问，不能在 irq 锁内调用。设备未上电时跳过。
pub fn select_umac_irq_mode<B: CsrBus>(io: &Io<B>, cfg: &TransConfig, status: &StatusFlags) {
    if cfg.irq_mode != IrqMode::Msix || cfg.family < DeviceFamily::F9000 {
        return;
    }
    if !status.test(TransStatus::DEVICE_ENABLED) {
        log::debug!(target: "wireless::trans::irq", "device not enabled, skip UREG_CHICK");
        return;
    }
    io.write_prph(prph::UREG_CHICK, prph::UREG_CHICK_MSIX_ENABLE);
}
