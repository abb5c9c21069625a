//! 单元测试用的寄存器与 DMA 模拟
//!
//! `SimBus` 只模拟 transport 依赖的那部分硬件行为：写 1 清除的状态寄存器、
//! 软复位擦除 IVAR 并重置 MSI-X 屏蔽、MAC 时钟就绪、NIC_READY 与 RF-kill 开关。

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::csr::{self, fh_rx, gp_cntrl, hw_if_config, int, msix, reset};
use crate::dma::{DmaAllocator, DmaBuf};
use crate::io::CsrBus;

/// 写 1 清除的寄存器
const W1C_REGS: [u32; 4] = [
    csr::CSR_INT,
    csr::CSR_FH_INT_STATUS,
    msix::FH_INT_CAUSES_AD,
    msix::HW_INT_CAUSES_AD,
];

struct SimState {
    regs: BTreeMap<u32, u32>,
    bytes: BTreeMap<u32, u8>,
    log: Vec<(u32, u32)>,
    clock_ready: bool,
    nic_owned: bool,
    rf_kill: bool,
    rfkill_irq_on_reset: bool,
    sw_resets: usize,
}

/// 克隆共享同一份寄存器状态，测试可在 transport 持有总线时继续操作硬件
#[derive(Clone)]
pub struct SimBus {
    st: Arc<spin::Mutex<SimState>>,
}

impl SimBus {
    pub fn new() -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(msix::FH_INT_MASK_AD, 0xffff_ffff);
        regs.insert(msix::HW_INT_MASK_AD, 0xffff_ffff);
        Self {
            st: Arc::new(spin::Mutex::new(SimState {
                regs,
                bytes: BTreeMap::new(),
                log: Vec::new(),
                clock_ready: true,
                nic_owned: true,
                rf_kill: false,
                rfkill_irq_on_reset: false,
                sw_resets: 0,
            })),
        }
    }

    /// 寄存器中保存的原始值（不含派生位）
    pub fn peek(&self, reg: u32) -> u32 {
        self.st.lock().regs.get(&reg).copied().unwrap_or(0)
    }

    /// 直接改寄存器，不记入写日志
    pub fn poke(&self, reg: u32, val: u32) {
        self.st.lock().regs.insert(reg, val);
    }

    pub fn peek8(&self, reg: u32) -> Option<u8> {
        self.st.lock().bytes.get(&reg).copied()
    }

    /// 设备置位中断原因
    pub fn raise(&self, reg: u32, bits: u32) {
        *self.st.lock().regs.entry(reg).or_insert(0) |= bits;
    }

    pub fn set_clock_ready(&self, ready: bool) {
        self.st.lock().clock_ready = ready;
    }

    pub fn set_nic_owned(&self, owned: bool) {
        self.st.lock().nic_owned = owned;
    }

    pub fn set_rf_kill(&self, killed: bool) {
        self.st.lock().rf_kill = killed;
    }

    /// 部分硬件在 RF-kill 按下时，软复位会顺带挂起 RF-kill 中断
    pub fn set_rfkill_irq_on_reset(&self, on: bool) {
        self.st.lock().rfkill_irq_on_reset = on;
    }

    pub fn clear_log(&self) {
        self.st.lock().log.clear();
    }

    pub fn write_log(&self) -> Vec<(u32, u32)> {
        self.st.lock().log.clone()
    }

    pub fn writes_to(&self, reg: u32) -> Vec<u32> {
        self.st
            .lock()
            .log
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn sw_reset_count(&self) -> usize {
        self.st.lock().sw_resets
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrBus for SimBus {
    fn read32(&self, reg: u32) -> u32 {
        let st = self.st.lock();
        let raw = st.regs.get(&reg).copied().unwrap_or(0);
        match reg {
            csr::CSR_GP_CNTRL => {
                let mut v = raw & !(gp_cntrl::MAC_CLOCK_READY | gp_cntrl::HW_RF_KILL_SW);
                if st.clock_ready
                    && raw & (gp_cntrl::INIT_DONE | gp_cntrl::MAC_ACCESS_REQ) != 0
                {
                    v |= gp_cntrl::MAC_CLOCK_READY;
                }
                if !st.rf_kill {
                    v |= gp_cntrl::HW_RF_KILL_SW;
                }
                v
            }
            csr::CSR_HW_IF_CONFIG_REG if !st.nic_owned => raw & !hw_if_config::NIC_READY,
            fh_rx::MEM_RSSR_RX_STATUS_REG => raw | fh_rx::RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
            _ => raw,
        }
    }

    fn write32(&self, reg: u32, val: u32) {
        let mut st = self.st.lock();
        st.log.push((reg, val));
        if W1C_REGS.contains(&reg) {
            *st.regs.entry(reg).or_insert(0) &= !val;
            return;
        }
        let mut stored = val;
        if reg == csr::CSR_RESET {
            if val & reset::SW_RESET != 0 {
                st.sw_resets += 1;
                st.bytes.clear();
                st.regs.insert(msix::FH_INT_MASK_AD, 0xffff_ffff);
                st.regs.insert(msix::HW_INT_MASK_AD, 0xffff_ffff);
                if st.rfkill_irq_on_reset && st.rf_kill {
                    *st.regs.entry(csr::CSR_INT).or_insert(0) |= int::RF_KILL;
                    *st.regs.entry(msix::HW_INT_CAUSES_AD).or_insert(0) |= msix::hw_cause::RF_KILL;
                }
                stored &= !reset::SW_RESET;
            }
            if val & reset::STOP_MASTER != 0 {
                stored |= reset::MASTER_DISABLED;
            }
        }
        st.regs.insert(reg, stored);
    }

    fn write8(&self, reg: u32, val: u8) {
        let mut st = self.st.lock();
        st.log.push((reg, val as u32));
        st.bytes.insert(reg, val);
    }
}

/// 模拟 DMA 分配器：页对齐、已清零，总线地址单调递增不复用
#[derive(Clone)]
pub struct SimDma {
    live: Arc<AtomicUsize>,
    next_bus: Arc<AtomicUsize>,
    /// 还允许成功的分配次数
    budget: Arc<AtomicUsize>,
}

const SIM_PAGE: usize = 4096;

impl SimDma {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            next_bus: Arc::new(AtomicUsize::new(0x1000_0000)),
            budget: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    /// 尚未归还的缓冲数
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// 再成功 `n` 次后开始失败
    pub fn fail_after(&self, n: usize) {
        self.budget.store(n, Ordering::SeqCst);
    }
}

impl Default for SimDma {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for SimDma {
    fn alloc_coherent(&mut self, len: usize) -> Option<DmaBuf> {
        let budget = self.budget.load(Ordering::SeqCst);
        if budget == 0 {
            return None;
        }
        if budget != usize::MAX {
            self.budget.store(budget - 1, Ordering::SeqCst);
        }
        let layout = Layout::from_size_align(len.max(1), SIM_PAGE).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        let span = (len.max(1) + SIM_PAGE - 1) & !(SIM_PAGE - 1);
        let bus = self.next_bus.fetch_add(span, Ordering::SeqCst) as u64;
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(unsafe { DmaBuf::from_raw(bus, ptr, len) })
    }

    fn free_coherent(&mut self, buf: DmaBuf) {
        let layout = match Layout::from_size_align(buf.len().max(1), SIM_PAGE) {
            Ok(l) => l,
            Err(_) => return,
        };
        unsafe { dealloc(buf.vaddr().as_ptr(), layout) };
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
