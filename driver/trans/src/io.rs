//! CSR 寄存器访问
//!
//! - [`CsrBus`]：最底层 32/8 位读写，由平台提供（[`MmioBus`] 为 volatile MMIO 实现）
//! - [`Io`]：在总线之上加寄存器锁，提供 set/clear/mask 的读改写与带超时轮询
//! - [`CsrIo`]：对象安全的寄存器接口，交给 op-mode 配置钩子与固件加载器使用

use core::ptr::{read_volatile, write_volatile};

use crate::csr::{self, gp_cntrl, hbus};
use crate::sync;

/// 轮询间隔（us）
pub const POLL_INTERVAL_US: u32 = 10;

/// 寄存器总线。地址均为 CSR 空间内偏移。
pub trait CsrBus: Send + Sync {
    fn read32(&self, reg: u32) -> u32;
    fn write32(&self, reg: u32, val: u32);
    /// 单字节写，IVAR 表按字节编程
    fn write8(&self, reg: u32, val: u8);
}

/// 以映射后的 BAR0 虚拟地址为基址的 MMIO 总线
pub struct MmioBus {
    base: usize,
}

impl MmioBus {
    /// # Safety
    /// `base` 必须是已映射、在 `MmioBus` 生命周期内一直有效的设备寄存器窗口。
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl CsrBus for MmioBus {
    #[inline]
    fn read32(&self, reg: u32) -> u32 {
        unsafe { read_volatile((self.base + reg as usize) as *const u32) }
    }

    #[inline]
    fn write32(&self, reg: u32, val: u32) {
        unsafe { write_volatile((self.base + reg as usize) as *mut u32, val) }
    }

    #[inline]
    fn write8(&self, reg: u32, val: u8) {
        unsafe { write_volatile((self.base + reg as usize) as *mut u8, val) }
    }
}

/// 对象安全的寄存器接口
pub trait CsrIo {
    fn read32(&self, reg: u32) -> u32;
    fn write32(&self, reg: u32, val: u32);
    fn set_bit(&self, reg: u32, mask: u32);
    fn clear_bit(&self, reg: u32, mask: u32);
    /// 轮询直到 `(reg & mask) == (expected & mask)`，超时返回 false
    fn poll_bit(&self, reg: u32, mask: u32, expected: u32, timeout_us: u32) -> bool;
}

/// 带寄存器锁的访问层
pub struct Io<B: CsrBus> {
    bus: B,
    reg_lock: spin::Mutex<()>,
}

impl<B: CsrBus> Io<B> {
    pub const fn new(bus: B) -> Self {
        Self {
            bus,
            reg_lock: spin::Mutex::new(()),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[inline]
    pub fn read32(&self, reg: u32) -> u32 {
        self.bus.read32(reg)
    }

    #[inline]
    pub fn write32(&self, reg: u32, val: u32) {
        self.bus.write32(reg, val)
    }

    #[inline]
    pub fn write8(&self, reg: u32, val: u8) {
        self.bus.write8(reg, val)
    }

    /// 只改 `mask` 覆盖的位：`reg = (reg & !mask) | (value & mask)`
    pub fn set_bits_mask(&self, reg: u32, mask: u32, value: u32) {
        let _guard = self.reg_lock.lock();
        let v = self.bus.read32(reg);
        self.bus.write32(reg, (v & !mask) | (value & mask));
    }

    #[inline]
    pub fn set_bit(&self, reg: u32, mask: u32) {
        self.set_bits_mask(reg, mask, mask)
    }

    #[inline]
    pub fn clear_bit(&self, reg: u32, mask: u32) {
        self.set_bits_mask(reg, mask, 0)
    }

    pub fn poll_bit(&self, reg: u32, mask: u32, expected: u32, timeout_us: u32) -> bool {
        let mut waited = 0u32;
        loop {
            if self.bus.read32(reg) & mask == expected & mask {
                return true;
            }
            if waited >= timeout_us {
                return false;
            }
            sync::delay_spin_us(POLL_INTERVAL_US);
            waited += POLL_INTERVAL_US;
        }
    }

    /// 请求 MAC 访问并等待时钟就绪；PRPH 访问前调用
    fn grab_nic_access(&self) -> bool {
        self.set_bit(csr::CSR_GP_CNTRL, gp_cntrl::MAC_ACCESS_REQ);
        let ok = self.poll_bit(
            csr::CSR_GP_CNTRL,
            gp_cntrl::MAC_CLOCK_READY | gp_cntrl::GOING_TO_SLEEP,
            gp_cntrl::MAC_CLOCK_READY,
            15_000,
        );
        if !ok {
            self.clear_bit(csr::CSR_GP_CNTRL, gp_cntrl::MAC_ACCESS_REQ);
            log::warn!(target: "wireless::trans", "grab_nic_access timeout, GP_CNTRL=0x{:08x}", self.read32(csr::CSR_GP_CNTRL));
        }
        ok
    }

    /// 写外设寄存器（经 HBUS 间接访问）；拿不到 MAC 访问时返回 false
    pub fn write_prph(&self, addr: u32, val: u32) -> bool {
        if !self.grab_nic_access() {
            return false;
        }
        {
            let _guard = self.reg_lock.lock();
            self.bus
                .write32(hbus::TARG_PRPH_WADDR, (addr & 0x000F_FFFF) | (3 << 24));
            self.bus.write32(hbus::TARG_PRPH_WDAT, val);
        }
        self.clear_bit(csr::CSR_GP_CNTRL, gp_cntrl::MAC_ACCESS_REQ);
        true
    }
}

impl<B: CsrBus> CsrIo for Io<B> {
    fn read32(&self, reg: u32) -> u32 {
        Io::read32(self, reg)
    }

    fn write32(&self, reg: u32, val: u32) {
        Io::write32(self, reg, val)
    }

    fn set_bit(&self, reg: u32, mask: u32) {
        Io::set_bit(self, reg, mask)
    }

    fn clear_bit(&self, reg: u32, mask: u32) {
        Io::clear_bit(self, reg, mask)
    }

    fn poll_bit(&self, reg: u32, mask: u32, expected: u32, timeout_us: u32) -> bool {
        Io::poll_bit(self, reg, mask, expected, timeout_us)
    }
}
