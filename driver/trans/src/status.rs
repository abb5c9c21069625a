//! 传输层状态位
//!
//! 各位相互独立，统一存放在一个原子字中；中断路径只读写这里，不拿 transport 互斥锁。

use core::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransStatus: u32 {
        /// APM 时钟就绪后置位，APM 停止时序开始前清除
        const DEVICE_ENABLED = 1 << 0;
        const INT_ENABLED = 1 << 1;
        /// 同步 host command 进行中，同一时刻最多一条
        const SYNC_HCMD_ACTIVE = 1 << 2;
        const TPOWER_PMI = 1 << 3;
        /// 硬件开关当前读数
        const RFKILL_HW = 1 << 4;
        /// 已上报给 op-mode 的 RF-kill 状态
        const RFKILL_OPMODE = 1 << 5;
        const FW_ERROR = 1 << 6;
        /// 设备处于停止态，需 start_hw 后才能 start_fw
        const IS_DOWN = 1 << 7;
        /// op-mode 已请求停止
        const OPMODE_DOWN = 1 << 8;
    }
}

/// [`TransStatus`] 的原子存储
pub struct StatusFlags(AtomicU32);

impl StatusFlags {
    pub const fn new(init: TransStatus) -> Self {
        Self(AtomicU32::new(init.bits()))
    }

    #[inline]
    pub fn get(&self) -> TransStatus {
        TransStatus::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn test(&self, flag: TransStatus) -> bool {
        self.get().contains(flag)
    }

    #[inline]
    pub fn set(&self, flag: TransStatus) {
        self.0.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn clear(&self, flag: TransStatus) {
        self.0.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn assign(&self, flag: TransStatus, on: bool) {
        if on {
            self.set(flag)
        } else {
            self.clear(flag)
        }
    }

    /// 置位并返回此前是否已置位
    #[inline]
    pub fn test_and_set(&self, flag: TransStatus) -> bool {
        self.0.fetch_or(flag.bits(), Ordering::AcqRel) & flag.bits() == flag.bits()
    }

    /// 清除并返回此前是否已置位
    #[inline]
    pub fn test_and_clear(&self, flag: TransStatus) -> bool {
        self.0.fetch_and(!flag.bits(), Ordering::AcqRel) & flag.bits() == flag.bits()
    }
}
