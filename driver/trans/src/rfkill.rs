//! 射频开关（RF-kill）

use core::sync::atomic::{AtomicU8, Ordering};

use crate::csr::{self, gp_cntrl};
use crate::io::{CsrBus, Io};
use crate::status::{StatusFlags, TransStatus};

/// 调试覆盖：强制认为开关按下/松开，或按硬件读数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfKillOverride {
    Hardware = 0,
    ForceOn = 1,
    ForceOff = 2,
}

/// RF-kill 监视器
///
/// `is_set` 只读硬件；状态位的更新与上报由 `check`/`reconcile_after_stop` 完成，
/// 上报回调由调用方传入，这样中断路径和停止路径可以各自决定在哪个锁下通知 op-mode。
pub struct RfKillMonitor {
    debug_override: AtomicU8,
}

impl RfKillMonitor {
    pub const fn new() -> Self {
        Self {
            debug_override: AtomicU8::new(RfKillOverride::Hardware as u8),
        }
    }

    pub fn set_override(&self, ov: RfKillOverride) {
        log::info!(target: "wireless::trans::rfkill", "debug override {:?}", ov);
        self.debug_override.store(ov as u8, Ordering::Release);
    }

    fn override_state(&self) -> RfKillOverride {
        match self.debug_override.load(Ordering::Acquire) {
            1 => RfKillOverride::ForceOn,
            2 => RfKillOverride::ForceOff,
            _ => RfKillOverride::Hardware,
        }
    }

    /// 开关是否按下：HW_RF_KILL_SW 清零 = 按下
    pub fn is_set<B: CsrBus>(&self, io: &Io<B>) -> bool {
        match self.override_state() {
            RfKillOverride::ForceOn => true,
            RfKillOverride::ForceOff => false,
            RfKillOverride::Hardware => {
                io.read32(csr::CSR_GP_CNTRL) & gp_cntrl::HW_RF_KILL_SW == 0
            }
        }
    }

    /// 读开关并更新状态位；上报状态变化时调用 `report(killed)`
    ///
    /// op-mode 已停止时上报值跟随硬件，否则保持已上报值不变，由 op-mode 自己决定何时清除。
    pub fn check<B: CsrBus>(
        &self,
        io: &Io<B>,
        status: &StatusFlags,
        report: &mut dyn FnMut(bool),
    ) -> bool {
        let hw_rfkill = self.is_set(io);
        let prev = status.test(TransStatus::RFKILL_OPMODE);

        status.assign(TransStatus::RFKILL_HW, hw_rfkill);
        let reported = if status.test(TransStatus::OPMODE_DOWN) {
            hw_rfkill
        } else {
            // 运行期只会新增 kill，不会自动解除
            prev || hw_rfkill
        };
        status.assign(TransStatus::RFKILL_OPMODE, reported);

        if prev != reported {
            log::info!(target: "wireless::trans::rfkill", "RF-kill {}", if reported { "asserted" } else { "released" });
            report(reported);
        }
        hw_rfkill
    }

    /// 停止后按硬件读数同步两个 RF-kill 位，与停止前的上报值不同时上报
    pub fn reconcile_after_stop<B: CsrBus>(
        &self,
        io: &Io<B>,
        status: &StatusFlags,
        was_in_rfkill: bool,
        report: &mut dyn FnMut(bool),
    ) {
        let hw_rfkill = self.is_set(io);
        status.assign(TransStatus::RFKILL_HW | TransStatus::RFKILL_OPMODE, hw_rfkill);
        if hw_rfkill != was_in_rfkill {
            log::info!(target: "wireless::trans::rfkill", "RF-kill changed across stop: {}", hw_rfkill);
            report(hw_rfkill);
        }
    }
}

impl Default for RfKillMonitor {
    fn default() -> Self {
        Self::new()
    }
}
