//! 中断下半部
//!
//! 平台在中断上下文（或线程化中断）中调用 [`Transport::handle_interrupt`]。
//! 这里只拿 `irq`、`rxq`、`txqs`、`hcmd` 这些细粒度锁，不拿生命周期互斥锁。

use crate::config::IrqMode;
use crate::csr::{self, fh_int, gp_cntrl, int, msix};
use crate::dma::DmaAllocator;
use crate::io::CsrBus;
use crate::irq::IsrStats;
use crate::rx::packet::RxPacketIter;
use crate::status::TransStatus;

use super::Transport;

/// 设备掉线时读到的值
const HW_GONE: u32 = 0xffff_ffff;
const HW_ERROR_VALUE: u32 = 0xa5a5_a5a0;
const HW_ERROR_MASK: u32 = 0xffff_fff0;

impl<B: CsrBus, D: DmaAllocator> Transport<B, D> {
    /// 处理全部挂起的中断原因，有原因被处理时返回 true
    pub fn handle_interrupt(&self) -> bool {
        match self.cfg.irq_mode {
            IrqMode::Legacy => self.isr_legacy(),
            IrqMode::Msix => self.isr_msix(),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut IsrStats)) {
        f(&mut self.irq.lock().stats);
    }

    fn isr_legacy(&self) -> bool {
        let inta = {
            let mut irq = self.irq.lock();
            irq.mask_legacy(&self.io);
            let inta = irq.read_legacy_causes(&self.io);

            if inta == HW_GONE || inta & HW_ERROR_MASK == HW_ERROR_VALUE {
                log::warn!(target: "wireless::trans::irq", "HW gone? INTA == 0x{:08x}", inta);
                return false;
            }
            if inta == 0 {
                irq.restore_legacy(&self.io);
                return false;
            }
            if inta & !irq.inta_mask() != 0 {
                log::debug!(target: "wireless::trans::irq", "masked interrupt 0x{:08x}", inta & !irq.inta_mask());
            }
            let inta = inta & irq.inta_mask();
            irq.ack_legacy(&self.io, inta);
            inta
        };
        log::trace!(target: "wireless::trans::irq", "ISR inta 0x{:08x}", inta);

        let mut handled = 0u32;

        if inta & int::HW_ERR != 0 {
            log::error!(target: "wireless::trans::irq", "hardware error detected, restarting");
            {
                let mut irq = self.irq.lock();
                irq.stats.hw += 1;
                irq.disable(&self.io, &self.status);
            }
            self.handle_fw_error();
            // 中断保持关闭，等 op-mode 重启设备
            return true;
        }

        if inta & int::SCD != 0 {
            handled |= int::SCD;
            self.bump(|s| s.sch += 1);
        }

        if inta & int::ALIVE != 0 {
            handled |= int::ALIVE;
            log::debug!(target: "wireless::trans::irq", "alive interrupt");
            self.bump(|s| s.alive += 1);
            self.restock_rx();
        }

        if inta & int::RF_KILL != 0 {
            handled |= int::RF_KILL;
            self.bump(|s| s.rfkill += 1);
            self.handle_rfkill_irq();
        }

        if inta & int::CT_KILL != 0 {
            handled |= int::CT_KILL;
            log::error!(target: "wireless::trans::irq", "microcode CT kill error detected");
            self.bump(|s| s.ctkill += 1);
        }

        if inta & int::SW_ERR != 0 {
            handled |= int::SW_ERR;
            log::error!(target: "wireless::trans::irq", "microcode SW error detected, restarting 0x{:x}", inta);
            self.bump(|s| s.sw += 1);
            self.handle_fw_error();
        }

        if inta & int::WAKEUP != 0 {
            handled |= int::WAKEUP;
            log::debug!(target: "wireless::trans::irq", "wakeup interrupt");
            self.bump(|s| s.wakeup += 1);
        }

        if inta & (int::FH_RX | int::SW_RX | int::RX_PERIODIC) != 0 {
            if inta & (int::FH_RX | int::SW_RX) != 0 {
                handled |= inta & (int::FH_RX | int::SW_RX);
                self.io.write32(csr::CSR_FH_INT_STATUS, fh_int::RX_MASK);
            }
            if inta & int::RX_PERIODIC != 0 {
                handled |= int::RX_PERIODIC;
                self.io.write32(csr::CSR_INT, int::RX_PERIODIC);
            }
            self.bump(|s| s.rx += 1);
            self.rx_handle();
        }

        if inta & int::FH_TX != 0 {
            handled |= int::FH_TX;
            self.io.write32(csr::CSR_FH_INT_STATUS, fh_int::TX_MASK);
            log::debug!(target: "wireless::trans::irq", "uCode load interrupt");
            self.bump(|s| s.tx += 1);
        }

        if inta & !handled != 0 {
            log::error!(target: "wireless::trans::irq", "unhandled INTA bits 0x{:08x}", inta & !handled);
            self.bump(|s| s.unhandled += 1);
        }

        let mut irq = self.irq.lock();
        if self.status.test(TransStatus::INT_ENABLED) {
            irq.enable(&self.io, &self.status);
        } else if handled & int::FH_TX != 0 {
            irq.enable_fw_load_only(&self.io);
        } else if handled & int::RF_KILL != 0 {
            irq.enable_rfkill_only(&self.io);
        } else {
            irq.restore_legacy(&self.io);
        }
        true
    }

    fn isr_msix(&self) -> bool {
        let (fh, hw) = self.irq.lock().take_msix_causes(&self.io);
        if fh == 0 && hw == 0 {
            self.irq.lock().clear_automask(&self.io);
            return false;
        }
        log::trace!(target: "wireless::trans::irq", "ISR fh 0x{:08x} hw 0x{:08x}", fh, hw);

        if fh & (msix::fh_cause::Q0 | msix::fh_cause::Q1) != 0 {
            self.bump(|s| s.rx += 1);
            self.rx_handle();
        }

        if fh & (msix::fh_cause::D2S_CH0_NUM | msix::fh_cause::D2S_CH1_NUM) != 0 {
            log::debug!(target: "wireless::trans::irq", "uCode load interrupt");
            self.bump(|s| s.tx += 1);
        }

        if fh & msix::fh_cause::FH_ERR != 0 {
            log::error!(target: "wireless::trans::irq", "FH error detected, restarting");
            self.bump(|s| s.sw += 1);
            self.handle_fw_error();
        }

        if hw & msix::hw_cause::ALIVE != 0 {
            log::debug!(target: "wireless::trans::irq", "alive interrupt");
            self.bump(|s| s.alive += 1);
            self.restock_rx();
        }

        if hw & msix::hw_cause::WAKEUP != 0 {
            log::debug!(target: "wireless::trans::irq", "wakeup interrupt");
            self.bump(|s| s.wakeup += 1);
        }

        if hw & msix::hw_cause::CT_KILL != 0 {
            log::error!(target: "wireless::trans::irq", "microcode CT kill error detected");
            self.bump(|s| s.ctkill += 1);
        }

        if hw & msix::hw_cause::RF_KILL != 0 {
            self.bump(|s| s.rfkill += 1);
            self.handle_rfkill_irq();
        }

        if hw & msix::hw_cause::SW_ERR != 0 {
            log::error!(target: "wireless::trans::irq", "microcode SW error detected, restarting");
            self.bump(|s| s.sw += 1);
            self.handle_fw_error();
        }

        if hw & msix::hw_cause::HW_ERR != 0 {
            log::error!(target: "wireless::trans::irq", "hardware error detected, restarting");
            self.bump(|s| s.hw += 1);
            self.handle_fw_error();
        }

        self.irq.lock().clear_automask(&self.io);
        true
    }

    /// 固件/硬件报错：置 FW_ERROR，唤醒同步命令等待方，首次出错时通知 op-mode
    fn handle_fw_error(&self) {
        log::error!(
            target: "wireless::trans::irq",
            "GP_CNTRL 0x{:08x} HW_IF_CONFIG 0x{:08x} RESET 0x{:08x} GP1 0x{:08x}",
            self.io.read32(csr::CSR_GP_CNTRL),
            self.io.read32(csr::CSR_HW_IF_CONFIG_REG),
            self.io.read32(csr::CSR_RESET),
            self.io.read32(csr::CSR_UCODE_DRV_GP1)
        );
        if self.status.test_and_clear(TransStatus::SYNC_HCMD_ACTIVE) {
            log::debug!(target: "wireless::trans::irq", "clearing HCMD_ACTIVE on firmware error");
        }
        if !self.status.test_and_set(TransStatus::FW_ERROR) {
            self.op_mode.nic_error();
        }
    }

    fn handle_rfkill_irq(&self) {
        let hw_rfkill = self.check_rfkill();
        log::warn!(
            target: "wireless::trans::irq",
            "RF_KILL bit toggled to {} radio (GP_CNTRL 0x{:08x})",
            if hw_rfkill { "disable" } else { "enable" },
            self.io.read32(csr::CSR_GP_CNTRL) & gp_cntrl::HW_RF_KILL_SW
        );
        if hw_rfkill && self.status.test_and_clear(TransStatus::SYNC_HCMD_ACTIVE) {
            log::debug!(target: "wireless::trans::irq", "RF-kill while SYNC HCMD in flight");
        }
    }

    /// 处理设备已交回的 RX 缓冲；op-mode 回调期间 `rxq` 保持锁定
    fn rx_handle(&self) -> usize {
        let (n, bad) = {
            let mut rxq = self.rxq.lock();
            let Some(q) = rxq.as_mut() else {
                return 0;
            };
            let before = q.invalid_vids;
            let n = q.reclaim(&self.io, &self.rba, &mut |_vid, page| {
                self.rx_dispatch(page.as_slice())
            });
            (n, q.invalid_vids - before)
        };
        if bad > 0 {
            self.bump(|s| s.invalid_vid += bad);
        }
        n
    }

    fn rx_dispatch(&self, page: &[u8]) {
        let page = &page[..page.len().min(self.rba.buf_size())];
        for pkt in RxPacketIter::new(page) {
            log::trace!(
                target: "wireless::trans::rx",
                "rx cmd 0x{:02x}.{:02x} seq 0x{:04x} len {}",
                pkt.group_id,
                pkt.cmd,
                pkt.sequence,
                pkt.payload.len()
            );
            self.op_mode.rx(&pkt);
            if !pkt.is_rx_frame() {
                self.hcmd_complete(&pkt);
            }
        }
    }
}
