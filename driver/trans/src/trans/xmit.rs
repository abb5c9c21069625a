//! 数据帧发送/回收与 host command

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use skb::{SkBuff, SkbQueue};

use crate::dma::DmaAllocator;
use crate::error::{TransError, TransResult};
use crate::hcmd::{CmdFlags, HcmdTracker, HostCmd};
use crate::io::CsrBus;
use crate::rx::packet::{index_to_seq, queue_to_seq, RxPacket};
use crate::status::TransStatus;
use crate::tx::queue::CommandMeta;

use super::Transport;

impl<B: CsrBus, D: DmaAllocator> Transport<B, D> {
    /// 把一帧放上数据队列，返回所用硬件下标。空间低于高水位时通知 op-mode 暂停该队列。
    pub fn tx(&self, txq_id: usize, skb: SkBuff) -> TransResult<u32> {
        if txq_id >= self.txqs.len() || txq_id == self.cfg.cmd_queue {
            return Err(TransError::InvalidInput);
        }
        let bit = Self::queue_bit(txq_id);
        if self.queue_used.load(Ordering::Acquire) & bit == 0 {
            log::warn!(target: "wireless::trans::tx", "TX on unused queue {}", txq_id);
            return Err(TransError::InvalidInput);
        }

        let (idx, stop) = {
            let mut slot = self.txqs[txq_id].lock();
            let q = slot.as_mut().ok_or(TransError::InvalidInput)?;
            let meta = CommandMeta {
                token: None,
                flags: CmdFlags::empty(),
                num_tbs: 0,
            };
            let idx = q.push_frame(&self.io, skb, meta)?;
            (idx, q.below_high_mark())
        };

        if stop && self.queue_stopped.fetch_or(bit, Ordering::AcqRel) & bit == 0 {
            log::debug!(target: "wireless::trans::tx", "stop hw queue {}", txq_id);
            self.op_mode.queue_full(txq_id as u32);
        }
        Ok(idx)
    }

    /// 回收 `ssn` 之前的帧；空间回到低水位以上时唤醒队列
    pub fn reclaim(&self, txq_id: usize, ssn: u32) -> TransResult<SkbQueue> {
        if txq_id >= self.txqs.len() || txq_id == self.cfg.cmd_queue {
            return Err(TransError::InvalidInput);
        }
        let (done, wake) = {
            let mut slot = self.txqs[txq_id].lock();
            let q = slot.as_mut().ok_or(TransError::InvalidInput)?;
            let done = q.reclaim(ssn)?;
            (done, q.above_low_mark())
        };

        let bit = Self::queue_bit(txq_id);
        if wake && self.queue_stopped.fetch_and(!bit, Ordering::AcqRel) & bit != 0 {
            log::debug!(target: "wireless::trans::tx", "wake hw queue {}", txq_id);
            self.op_mode.queue_not_full(txq_id as u32);
        }
        Ok(done)
    }

    /// 下发 host command
    ///
    /// 异步命令入队即返回 `Ok(None)`。同步命令等待响应（期间轮询中断），
    /// 带 `WANT_SKB` 时返回响应负载。
    pub fn send_hcmd(&self, cmd: &HostCmd<'_>) -> TransResult<Option<Vec<u8>>> {
        if self.status.test(TransStatus::FW_ERROR) {
            log::error!(target: "wireless::trans::hcmd", "FW error in cmd 0x{:02x}", cmd.id);
            return Err(TransError::Io);
        }
        if !cmd.flags.contains(CmdFlags::SEND_IN_RFKILL)
            && self.status.test(TransStatus::RFKILL_OPMODE)
        {
            log::debug!(target: "wireless::trans::hcmd", "dropping cmd 0x{:02x}: RF-kill", cmd.id);
            return Err(TransError::KillAsserted);
        }

        if cmd.flags.contains(CmdFlags::ASYNC) {
            if cmd.flags.contains(CmdFlags::WANT_SKB) {
                return Err(TransError::InvalidInput);
            }
            self.enqueue_hcmd(cmd, false)?;
            return Ok(None);
        }
        self.send_hcmd_sync(cmd)
    }

    fn send_hcmd_sync(&self, cmd: &HostCmd<'_>) -> TransResult<Option<Vec<u8>>> {
        if self.status.test_and_set(TransStatus::SYNC_HCMD_ACTIVE) {
            log::error!(target: "wireless::trans::hcmd", "cmd 0x{:02x}: another sync command is active", cmd.id);
            return Err(TransError::Busy);
        }
        log::debug!(target: "wireless::trans::hcmd", "setting HCMD_ACTIVE for cmd 0x{:02x}", cmd.id);

        let token = match self.enqueue_hcmd(cmd, true) {
            Ok(t) => t,
            Err(e) => {
                self.status.clear(TransStatus::SYNC_HCMD_ACTIVE);
                log::error!(target: "wireless::trans::hcmd", "error sending cmd 0x{:02x}: enqueue failed {:?}", cmd.id, e);
                return Err(e);
            }
        };

        let done = HcmdTracker::wait_until(
            self.cfg.hcmd_timeout_ms,
            || !self.status.test(TransStatus::SYNC_HCMD_ACTIVE),
            || {
                self.handle_interrupt();
            },
        );

        let resp = token.and_then(|t| self.hcmd.lock().take_cfm(t));

        if !done {
            log::error!(
                target: "wireless::trans::hcmd",
                "error sending cmd 0x{:02x}: time out after {}ms",
                cmd.id,
                self.cfg.hcmd_timeout_ms
            );
            self.status.clear(TransStatus::SYNC_HCMD_ACTIVE);
            return Err(TransError::CmdTimeout);
        }

        if self.status.test(TransStatus::FW_ERROR) {
            log::error!(target: "wireless::trans::hcmd", "FW error in sync cmd 0x{:02x}", cmd.id);
            return Err(TransError::Io);
        }

        if !cmd.flags.contains(CmdFlags::SEND_IN_RFKILL)
            && self.status.test(TransStatus::RFKILL_OPMODE)
        {
            log::debug!(target: "wireless::trans::hcmd", "RF-kill while sending cmd 0x{:02x}", cmd.id);
            return Err(TransError::KillAsserted);
        }

        if cmd.flags.contains(CmdFlags::WANT_SKB) {
            if resp.is_none() {
                log::error!(target: "wireless::trans::hcmd", "cmd 0x{:02x}: response missing", cmd.id);
                return Err(TransError::Io);
            }
            return Ok(resp);
        }
        Ok(None)
    }

    /// 命令头 + 负载入命令队列；同步命令登记到配对表，返回 token
    fn enqueue_hcmd(&self, cmd: &HostCmd<'_>, sync: bool) -> TransResult<Option<usize>> {
        let cmdq = self.cfg.cmd_queue;
        let mut slot = self.txqs[cmdq].lock();
        let q = slot.as_mut().ok_or(TransError::NotReady)?;
        if q.space() == 0 {
            log::error!(target: "wireless::trans::hcmd", "no space in command queue");
            return Err(TransError::QueueFull);
        }

        let idx = q.write_ptr() as u8;
        let hdr = cmd.header(cmdq as u8, idx);
        let seq = queue_to_seq(cmdq as u8) | index_to_seq(idx);

        let token = if sync {
            Some(self.hcmd.lock().push(seq).ok_or(TransError::Busy)?)
        } else {
            None
        };
        let meta = CommandMeta {
            token,
            flags: cmd.flags,
            num_tbs: 0,
        };
        if let Err(e) = q.push(&self.io, &[&hdr, cmd.data], meta) {
            if let Some(t) = token {
                self.hcmd.lock().cancel(t);
            }
            return Err(e);
        }
        log::debug!(
            target: "wireless::trans::hcmd",
            "sending cmd 0x{:02x}.{:02x} seq 0x{:04x} len {}",
            cmd.group_id,
            cmd.id,
            seq,
            cmd.data.len()
        );
        Ok(token)
    }

    /// RX 路径收到命令响应：回收命令槽位，同步命令写入响应并清 SYNC_HCMD_ACTIVE
    pub(super) fn hcmd_complete(&self, pkt: &RxPacket<'_>) {
        let txq_id = pkt.queue() as usize;
        if txq_id != self.cfg.cmd_queue {
            log::warn!(
                target: "wireless::trans::hcmd",
                "wrong command queue {} (should be {}), sequence 0x{:04x}",
                txq_id,
                self.cfg.cmd_queue,
                pkt.sequence
            );
            return;
        }

        let index = pkt.index() as u32;
        let meta = {
            let mut slot = self.txqs[txq_id].lock();
            let Some(q) = slot.as_mut() else {
                return;
            };
            let meta = q.meta(index);
            if q.cmdq_reclaim(index).is_err() {
                return;
            }
            meta
        };

        let Some(meta) = meta else {
            log::warn!(target: "wireless::trans::hcmd", "no command at index {}", index);
            return;
        };
        if meta.flags.contains(CmdFlags::ASYNC) || meta.token.is_none() {
            return;
        }
        // 已超时放弃的命令迟到的响应，不能结束后来的同步命令
        if !self.hcmd.lock().on_cfm(pkt.sequence, pkt.payload) {
            log::warn!(
                target: "wireless::trans::hcmd",
                "stale response for cmd 0x{:02x}, sequence 0x{:04x}",
                pkt.cmd,
                pkt.sequence
            );
            return;
        }
        if !self.status.test_and_clear(TransStatus::SYNC_HCMD_ACTIVE) {
            log::warn!(target: "wireless::trans::hcmd", "HCMD_ACTIVE already clear for cmd 0x{:02x}", pkt.cmd);
        } else {
            log::debug!(target: "wireless::trans::hcmd", "clearing HCMD_ACTIVE for cmd 0x{:02x}", pkt.cmd);
        }
    }
}
