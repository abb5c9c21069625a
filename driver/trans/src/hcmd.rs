//! Host command
//!
//! 命令经命令队列下发，设备在 RX 路径上以 `sequence` 相同、`SEQ_RX_FRAME` 清零的包响应。
//! [`HcmdTracker`] 负责请求与响应配对：下发前登记 sequence，RX 路径收到响应时
//! `on_cfm` 写入负载并标记完成，同步调用方轮询 `is_done`。

use alloc::vec::Vec;

use crate::rx::packet::{index_to_seq, queue_to_seq};
use crate::sync;

/// 同时等待响应的命令上限
pub const HCMD_MAX_PENDING: usize = 8;
/// 响应负载保存上限
pub const HCMD_RESP_MAX: usize = 4096;
/// 命令头长度（宽格式）
pub const HCMD_HDR_LEN: usize = 8;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u32 {
        /// 不等待响应
        const ASYNC = 1 << 0;
        /// 需要响应负载
        const WANT_SKB = 1 << 1;
        /// RF-kill 时仍允许下发
        const SEND_IN_RFKILL = 1 << 2;
    }
}

/// 一条 host command
#[derive(Debug, Clone, Copy)]
pub struct HostCmd<'a> {
    pub id: u8,
    pub group_id: u8,
    pub version: u8,
    pub flags: CmdFlags,
    pub data: &'a [u8],
}

impl<'a> HostCmd<'a> {
    pub const fn new(id: u8, group_id: u8, data: &'a [u8]) -> Self {
        Self {
            id,
            group_id,
            version: 0,
            flags: CmdFlags::empty(),
            data,
        }
    }

    pub const fn with_flags(mut self, flags: CmdFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 宽格式命令头：cmd, group_id, sequence(le16), length(le16), reserved, version
    pub fn header(&self, queue: u8, index: u8) -> [u8; HCMD_HDR_LEN] {
        let seq = queue_to_seq(queue) | index_to_seq(index);
        let len = self.data.len() as u16;
        let mut hdr = [0u8; HCMD_HDR_LEN];
        hdr[0] = self.id;
        hdr[1] = self.group_id;
        hdr[2..4].copy_from_slice(&seq.to_le_bytes());
        hdr[4..6].copy_from_slice(&len.to_le_bytes());
        hdr[7] = self.version;
        hdr
    }
}

/// 等待中的命令
struct PendingCmd {
    seq: u16,
    done: bool,
    resp: Vec<u8>,
}

/// 请求-响应配对表
pub struct HcmdTracker {
    slots: [Option<PendingCmd>; HCMD_MAX_PENDING],
}

impl HcmdTracker {
    pub const fn new() -> Self {
        Self {
            slots: [None, None, None, None, None, None, None, None],
        }
    }

    /// 登记一条需要响应的命令，返回 token（slot 下标）
    pub fn push(&mut self, seq: u16) -> Option<usize> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                log::debug!(target: "wireless::trans::hcmd", "hcmd push seq=0x{:04x} token={}", seq, i);
                *slot = Some(PendingCmd {
                    seq,
                    done: false,
                    resp: Vec::new(),
                });
                return Some(i);
            }
        }
        log::warn!(target: "wireless::trans::hcmd", "hcmd push: no free slot, seq=0x{:04x}", seq);
        None
    }

    /// RX 路径收到响应：按 sequence 匹配，保存负载并标记完成。匹配成功返回 true。
    pub fn on_cfm(&mut self, seq: u16, payload: &[u8]) -> bool {
        for slot in self.slots.iter_mut().flatten() {
            if slot.seq == seq && !slot.done {
                let len = payload.len().min(HCMD_RESP_MAX);
                slot.resp.clear();
                slot.resp.extend_from_slice(&payload[..len]);
                slot.done = true;
                log::debug!(target: "wireless::trans::hcmd", "hcmd cfm seq=0x{:04x} len={}", seq, len);
                return true;
            }
        }
        false
    }

    pub fn is_done(&self, token: usize) -> bool {
        self.slots
            .get(token)
            .and_then(|s| s.as_ref())
            .map(|s| s.done)
            .unwrap_or(false)
    }

    /// 取走响应并释放 slot；未完成时也释放，返回 None
    pub fn take_cfm(&mut self, token: usize) -> Option<Vec<u8>> {
        let slot = self.slots.get_mut(token)?.take()?;
        if !slot.done {
            return None;
        }
        Some(slot.resp)
    }

    /// 放弃等待（超时/出错）
    pub fn cancel(&mut self, token: usize) {
        if let Some(s) = self.slots.get_mut(token) {
            *s = None;
        }
    }

    /// 设备停止时丢弃全部等待项
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 等待直到 `condition()` 为 true 或超时；每轮先执行一次 `poll_fn`（处理挂起中断）。
    /// 超时返回 false。
    pub fn wait_until(
        timeout_ms: u32,
        mut condition: impl FnMut() -> bool,
        mut poll_fn: impl FnMut(),
    ) -> bool {
        const POLL_INTERVAL_MS: u32 = 1;
        let mut waited_ms = 0u32;
        loop {
            poll_fn();
            if condition() {
                log::trace!(target: "wireless::trans::hcmd", "hcmd wait ok in {}ms", waited_ms);
                return true;
            }
            if waited_ms >= timeout_ms {
                break;
            }
            sync::delay_spin_ms(POLL_INTERVAL_MS);
            waited_ms += POLL_INTERVAL_MS;
        }
        log::warn!(target: "wireless::trans::hcmd", "hcmd wait timeout {}ms", timeout_ms);
        false
    }
}

impl Default for HcmdTracker {
    fn default() -> Self {
        Self::new()
    }
}
