//! TX / 命令队列
//!
//! 每个队列有 256 项硬件 TFD 环和 `n_window` 个软件槽位；槽位里放首 TB 缓冲
//! （帧或命令的拷贝）以及回收时要用的 [`TxEntry`]。TFD 布局：
//! `num_tbs: u16` + 25 × `{ tb_len: u16, addr: u64 }` + 4 字节保留，共 256 字节。

use alloc::vec::Vec;

use skb::{SkBuff, SkbQueue};

use super::ring::{RingIndex, TFD_QUEUE_SIZE_MAX};
use crate::csr::hbus;
use crate::dma::{DmaAllocator, DmaBuf};
use crate::error::{TransError, TransResult};
use crate::hcmd::CmdFlags;
use crate::io::{CsrBus, Io};

pub const TFD_SIZE: usize = 256;
pub const TFH_NUM_TBS: usize = 25;
const TB_DESC_SIZE: usize = 10;
/// 首 TB 固定长度，其余放第二个 TB
pub const FIRST_TB_SIZE: usize = 20;

/// 命令元数据，回收时销毁
#[derive(Debug, Clone, Copy)]
pub struct CommandMeta {
    /// 等待响应的请求 token
    pub token: Option<usize>,
    pub flags: CmdFlags,
    pub num_tbs: u8,
}

/// 槽位内容
pub struct TxEntry {
    pub skb: Option<SkBuff>,
    pub meta: CommandMeta,
}

pub struct TxQueue {
    id: u32,
    ring: RingIndex,
    read_ptr: u32,
    write_ptr: u32,
    tfds: DmaBuf,
    slots: DmaBuf,
    slot_size: usize,
    entries: Vec<Option<TxEntry>>,
    low_mark: u32,
    high_mark: u32,
}

impl TxQueue {
    pub fn alloc(
        id: u32,
        n_window: u32,
        slot_size: usize,
        dma: &mut dyn DmaAllocator,
    ) -> TransResult<Self> {
        let ring = RingIndex::new(TFD_QUEUE_SIZE_MAX, n_window).ok_or(TransError::InvalidInput)?;
        let tfds = dma
            .alloc_coherent(TFD_QUEUE_SIZE_MAX as usize * TFD_SIZE)
            .ok_or(TransError::NoMemory)?;
        let Some(slots) = dma.alloc_coherent(n_window as usize * slot_size) else {
            dma.free_coherent(tfds);
            return Err(TransError::NoMemory);
        };
        let mut entries = Vec::with_capacity(n_window as usize);
        entries.resize_with(n_window as usize, || None);
        log::debug!(target: "wireless::trans::tx", "txq{} alloc: window {} tfds@0x{:x}", id, n_window, tfds.bus_addr());
        Ok(Self {
            id,
            ring,
            read_ptr: 0,
            write_ptr: 0,
            tfds,
            slots,
            slot_size,
            entries,
            low_mark: (n_window / 4).max(4),
            high_mark: (n_window / 8).max(2),
        })
    }

    /// 释放 DMA 内存，返回尚未回收的帧
    pub fn free(mut self, dma: &mut dyn DmaAllocator) -> SkbQueue {
        let left = self.unmap();
        dma.free_coherent(self.tfds);
        dma.free_coherent(self.slots);
        left
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn ring(&self) -> RingIndex {
        self.ring
    }

    #[inline]
    pub fn read_ptr(&self) -> u32 {
        self.read_ptr
    }

    #[inline]
    pub fn write_ptr(&self) -> u32 {
        self.write_ptr
    }

    pub fn tfd_bus(&self) -> u64 {
        self.tfds.bus_addr()
    }

    #[inline]
    pub fn space(&self) -> u32 {
        self.ring.space(self.read_ptr, self.write_ptr)
    }

    /// 空间低于高水位，应停止上层发包
    #[inline]
    pub fn below_high_mark(&self) -> bool {
        self.space() < self.high_mark
    }

    /// 空间回到低水位以上，可恢复上层发包
    #[inline]
    pub fn above_low_mark(&self) -> bool {
        self.space() > self.low_mark
    }

    pub fn is_empty(&self) -> bool {
        self.read_ptr == self.write_ptr
    }

    fn write_tfd(&mut self, hw_idx: u32, tbs: &[(u64, u16)]) {
        let mut tfd = [0u8; TFD_SIZE];
        tfd[0..2].copy_from_slice(&(tbs.len() as u16).to_le_bytes());
        for (i, &(addr, len)) in tbs.iter().enumerate() {
            let off = 2 + i * TB_DESC_SIZE;
            tfd[off..off + 2].copy_from_slice(&len.to_le_bytes());
            tfd[off + 2..off + 10].copy_from_slice(&addr.to_le_bytes());
        }
        let base = hw_idx as usize * TFD_SIZE;
        self.tfds.as_mut_slice()[base..base + TFD_SIZE].copy_from_slice(&tfd);
    }

    fn clear_tfd(&mut self, hw_idx: u32) {
        let base = hw_idx as usize * TFD_SIZE;
        self.tfds.as_mut_slice()[base..base + 2].fill(0);
    }

    /// TFD 中的 TB 数
    pub fn tfd_num_tbs(&self, hw_idx: u32) -> u16 {
        let base = hw_idx as usize * TFD_SIZE;
        let b = &self.tfds.as_slice()[base..base + 2];
        u16::from_le_bytes([b[0], b[1]])
    }

    /// 把 `parts` 依次拷进下一个槽位并写 TFD，返回硬件下标；写指针由 [`Self::commit`] 推进
    fn fill_slot(&mut self, parts: &[&[u8]], mut meta: CommandMeta) -> TransResult<u32> {
        if self.space() == 0 {
            log::warn!(target: "wireless::trans::tx", "txq{} full: read={} write={}", self.id, self.read_ptr, self.write_ptr);
            return Err(TransError::QueueFull);
        }
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total == 0 || total > self.slot_size {
            return Err(TransError::InvalidInput);
        }

        let hw_idx = self.write_ptr;
        let slot = self.ring.cmd_index(hw_idx) as usize;
        let base = slot * self.slot_size;
        {
            let buf = &mut self.slots.as_mut_slice()[base..base + total];
            let mut off = 0;
            for p in parts {
                buf[off..off + p.len()].copy_from_slice(p);
                off += p.len();
            }
        }

        let bus = self.slots.bus_addr() + base as u64;
        let first = total.min(FIRST_TB_SIZE);
        let mut tbs: [(u64, u16); 2] = [(bus, first as u16), (0, 0)];
        let mut num_tbs = 1;
        if total > first {
            tbs[1] = (bus + first as u64, (total - first) as u16);
            num_tbs = 2;
        }
        self.write_tfd(hw_idx, &tbs[..num_tbs]);

        meta.num_tbs = num_tbs as u8;
        self.entries[slot] = Some(TxEntry { skb: None, meta });
        log::trace!(target: "wireless::trans::tx", "txq{} fill idx={} len={} tbs={}", self.id, hw_idx, total, num_tbs);
        Ok(hw_idx)
    }

    /// 推进写指针并通知设备
    fn commit<B: CsrBus>(&mut self, io: &Io<B>) {
        self.write_ptr = self.ring.inc_wrap(self.write_ptr);
        io.write32(hbus::TARG_WRPTR, self.write_ptr | (self.id << 16));
    }

    /// 下发命令：`parts` 拼接后放入下一个槽位，返回所用硬件下标
    pub fn push<B: CsrBus>(
        &mut self,
        io: &Io<B>,
        parts: &[&[u8]],
        meta: CommandMeta,
    ) -> TransResult<u32> {
        let hw_idx = self.fill_slot(parts, meta)?;
        self.commit(io);
        Ok(hw_idx)
    }

    /// 发送数据帧；帧挂在槽位上直到被回收
    pub fn push_frame<B: CsrBus>(
        &mut self,
        io: &Io<B>,
        skb: SkBuff,
        meta: CommandMeta,
    ) -> TransResult<u32> {
        let hw_idx = self.fill_slot(&[skb.data()], meta)?;
        let slot = self.ring.cmd_index(hw_idx) as usize;
        if let Some(entry) = self.entries[slot].as_mut() {
            entry.skb = Some(skb);
        }
        self.commit(io);
        Ok(hw_idx)
    }

    /// 槽位元数据（命令完成时查 token/flags）
    pub fn meta(&self, hw_idx: u32) -> Option<CommandMeta> {
        let slot = self.ring.cmd_index(hw_idx) as usize;
        self.entries[slot].as_ref().map(|e| e.meta)
    }

    /// 槽位首 TB 缓冲内容
    pub fn slot_data(&self, hw_idx: u32, len: usize) -> &[u8] {
        let base = self.ring.cmd_index(hw_idx) as usize * self.slot_size;
        &self.slots.as_slice()[base..base + len.min(self.slot_size)]
    }

    /// 回收 `ssn` 之前的全部帧
    pub fn reclaim(&mut self, ssn: u32) -> TransResult<SkbQueue> {
        let mut out = SkbQueue::new();
        let tfd_num = ssn & (self.ring.hw_size() - 1);
        if self.read_ptr == tfd_num {
            return Ok(out);
        }
        let last_to_free = self.ring.dec_wrap(tfd_num);
        if !self.ring.used(self.read_ptr, self.write_ptr, last_to_free) {
            log::error!(
                target: "wireless::trans::tx",
                "txq{}: reclaim index {} out of range [{}, {})",
                self.id, last_to_free, self.read_ptr, self.write_ptr
            );
            return Err(TransError::InvalidInput);
        }
        while self.read_ptr != tfd_num {
            let slot = self.ring.cmd_index(self.read_ptr) as usize;
            if let Some(TxEntry { skb: Some(skb), .. }) = self.entries[slot].take() {
                out.push_tail(skb);
            }
            self.clear_tfd(self.read_ptr);
            self.read_ptr = self.ring.inc_wrap(self.read_ptr);
        }
        Ok(out)
    }

    /// 命令完成：回收到 `hw_idx`（含）为止，返回回收数；多于 1 说明有命令被跳过
    pub fn cmdq_reclaim(&mut self, hw_idx: u32) -> TransResult<usize> {
        if hw_idx >= self.ring.hw_size() || !self.ring.used(self.read_ptr, self.write_ptr, hw_idx) {
            log::error!(
                target: "wireless::trans::tx",
                "cmdq reclaim index {} out of range [{}, {})",
                hw_idx, self.read_ptr, self.write_ptr
            );
            return Err(TransError::InvalidInput);
        }
        let end = self.ring.inc_wrap(hw_idx);
        let mut n = 0;
        while self.read_ptr != end {
            if n > 0 {
                log::error!(target: "wireless::trans::tx", "hcmd skipped: index {} (read {} write {})", hw_idx, self.read_ptr, self.write_ptr);
            }
            let slot = self.ring.cmd_index(self.read_ptr) as usize;
            self.entries[slot] = None;
            self.clear_tfd(self.read_ptr);
            self.read_ptr = self.ring.inc_wrap(self.read_ptr);
            n += 1;
        }
        Ok(n)
    }

    /// 丢弃全部在途项并清零游标，返回其中的帧
    pub fn unmap(&mut self) -> SkbQueue {
        let mut out = SkbQueue::new();
        while self.read_ptr != self.write_ptr {
            let slot = self.ring.cmd_index(self.read_ptr) as usize;
            if let Some(TxEntry { skb: Some(skb), .. }) = self.entries[slot].take() {
                out.push_tail(skb);
            }
            self.read_ptr = self.ring.inc_wrap(self.read_ptr);
        }
        self.entries.iter_mut().for_each(|e| *e = None);
        self.tfds.zero();
        self.read_ptr = 0;
        self.write_ptr = 0;
        out
    }
}
