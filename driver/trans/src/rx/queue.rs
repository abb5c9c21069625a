//! RX 描述符环
//!
//! - `bd`：free 描述符环，每项 u64 = 页总线地址 | vid，由主机写
//! - `used_bd`：used 环，每项 u32 低 12 位为 vid，由设备写
//! - `rb_stts`：设备写回的状态，`closed_rb_num` 为已填满的下标

use alloc::collections::VecDeque;

use super::allocator::{RxAllocator, RX_CLAIM_REQ_ALLOC};
use crate::csr::fh_rx;
use crate::dma::{DmaAllocator, DmaBuf};
use crate::error::{TransError, TransResult};
use crate::io::{CsrBus, Io};

/// rb_stts 区大小
const RB_STTS_SIZE: usize = 64;
/// closed_rb_num 有效位
const CLOSED_RB_NUM_MSK: u16 = 0x0FFF;

pub struct RxQueue {
    id: u32,
    size: usize,
    bd: DmaBuf,
    used_bd: DmaBuf,
    rb_stts: DmaBuf,
    read: usize,
    write: usize,
    /// 最近一次告知设备的写指针（8 对齐）
    write_actual: usize,
    free: VecDeque<u16>,
    /// 已发布到硬件环、尚未交回的缓冲数
    used_count: usize,
    pub invalid_vids: u32,
}

impl RxQueue {
    /// 分配三段描述符内存；`size` 必须是 2 的幂
    pub fn alloc(id: u32, size: usize, dma: &mut dyn DmaAllocator) -> TransResult<Self> {
        if !size.is_power_of_two() || size < 8 {
            return Err(TransError::InvalidInput);
        }
        let bd = dma.alloc_coherent(size * 8).ok_or(TransError::NoMemory)?;
        let Some(used_bd) = dma.alloc_coherent(size * 4) else {
            dma.free_coherent(bd);
            return Err(TransError::NoMemory);
        };
        let Some(rb_stts) = dma.alloc_coherent(RB_STTS_SIZE) else {
            dma.free_coherent(bd);
            dma.free_coherent(used_bd);
            return Err(TransError::NoMemory);
        };
        Ok(Self {
            id,
            size,
            bd,
            used_bd,
            rb_stts,
            read: 0,
            write: 0,
            write_actual: 0,
            free: VecDeque::new(),
            used_count: 0,
            invalid_vids: 0,
        })
    }

    pub fn free(self, dma: &mut dyn DmaAllocator) {
        dma.free_coherent(self.bd);
        dma.free_coherent(self.used_bd);
        dma.free_coherent(self.rb_stts);
    }

    #[inline]
    fn mask(&self) -> usize {
        self.size - 1
    }

    /// 环上还可发布的描述符数（留一个空位区分满/空）
    #[inline]
    pub fn space(&self) -> usize {
        self.read.wrapping_sub(self.write).wrapping_sub(1) & self.mask()
    }

    pub fn bd_bus(&self) -> u64 {
        self.bd.bus_addr()
    }

    pub fn used_bd_bus(&self) -> u64 {
        self.used_bd.bus_addr()
    }

    pub fn rb_stts_bus(&self) -> u64 {
        self.rb_stts.bus_addr()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn used_count(&self) -> usize {
        self.used_count
    }

    #[inline]
    pub fn cursors(&self) -> (usize, usize) {
        (self.read, self.write)
    }

    /// 把分配器中的就绪缓冲发布到空闲描述符，整批结束后写一次写指针
    pub fn publish_ready_buffers<B: CsrBus>(&mut self, io: &Io<B>, rba: &RxAllocator) -> usize {
        let mut published = 0;
        while self.space() > 0 {
            if self.free.is_empty() {
                let claimed = rba.claim_ready(RX_CLAIM_REQ_ALLOC);
                if claimed.is_empty() {
                    break;
                }
                self.free.extend(claimed);
            }
            let Some(vid) = self.free.pop_front() else {
                break;
            };
            let Some(bus) = rba.to_hardware(vid) else {
                log::error!(target: "wireless::trans::rx", "rxq{}: vid {} has no page", self.id, vid);
                continue;
            };
            self.bd.write_u64(self.write * 8, bus | vid as u64);
            self.write = (self.write + 1) & self.mask();
            self.used_count += 1;
            published += 1;
        }

        if published > 0 {
            let write_actual = self.write & !7;
            if write_actual != self.write_actual {
                self.write_actual = write_actual;
                io.write32(fh_rx::frbdcb_widx_trg(self.id), write_actual as u32);
            }
            log::trace!(target: "wireless::trans::rx", "rxq{}: published {}, write={}", self.id, published, self.write);
        }
        published
    }

    /// 设备已填满到的下标
    #[inline]
    pub fn closed_rb_num(&self) -> usize {
        (self.rb_stts.read_u16(0) & CLOSED_RB_NUM_MSK) as usize & self.mask()
    }

    /// 处理 `read` 到设备下标之间的全部缓冲：每块交给 `consumer` 后回到分配器，
    /// 随后按同样数量请求补充并重新发布。返回处理的缓冲数。
    pub fn reclaim<B: CsrBus>(
        &mut self,
        io: &Io<B>,
        rba: &RxAllocator,
        consumer: &mut dyn FnMut(u16, &DmaBuf),
    ) -> usize {
        let hw = self.closed_rb_num();
        let mut i = self.read;
        let mut count = 0;
        while i != hw {
            let vid = (self.used_bd.read_u32(i * 4) & 0x0FFF) as u16;
            match rba.take_from_hardware(vid) {
                Ok(page) => {
                    self.used_count -= 1;
                    consumer(vid, &page);
                    rba.return_buffer(vid, page);
                    count += 1;
                }
                Err(e) => {
                    self.invalid_vids += 1;
                    log::warn!(target: "wireless::trans::rx", "rxq{}: invalid rxb from hw at {}: {:?}", self.id, i, e);
                }
            }
            i = (i + 1) & self.mask();
        }
        self.read = i;

        if count > 0 {
            rba.request_refill(count);
        }
        self.publish_ready_buffers(io, rba);
        count
    }

    /// 队列持有的缓冲全部交回分配器，游标清零
    pub fn reset(&mut self, rba: &RxAllocator) {
        rba.reclaim_from_queue();
        self.free.clear();
        self.used_count = 0;
        self.read = 0;
        self.write = 0;
        self.write_actual = 0;
        self.bd.zero();
        self.used_bd.zero();
        self.rb_stts.zero();
    }

    /// 模拟设备：把环上 `n` 块缓冲按顺序交回
    #[cfg(test)]
    pub fn hw_complete(&mut self, n: usize) {
        let mut idx = self.closed_rb_num();
        for _ in 0..n {
            let vid = (self.bd.read_u64(idx * 8) & 0x0FFF) as u32;
            self.used_bd.write_u32(idx * 4, vid);
            idx = (idx + 1) & self.mask();
        }
        self.rb_stts.write_u32(0, idx as u32);
    }

    /// 模拟设备：在 used 环当前位置写入任意 vid
    #[cfg(test)]
    pub fn hw_complete_raw(&mut self, vid: u32) {
        let idx = self.closed_rb_num();
        self.used_bd.write_u32(idx * 4, vid);
        self.rb_stts.write_u32(0, ((idx + 1) & self.mask()) as u32);
    }

    /// 设备即将交回的下一块缓冲的 vid
    #[cfg(test)]
    pub fn next_hw_vid(&self) -> u16 {
        (self.bd.read_u64(self.closed_rb_num() * 8) & 0x0FFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDma};
    use alloc::vec::Vec;

    const POOL: usize = 64;
    const RING: usize = 32;

    fn setup() -> (Io<SimBus>, SimDma, RxAllocator, RxQueue) {
        let io = Io::new(SimBus::new());
        let mut dma = SimDma::new();
        let rba = RxAllocator::new(4096);
        rba.init(POOL);
        rba.request_refill(POOL);
        rba.refill_work(&mut dma);
        let rxq = RxQueue::alloc(0, RING, &mut dma).unwrap();
        (io, dma, rba, rxq)
    }

    fn assert_counts(rxq: &RxQueue, rba: &RxAllocator) {
        let c = rba.counts();
        assert_eq!(rxq.free_count() + rxq.used_count() + c.in_allocator(), POOL);
        assert_eq!(rxq.used_count(), c.hardware);
        assert_eq!(rxq.free_count(), c.queue);
    }

    #[test]
    fn publish_fills_ring_and_writes_pointer_once() {
        let (io, mut dma, rba, mut rxq) = setup();
        let published = rxq.publish_ready_buffers(&io, &rba);
        assert_eq!(published, RING - 1);
        assert_eq!(rxq.space(), 0);
        let writes = io.bus().writes_to(fh_rx::frbdcb_widx_trg(0));
        assert_eq!(writes, [((RING - 1) & !7) as u32]);
        assert_counts(&rxq, &rba);
        rxq.free(&mut dma);
        rba.free_all(&mut dma);
    }

    #[test]
    fn reclaim_returns_buffers_and_republishes() {
        let (io, mut dma, rba, mut rxq) = setup();
        rxq.publish_ready_buffers(&io, &rba);

        let expected_first = rxq.next_hw_vid();
        rxq.hw_complete(10);
        let mut seen = Vec::new();
        let n = rxq.reclaim(&io, &rba, &mut |vid, _page| seen.push(vid));
        assert_eq!(n, 10);
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], expected_first);
        assert_eq!(rxq.cursors().0, 10);
        assert_eq!(rba.requests().0, 10);
        // 空位立即由预分配缓冲补上
        assert_eq!(rxq.space(), 0);
        assert_counts(&rxq, &rba);

        rba.refill_work(&mut dma);
        assert_eq!(rba.requests().0, 0);
        assert_counts(&rxq, &rba);
        rxq.free(&mut dma);
        rba.free_all(&mut dma);
        assert_eq!(dma.live(), 0);
    }

    #[test]
    fn reclaim_wraps_around_ring() {
        let (io, mut dma, rba, mut rxq) = setup();
        rxq.publish_ready_buffers(&io, &rba);
        for _ in 0..5 {
            rxq.hw_complete(20);
            assert_eq!(rxq.reclaim(&io, &rba, &mut |_, _| {}), 20);
            rba.refill_work(&mut dma);
            assert_counts(&rxq, &rba);
        }
        assert_eq!(rxq.cursors().0, (5 * 20) % RING);
        rxq.free(&mut dma);
        rba.free_all(&mut dma);
    }

    #[test]
    fn invalid_vid_skipped() {
        let (io, mut dma, rba, mut rxq) = setup();
        rxq.publish_ready_buffers(&io, &rba);
        rxq.hw_complete_raw(0);
        let n = rxq.reclaim(&io, &rba, &mut |_, _| panic!("must not consume"));
        assert_eq!(n, 0);
        assert_eq!(rxq.invalid_vids, 1);
        assert_counts(&rxq, &rba);
        rxq.free(&mut dma);
        rba.free_all(&mut dma);
    }
}
