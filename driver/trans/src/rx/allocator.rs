//! RX 缓冲分配器
//!
//! 缓冲以 arena 方式存放，`vid`（从 1 开始，12 位）是设备可见的句柄；
//! 所有权按 [`RbOwner`] 划分，任何时刻一块缓冲只属于一方。页分配在锁外进行，
//! RX 快路径只从 `allocated` 中取现成缓冲，不等待分配。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::dma::{DmaAllocator, DmaBuf};

/// RX 队列每次向分配器领取的缓冲数
pub const RX_CLAIM_REQ_ALLOC: usize = 8;
/// vid 必须能放进 used_bd 的低 12 位
pub const MAX_RX_VID: usize = 0x0FFF;

/// 缓冲当前归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbOwner {
    /// 分配器：待分配页
    Empty,
    /// 分配器：后台任务正在为它分配页（锁外）
    Refilling,
    /// 分配器：页就绪，可被领取
    Allocated,
    /// RX 队列 free 列表
    Queue,
    /// 已发布到硬件环
    Hardware,
    /// 硬件已交回，负载正在被消费
    Consumer,
}

/// vid 非法或状态不对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidVid {
    OutOfRange(u16),
    NotInHardware(u16, RbOwner),
    AlreadyInvalid(u16),
}

struct RxBuffer {
    page: Option<DmaBuf>,
    owner: RbOwner,
    /// 硬件已交回、尚未重新发布
    invalid: bool,
}

struct RbPool {
    buffers: Vec<RxBuffer>,
    empty: VecDeque<u16>,
    allocated: VecDeque<u16>,
    /// 已请求、尚未分配的缓冲数
    req_pending: usize,
    /// 已分配、尚未被领取的缓冲数
    req_ready: usize,
}

impl RbPool {
    fn slot(&mut self, vid: u16) -> Option<&mut RxBuffer> {
        if vid == 0 {
            return None;
        }
        self.buffers.get_mut(vid as usize - 1)
    }
}

/// 各归属下的缓冲数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub empty: usize,
    pub refilling: usize,
    pub allocated: usize,
    pub queue: usize,
    pub hardware: usize,
    pub consumer: usize,
    pub total: usize,
}

impl PoolCounts {
    /// 仍由分配器持有的缓冲
    pub fn in_allocator(&self) -> usize {
        self.empty + self.refilling + self.allocated
    }
}

pub struct RxAllocator {
    pool: spin::Mutex<RbPool>,
    buf_size: usize,
}

impl RxAllocator {
    pub const fn new(buf_size: usize) -> Self {
        Self {
            pool: spin::Mutex::new(RbPool {
                buffers: Vec::new(),
                empty: VecDeque::new(),
                allocated: VecDeque::new(),
                req_pending: 0,
                req_ready: 0,
            }),
            buf_size,
        }
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// 建立 `count` 块空缓冲（全部待分配）。之前的页必须已由 [`Self::free_all`] 归还。
    pub fn init(&self, count: usize) {
        let count = count.min(MAX_RX_VID);
        let mut pool = self.pool.lock();
        pool.buffers.clear();
        pool.empty.clear();
        pool.allocated.clear();
        for vid in 1..=count {
            pool.buffers.push(RxBuffer {
                page: None,
                owner: RbOwner::Empty,
                invalid: false,
            });
            pool.empty.push_back(vid as u16);
        }
        pool.req_pending = 0;
        pool.req_ready = 0;
        log::debug!(target: "wireless::trans::rx", "rx pool init: {} buffers of {} bytes", count, self.buf_size);
    }

    /// 归还所有页并清空 arena
    pub fn free_all(&self, dma: &mut dyn DmaAllocator) {
        let pages: Vec<DmaBuf> = {
            let mut pool = self.pool.lock();
            let pages = pool.buffers.iter_mut().filter_map(|b| b.page.take()).collect();
            pool.buffers.clear();
            pool.empty.clear();
            pool.allocated.clear();
            pool.req_pending = 0;
            pool.req_ready = 0;
            pages
        };
        for p in pages {
            dma.free_coherent(p);
        }
    }

    /// 请求补充 `n` 块缓冲，由后台任务完成
    pub fn request_refill(&self, n: usize) {
        let mut pool = self.pool.lock();
        let cap = pool.empty.len();
        pool.req_pending = (pool.req_pending + n).min(cap);
        log::trace!(target: "wireless::trans::rx", "request_refill {} -> pending {}", n, pool.req_pending);
    }

    /// 后台补充任务：为待分配缓冲分配页。分配在锁外进行，失败时该请求保持挂起。
    /// 返回本次分配成功的缓冲数。
    pub fn refill_work(&self, dma: &mut dyn DmaAllocator) -> usize {
        let mut done = 0;
        loop {
            let (vid, stale) = {
                let mut pool = self.pool.lock();
                if pool.req_pending == 0 {
                    break;
                }
                let Some(vid) = pool.empty.pop_front() else {
                    pool.req_pending = 0;
                    break;
                };
                let Some(rb) = pool.slot(vid) else {
                    // 不对应任何缓冲，丢掉它不会让池变小
                    log::error!(target: "wireless::trans::rx", "refill: bogus vid {} on empty list", vid);
                    pool.req_pending = pool.req_pending.min(pool.empty.len());
                    continue;
                };
                rb.owner = RbOwner::Refilling;
                (vid, rb.page.take())
            };

            // 回收的旧页先释放，再映射新页
            if let Some(old) = stale {
                dma.free_coherent(old);
            }
            let page = dma.alloc_coherent(self.buf_size);

            let mut pool = self.pool.lock();
            match page {
                Some(page) => {
                    if let Some(rb) = pool.slot(vid) {
                        rb.page = Some(page);
                        rb.owner = RbOwner::Allocated;
                        rb.invalid = false;
                    }
                    pool.allocated.push_back(vid);
                    pool.req_pending -= 1;
                    pool.req_ready += 1;
                    done += 1;
                }
                None => {
                    if let Some(rb) = pool.slot(vid) {
                        rb.owner = RbOwner::Empty;
                    }
                    pool.empty.push_front(vid);
                    log::warn!(target: "wireless::trans::rx", "rx page alloc failed, {} requests pending", pool.req_pending);
                    break;
                }
            }
        }
        if done > 0 {
            log::trace!(target: "wireless::trans::rx", "refill_work allocated {}", done);
        }
        done
    }

    /// 领取至多 `max` 块已就绪缓冲，归属转为 RX 队列
    pub fn claim_ready(&self, max: usize) -> Vec<u16> {
        let mut pool = self.pool.lock();
        let n = max.min(pool.allocated.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(vid) = pool.allocated.pop_front() else {
                break;
            };
            if let Some(rb) = pool.slot(vid) {
                rb.owner = RbOwner::Queue;
            }
            out.push(vid);
        }
        pool.req_ready = pool.req_ready.saturating_sub(out.len());
        out
    }

    /// 把队列中的缓冲发布给硬件，返回其页总线地址
    pub fn to_hardware(&self, vid: u16) -> Option<u64> {
        let mut pool = self.pool.lock();
        let rb = pool.slot(vid)?;
        if rb.owner != RbOwner::Queue {
            return None;
        }
        let bus = rb.page.as_ref()?.bus_addr();
        rb.owner = RbOwner::Hardware;
        rb.invalid = false;
        Some(bus)
    }

    /// 硬件交回缓冲：校验 vid，标记 invalid 并取出页供消费
    pub fn take_from_hardware(&self, vid: u16) -> Result<DmaBuf, InvalidVid> {
        let mut pool = self.pool.lock();
        let rb = pool.slot(vid).ok_or(InvalidVid::OutOfRange(vid))?;
        if rb.invalid {
            return Err(InvalidVid::AlreadyInvalid(vid));
        }
        if rb.owner != RbOwner::Hardware {
            return Err(InvalidVid::NotInHardware(vid, rb.owner));
        }
        let page = rb.page.take().ok_or(InvalidVid::NotInHardware(vid, rb.owner))?;
        rb.invalid = true;
        rb.owner = RbOwner::Consumer;
        Ok(page)
    }

    /// 消费完毕，缓冲回到分配器；旧页保留，补充时再释放
    pub fn return_buffer(&self, vid: u16, page: DmaBuf) {
        let mut pool = self.pool.lock();
        match pool.slot(vid) {
            Some(rb) => {
                rb.page = Some(page);
                rb.owner = RbOwner::Empty;
            }
            None => {
                log::error!(target: "wireless::trans::rx", "return_buffer: bad vid {}", vid);
                return;
            }
        }
        pool.empty.push_back(vid);
    }

    /// 把 RX 队列持有（free 列表或硬件环）的缓冲收回分配器，停止 RX 时调用
    pub fn reclaim_from_queue(&self) -> usize {
        let mut pool = self.pool.lock();
        let mut back = Vec::new();
        for (i, rb) in pool.buffers.iter_mut().enumerate() {
            if matches!(rb.owner, RbOwner::Queue | RbOwner::Hardware) {
                rb.owner = RbOwner::Allocated;
                rb.invalid = false;
                back.push((i + 1) as u16);
            }
        }
        let n = back.len();
        pool.allocated.extend(back);
        pool.req_ready += n;
        n
    }

    pub fn counts(&self) -> PoolCounts {
        let pool = self.pool.lock();
        let mut c = PoolCounts {
            total: pool.buffers.len(),
            ..PoolCounts::default()
        };
        for rb in pool.buffers.iter() {
            match rb.owner {
                RbOwner::Empty => c.empty += 1,
                RbOwner::Refilling => c.refilling += 1,
                RbOwner::Allocated => c.allocated += 1,
                RbOwner::Queue => c.queue += 1,
                RbOwner::Hardware => c.hardware += 1,
                RbOwner::Consumer => c.consumer += 1,
            }
        }
        c
    }

    /// 模拟设备向某块缓冲写数据
    #[cfg(test)]
    pub fn with_page_mut<R>(&self, vid: u16, f: impl FnOnce(&mut DmaBuf) -> R) -> Option<R> {
        let mut pool = self.pool.lock();
        let page = pool.slot(vid)?.page.as_mut()?;
        Some(f(page))
    }

    /// (req_pending, req_ready)
    pub fn requests(&self) -> (usize, usize) {
        let pool = self.pool.lock();
        (pool.req_pending, pool.req_ready)
    }
}
