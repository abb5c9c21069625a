//! 一致性 DMA 内存
//!
//! 设备会异步写 RX used 环、状态字和 ICT 表，这些位置一律用 volatile 访问。

use core::ptr::{read_volatile, write_volatile, NonNull};

/// 一段一致性 DMA 内存：CPU 虚拟地址 + 设备可见的总线地址
pub struct DmaBuf {
    bus_addr: u64,
    vaddr: NonNull<u8>,
    len: usize,
}

impl core::fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuf")
            .field("bus_addr", &format_args!("0x{:x}", self.bus_addr))
            .field("len", &self.len)
            .finish()
    }
}

// 缓冲区独占所有权，跨线程移动安全
unsafe impl Send for DmaBuf {}
unsafe impl Sync for DmaBuf {}

impl DmaBuf {
    /// # Safety
    /// `vaddr` 起 `len` 字节必须可读写、按 u64 对齐，并在归还分配器前一直有效。
    pub unsafe fn from_raw(bus_addr: u64, vaddr: NonNull<u8>, len: usize) -> Self {
        Self {
            bus_addr,
            vaddr,
            len,
        }
    }

    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    #[inline]
    pub fn vaddr(&self) -> NonNull<u8> {
        self.vaddr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.vaddr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.vaddr.as_ptr(), self.len) }
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }

    #[inline]
    pub fn read_u32(&self, off: usize) -> u32 {
        assert!(off % 4 == 0 && off + 4 <= self.len);
        unsafe { u32::from_le(read_volatile(self.vaddr.as_ptr().add(off) as *const u32)) }
    }

    #[inline]
    pub fn write_u32(&mut self, off: usize, val: u32) {
        assert!(off % 4 == 0 && off + 4 <= self.len);
        unsafe { write_volatile(self.vaddr.as_ptr().add(off) as *mut u32, val.to_le()) }
    }

    #[inline]
    pub fn read_u16(&self, off: usize) -> u16 {
        assert!(off % 2 == 0 && off + 2 <= self.len);
        unsafe { u16::from_le(read_volatile(self.vaddr.as_ptr().add(off) as *const u16)) }
    }

    #[inline]
    pub fn write_u64(&mut self, off: usize, val: u64) {
        assert!(off % 8 == 0 && off + 8 <= self.len);
        unsafe { write_volatile(self.vaddr.as_ptr().add(off) as *mut u64, val.to_le()) }
    }

    #[inline]
    pub fn read_u64(&self, off: usize) -> u64 {
        assert!(off % 8 == 0 && off + 8 <= self.len);
        unsafe { u64::from_le(read_volatile(self.vaddr.as_ptr().add(off) as *const u64)) }
    }
}

/// 平台提供的一致性 DMA 分配器
pub trait DmaAllocator: Send {
    /// 分配 `len` 字节、至少 4K 对齐、已清零的一致性内存
    fn alloc_coherent(&mut self, len: usize) -> Option<DmaBuf>;
    fn free_coherent(&mut self, buf: DmaBuf);
}
