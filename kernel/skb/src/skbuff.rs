//! SkBuff：`[ headroom | data (len) | tailroom ]`

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Deref;

/// 单帧缓冲
///
/// 上层在 headroom 中压入设备命令头（`push`），在尾部追加负载（`put`）；
/// transport 只读 `data()`。
#[derive(Clone)]
pub struct SkBuff {
    storage: Vec<u8>,
    /// data 区起始
    head: usize,
    len: usize,
}

impl SkBuff {
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配 `capacity` 字节并在前端预留 `headroom`
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        SkBuff {
            storage: vec![0; capacity],
            head: headroom.min(capacity),
            len: 0,
        }
    }

    /// 由已有帧内容构造，不留 headroom
    pub fn from_slice(data: &[u8]) -> Self {
        SkBuff {
            storage: data.to_vec(),
            head: 0,
            len: data.len(),
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.head + self.len]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.head + self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.head - self.len
    }

    /// 尾部追加 `n` 字节并返回其可写切片；空间不足返回 None
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.head + self.len;
        self.len += n;
        Some(&mut self.storage[start..start + n])
    }

    /// 从头部消费至多 `n` 字节
    pub fn pull(&mut self, n: usize) {
        let consume = n.min(self.len);
        self.head += consume;
        self.len -= consume;
    }

    /// 向 headroom 扩展 `n` 字节并返回新头部；headroom 不足返回 None
    pub fn push(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.head < n {
            return None;
        }
        self.head -= n;
        self.len += n;
        Some(&mut self.storage[self.head..self.head + n])
    }

    /// 截断到 `len` 字节
    pub fn trim(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl Deref for SkBuff {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl core::fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SkBuff")
            .field("len", &self.len)
            .field("headroom", &self.head)
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
