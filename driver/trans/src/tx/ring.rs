//! 硬件环 + 软件窗口的下标运算
//!
//! 硬件环固定 `hw_size` 项，读写指针都是硬件下标；软件只跟踪 `n_window` 个槽位，
//! 槽位号 = 硬件下标 & (n_window - 1)。两者都必须是 2 的幂且 `n_window <= hw_size`。

/// 硬件 TFD 环大小
pub const TFD_QUEUE_SIZE_MAX: u32 = 256;
/// 命令队列软件窗口
pub const TFD_CMD_SLOTS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    hw_size: u32,
    n_window: u32,
}

impl RingIndex {
    pub const fn new(hw_size: u32, n_window: u32) -> Option<Self> {
        if !hw_size.is_power_of_two() || !n_window.is_power_of_two() || n_window > hw_size {
            return None;
        }
        Some(Self { hw_size, n_window })
    }

    #[inline]
    pub const fn hw_size(&self) -> u32 {
        self.hw_size
    }

    #[inline]
    pub const fn n_window(&self) -> u32 {
        self.n_window
    }

    #[inline]
    pub const fn inc_wrap(&self, i: u32) -> u32 {
        (i + 1) & (self.hw_size - 1)
    }

    #[inline]
    pub const fn dec_wrap(&self, i: u32) -> u32 {
        i.wrapping_sub(1) & (self.hw_size - 1)
    }

    /// 硬件下标对应的软件槽位
    #[inline]
    pub const fn cmd_index(&self, i: u32) -> u32 {
        i & (self.n_window - 1)
    }

    /// `i` 是否在已用区间 `[read, write)` 内（模 hw_size）
    pub const fn used(&self, read: u32, write: u32, i: u32) -> bool {
        let mask = self.hw_size - 1;
        let r = read & mask;
        let w = write & mask;
        let i = i & mask;
        if w >= r {
            i >= r && i < w
        } else {
            !(i < r && i >= w)
        }
    }

    /// 已用项数
    #[inline]
    pub const fn used_count(&self, read: u32, write: u32) -> u32 {
        write.wrapping_sub(read) & (self.hw_size - 1)
    }

    /// 还可写入的项数。窗口小于硬件环时以窗口为上限；否则留一项区分满/空。
    pub const fn space(&self, read: u32, write: u32) -> u32 {
        let max = if self.n_window < self.hw_size {
            self.n_window
        } else {
            self.hw_size - 1
        };
        let used = self.used_count(read, write);
        if used > max {
            0
        } else {
            max - used
        }
    }
}
