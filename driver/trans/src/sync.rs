//! 忙等延时
//!
//! 上电、复位、握手时序要求的 us/ms 级不可抢占延时。无标准时钟时以自旋次数近似，
//! 时长与 CPU 频率相关。

/// 忙等的每毫秒循环数
pub const LOOPS_PER_MS: u32 = 1000;

/// 忙等约 ms 毫秒（mdelay）
#[inline]
pub fn delay_spin_ms(ms: u32) {
    let limit = ms.saturating_mul(LOOPS_PER_MS);
    for _ in 0..limit {
        core::hint::spin_loop();
    }
}

/// 忙等约 us 微秒（udelay），至少自旋一次
#[inline]
pub fn delay_spin_us(us: u32) {
    let limit = us.saturating_mul(LOOPS_PER_MS) / 1000;
    for _ in 0..limit.max(1) {
        core::hint::spin_loop();
    }
}
