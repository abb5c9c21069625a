//! 传输层错误类型

use axerrno::AxError;

/// 传输层操作结果
pub type TransResult<T = ()> = Result<T, TransError>;

/// 传输层错误
///
/// 除 APM 停止时的对端握手、stop master / RX 停止轮询、停止后重新取得设备所有权外，
/// 错误一律返回给调用方。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransError {
    /// 上电时 MAC 时钟就绪轮询超时
    ClockTimeout,
    /// 射频开关按下且调用方未要求 run_in_rfkill
    KillAsserted,
    /// 设备处于停止/过渡态
    NotReady,
    /// 设备被其它实体（ME）占有
    OwnershipDenied,
    /// 寄存器或 DMA 失败
    Io,
    /// 队列窗口已满
    QueueFull,
    NoMemory,
    InvalidInput,
    /// 同步 host command 等待响应超时
    CmdTimeout,
    /// 已有同步 host command 在进行
    Busy,
}

impl TransError {
    /// 负 errno，与 BSP 层 `Result<_, i32>` 约定一致
    pub const fn errno(self) -> i32 {
        match self {
            TransError::ClockTimeout => -110, // -ETIMEDOUT
            TransError::KillAsserted => -132, // -ERFKILL
            TransError::NotReady => -5,       // -EIO
            TransError::OwnershipDenied => -16, // -EBUSY
            TransError::Io => -5,
            TransError::QueueFull => -28, // -ENOSPC
            TransError::NoMemory => -12,
            TransError::InvalidInput => -22,
            TransError::CmdTimeout => -110,
            TransError::Busy => -16,
        }
    }
}

impl From<TransError> for AxError {
    fn from(e: TransError) -> Self {
        match e {
            TransError::ClockTimeout | TransError::Io => AxError::Io,
            TransError::KillAsserted => AxError::PermissionDenied,
            TransError::NotReady => AxError::BadState,
            TransError::OwnershipDenied | TransError::Busy => AxError::ResourceBusy,
            TransError::QueueFull | TransError::CmdTimeout => AxError::WouldBlock,
            TransError::NoMemory => AxError::NoMemory,
            TransError::InvalidInput => AxError::InvalidInput,
        }
    }
}
