//! RX 页内的包格式
//!
//! 一页内可有多个包，每包以 `len_n_flags`(u32) 开头，后接 cmd、group_id、sequence，
//! 包起始按 64 字节对齐。

pub const FH_RSCSR_FRAME_SIZE_MSK: u32 = 0x0000_3FFF;
pub const FH_RSCSR_FRAME_INVALID: u32 = 0x5555_0000;
pub const FH_RSCSR_FRAME_ALIGN: usize = 0x40;

/// sequence 最高位：非命令响应（通知或数据帧）
pub const SEQ_RX_FRAME: u16 = 0x8000;

/// len_n_flags 之后的包头长度
const HDR_AFTER_LEN: usize = 4;

#[inline]
pub const fn seq_to_queue(seq: u16) -> u8 {
    ((seq >> 8) & 0x1f) as u8
}

#[inline]
pub const fn seq_to_index(seq: u16) -> u8 {
    (seq & 0xff) as u8
}

#[inline]
pub const fn queue_to_seq(q: u8) -> u16 {
    ((q as u16) & 0x1f) << 8
}

#[inline]
pub const fn index_to_seq(i: u8) -> u16 {
    i as u16
}

/// 设备上送的一个包
#[derive(Debug, Clone, Copy)]
pub struct RxPacket<'a> {
    pub len_n_flags: u32,
    pub cmd: u8,
    pub group_id: u8,
    pub sequence: u16,
    pub payload: &'a [u8],
}

impl<'a> RxPacket<'a> {
    /// 解析 `buf` 起始处的一个包；长度不合法或遇到结束标记时返回 None
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < 4 + HDR_AFTER_LEN {
            return None;
        }
        let len_n_flags = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if len_n_flags == 0 || len_n_flags == FH_RSCSR_FRAME_INVALID {
            return None;
        }
        let len = (len_n_flags & FH_RSCSR_FRAME_SIZE_MSK) as usize;
        if len < HDR_AFTER_LEN || 4 + len > buf.len() {
            return None;
        }
        Some(Self {
            len_n_flags,
            cmd: buf[4],
            group_id: buf[5],
            sequence: u16::from_le_bytes([buf[6], buf[7]]),
            payload: &buf[4 + HDR_AFTER_LEN..4 + len],
        })
    }

    /// 包在页内占用的字节数（含状态字与对齐）
    pub fn stride(&self) -> usize {
        let len = (self.len_n_flags & FH_RSCSR_FRAME_SIZE_MSK) as usize + 4;
        (len + FH_RSCSR_FRAME_ALIGN - 1) & !(FH_RSCSR_FRAME_ALIGN - 1)
    }

    #[inline]
    pub fn queue(&self) -> u8 {
        seq_to_queue(self.sequence)
    }

    #[inline]
    pub fn index(&self) -> u8 {
        seq_to_index(self.sequence)
    }

    /// 是否为通知/数据帧（不是对 host command 的响应）
    #[inline]
    pub fn is_rx_frame(&self) -> bool {
        self.sequence & SEQ_RX_FRAME != 0
    }
}

/// 遍历一页中的所有包
pub struct RxPacketIter<'a> {
    page: &'a [u8],
    offset: usize,
}

impl<'a> RxPacketIter<'a> {
    pub fn new(page: &'a [u8]) -> Self {
        Self { page, offset: 0 }
    }
}

impl<'a> Iterator for RxPacketIter<'a> {
    type Item = RxPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let pkt = RxPacket::parse(self.page.get(self.offset..)?)?;
        self.offset += pkt.stride();
        Some(pkt)
    }
}

/// 按包格式写入一个包，返回占用字节数（测试与固件模拟使用）
#[cfg(test)]
pub fn write_packet(buf: &mut [u8], cmd: u8, group_id: u8, sequence: u16, payload: &[u8]) -> usize {
    let len = (HDR_AFTER_LEN + payload.len()) as u32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
    buf[4] = cmd;
    buf[5] = group_id;
    buf[6..8].copy_from_slice(&sequence.to_le_bytes());
    buf[8..8 + payload.len()].copy_from_slice(payload);
    (len as usize + 4 + FH_RSCSR_FRAME_ALIGN - 1) & !(FH_RSCSR_FRAME_ALIGN - 1)
}
