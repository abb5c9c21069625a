//! CSR 寄存器地址与位定义
//!
//! 地址、位含义由芯片手册固定，必须逐位一致；按寄存器分组放在子模块中（同 `sdio::types::reg` 的组织方式）。

/// 硬件接口配置
pub const CSR_HW_IF_CONFIG_REG: u32 = 0x000;
/// 中断聚合
pub const CSR_INT_COALESCING: u32 = 0x004;
/// 中断状态（写 1 清除）
pub const CSR_INT: u32 = 0x008;
/// 中断屏蔽（legacy/MSI 模式，置位 = 使能）
pub const CSR_INT_MASK: u32 = 0x00c;
/// FH 中断状态（写 1 清除）
pub const CSR_FH_INT_STATUS: u32 = 0x010;
pub const CSR_RESET: u32 = 0x020;
pub const CSR_GP_CNTRL: u32 = 0x024;
pub const CSR_HW_REV: u32 = 0x028;
pub const CSR_GIO_REG: u32 = 0x03C;
pub const CSR_UCODE_DRV_GP1: u32 = 0x054;
pub const CSR_UCODE_DRV_GP1_SET: u32 = 0x058;
pub const CSR_UCODE_DRV_GP1_CLR: u32 = 0x05c;
pub const CSR_MBOX_SET_REG: u32 = 0x088;
/// ICT 表基址与控制
pub const CSR_DRAM_INT_TBL_REG: u32 = 0x0A0;
pub const CSR_MAC_SHADOW_REG_CTRL: u32 = 0x0A8;
pub const CSR_GIO_CHICKEN_BITS: u32 = 0x100;
pub const CSR_DBG_HPET_MEM_REG: u32 = 0x240;
pub const CSR_DBG_LINK_PWR_MGMT_REG: u32 = 0x250;

pub mod hw_if_config {
    pub const HAP_WAKE_L1A: u32 = 0x0008_0000;
    pub const NIC_READY: u32 = 0x0040_0000;
    pub const PREPARE: u32 = 0x0800_0000;
    pub const ENABLE_PME: u32 = 0x1000_0000;
    pub const PERSIST_MODE: u32 = 0x4000_0000;
}

pub mod gp_cntrl {
    pub const MAC_CLOCK_READY: u32 = 0x0000_0001;
    pub const INIT_DONE: u32 = 0x0000_0004;
    pub const MAC_ACCESS_REQ: u32 = 0x0000_0008;
    pub const GOING_TO_SLEEP: u32 = 0x0000_0010;
    /// 9000 系列：RF-kill 可在 L1A 状态下唤醒
    pub const RFKILL_WAKE_L1A_EN: u32 = 0x0400_0000;
    /// 置位 = 射频开关未按下（radio on）
    pub const HW_RF_KILL_SW: u32 = 0x0800_0000;
}

pub mod reset {
    pub const NMI: u32 = 0x0000_0001;
    pub const SW_RESET: u32 = 0x0000_0080;
    pub const MASTER_DISABLED: u32 = 0x0000_0100;
    pub const STOP_MASTER: u32 = 0x0000_0200;
    pub const LINK_PWR_MGMT_DISABLED: u32 = 0x8000_0000;
}

pub mod gio {
    pub const L0S_DISABLED: u32 = 0x0000_0002;
    /// CSR_GIO_CHICKEN_BITS
    pub const L1A_NO_L0S_RX: u32 = 0x0080_0000;
}

/// CSR_INT / CSR_INT_MASK 中断原因位
pub mod int {
    pub const FH_RX: u32 = 1 << 31;
    pub const HW_ERR: u32 = 1 << 29;
    pub const RX_PERIODIC: u32 = 1 << 28;
    pub const FH_TX: u32 = 1 << 27;
    pub const SCD: u32 = 1 << 26;
    pub const SW_ERR: u32 = 1 << 25;
    pub const PAGING: u32 = 1 << 24;
    pub const RF_KILL: u32 = 1 << 7;
    pub const CT_KILL: u32 = 1 << 6;
    pub const SW_RX: u32 = 1 << 3;
    pub const WAKEUP: u32 = 1 << 1;
    pub const ALIVE: u32 = 1 << 0;

    /// enable() 时写入 CSR_INT_MASK 的全集
    pub const INI_SET_MASK: u32 = FH_RX
        | HW_ERR
        | FH_TX
        | SW_ERR
        | PAGING
        | RF_KILL
        | SW_RX
        | WAKEUP
        | ALIVE
        | RX_PERIODIC;
}

/// CSR_FH_INT_STATUS 位
pub mod fh_int {
    pub const ERR: u32 = 1 << 31;
    pub const HI_PRIOR: u32 = 1 << 30;
    pub const RX_CHNL1: u32 = 1 << 17;
    pub const RX_CHNL0: u32 = 1 << 16;
    pub const TX_CHNL1: u32 = 1 << 1;
    pub const TX_CHNL0: u32 = 1 << 0;
    pub const RX_MASK: u32 = HI_PRIOR | RX_CHNL1 | RX_CHNL0;
    pub const TX_MASK: u32 = TX_CHNL1 | TX_CHNL0;
}

/// CSR_UCODE_DRV_GP1 位
pub mod gp1 {
    pub const SW_BIT_RFKILL: u32 = 0x0000_0002;
    pub const CMD_BLOCKED: u32 = 0x0000_0004;
}

pub mod mbox {
    pub const OS_ALIVE: u32 = 1 << 5;
}

/// CSR_DRAM_INT_TBL_REG 位；ICT 表为 4K 对齐、1024 项 u32
pub mod ict {
    pub const ENABLE: u32 = 1 << 31;
    pub const WRITE_POINTER: u32 = 1 << 28;
    pub const WRAP_CHECK: u32 = 1 << 27;
    pub const SHIFT: u32 = 12;
    pub const COUNT: usize = 1024;
    pub const SIZE: usize = COUNT * 4;
}

pub const CSR_DBG_HPET_MEM_REG_VAL: u32 = 0xFFFF_0000;
pub const CSR_MAC_SHADOW_REG_CTRL_VAL: u32 = 0x800F_FFFF;

/// MSI-X 寄存器；屏蔽寄存器极性与 CSR_INT_MASK 相反：位清零 = 使能
pub mod msix {
    pub const BASE: u32 = 0x2000;
    pub const FH_INT_CAUSES_AD: u32 = BASE + 0x800;
    pub const FH_INT_MASK_AD: u32 = BASE + 0x804;
    pub const HW_INT_CAUSES_AD: u32 = BASE + 0x808;
    pub const HW_INT_MASK_AD: u32 = BASE + 0x80C;
    pub const AUTOMASK_ST_AD: u32 = BASE + 0x810;
    pub const RX_IVAR_AD_REG: u32 = BASE + 0x880;
    pub const IVAR_AD_REG: u32 = BASE + 0x890;

    /// IVAR 每项最高位：原因不自动清除
    pub const NON_AUTO_CLEAR_CAUSE: u8 = 1 << 7;

    #[inline]
    pub const fn rx_ivar(queue: u32) -> u32 {
        RX_IVAR_AD_REG + queue
    }

    #[inline]
    pub const fn ivar(cause: u32) -> u32 {
        IVAR_AD_REG + cause
    }

    pub mod fh_cause {
        /// RX 队列 0/1
        pub const Q0: u32 = 1 << 0;
        pub const Q1: u32 = 1 << 1;
        pub const D2S_CH0_NUM: u32 = 1 << 16;
        pub const D2S_CH1_NUM: u32 = 1 << 17;
        pub const S2D: u32 = 1 << 19;
        pub const FH_ERR: u32 = 1 << 21;

        #[inline]
        pub const fn queue(q: u32) -> u32 {
            1 << q
        }
    }

    pub mod hw_cause {
        pub const ALIVE: u32 = 1 << 0;
        pub const WAKEUP: u32 = 1 << 1;
        pub const CT_KILL: u32 = 1 << 6;
        pub const RF_KILL: u32 = 1 << 7;
        pub const PERIODIC: u32 = 1 << 8;
        pub const SW_ERR: u32 = 1 << 25;
        pub const SCD: u32 = 1 << 26;
        pub const FH_TX: u32 = 1 << 27;
        pub const HW_ERR: u32 = 1 << 29;
        pub const HAP: u32 = 1 << 30;
    }

    /// IVAR 表中各原因的字节偏移
    pub mod ivar_cause {
        pub const D2S_CH0_NUM: u32 = 0x00;
        pub const D2S_CH1_NUM: u32 = 0x01;
        pub const S2D_UCODE_INT: u32 = 0x10;
        pub const FH_ERR: u32 = 0x15;
        pub const REG_ALIVE: u32 = 0x30;
        pub const REG_WAKEUP: u32 = 0x31;
        pub const REG_CT_KILL: u32 = 0x36;
        pub const REG_RF_KILL: u32 = 0x37;
        pub const REG_PERIODIC: u32 = 0x38;
        pub const REG_SW_ERR: u32 = 0x3D;
        pub const REG_SCD: u32 = 0x3E;
        pub const REG_FH_TX: u32 = 0x3F;
        pub const REG_HW_ERR: u32 = 0x41;
        pub const REG_HAP: u32 = 0x42;
    }
}

/// HBUS 目标寄存器（外设访问、队列写指针）
pub mod hbus {
    pub const BASE: u32 = 0x400;
    pub const TARG_PRPH_WADDR: u32 = BASE + 0x044;
    pub const TARG_PRPH_RADDR: u32 = BASE + 0x048;
    pub const TARG_PRPH_WDAT: u32 = BASE + 0x04c;
    pub const TARG_PRPH_RDAT: u32 = BASE + 0x050;
    /// 写入值 = write_ptr | (txq_id << 16)
    pub const TARG_WRPTR: u32 = BASE + 0x060;
}

/// 外设（PRPH）寄存器，经 HBUS 间接访问
pub mod prph {
    pub const UREG_CHICK: u32 = 0x00A0_5C00;
    pub const UREG_CHICK_MSIX_ENABLE: u32 = 1 << 25;
}

/// FH RX 通道
pub mod fh_rx {
    pub const MEM_RCSR_CHNL0_CONFIG_REG: u32 = 0x1C00;
    pub const MEM_RSSR_RX_STATUS_REG: u32 = 0x1C44;
    pub const RSSR_CHNL0_RX_STATUS_CHNL_IDLE: u32 = 0x0100_0000;
    /// 空闲轮询上限（us）
    pub const STOP_TIMEOUT_US: u32 = 1000;

    /// 各 RX 队列 free BD 写指针触发寄存器
    #[inline]
    pub const fn frbdcb_widx_trg(queue: u32) -> u32 {
        0x1C80 + queue * 4
    }
}
