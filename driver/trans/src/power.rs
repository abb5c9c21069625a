//! APM 上电/下电与设备所有权
//!
//! 只借用寄存器层与状态字，不持有任何锁以外的状态；调用方（transport）负责串行化。
//! 所有时序常量是硬件约定，不可调。

use crate::config::TransConfig;
use crate::csr::{self, gio, gp_cntrl, hw_if_config, mbox, reset};
use crate::error::{TransError, TransResult};
use crate::io::{CsrBus, Io};
use crate::status::{StatusFlags, TransStatus};
use crate::sync;

/// MAC 时钟就绪轮询上限（us）
pub const CLOCK_READY_TIMEOUT_US: u32 = 25_000;
/// stop master 轮询上限（us）
pub const STOP_MASTER_TIMEOUT_US: u32 = 100;
/// 软复位后等待（us）
pub const SW_RESET_DELAY_US: u32 = 6_000;
/// NIC_READY 轮询上限（us）
pub const HW_READY_TIMEOUT_US: u32 = 50;
/// 所有权重试：每轮内重试间隔与总时长（us），外层轮数与轮间隔（ms）
pub const PREPARE_RETRY_INTERVAL_US: u32 = 200;
pub const PREPARE_RETRY_BUDGET_US: u32 = 150_000;
pub const PREPARE_ROUNDS: u32 = 10;
pub const PREPARE_ROUND_DELAY_MS: u32 = 25;

pub struct PowerController<'a, B: CsrBus> {
    io: &'a Io<B>,
    status: &'a StatusFlags,
    cfg: &'a TransConfig,
}

impl<'a, B: CsrBus> PowerController<'a, B> {
    pub fn new(io: &'a Io<B>, status: &'a StatusFlags, cfg: &'a TransConfig) -> Self {
        Self { io, status, cfg }
    }

    /// APM 上电：D0U -> D0A
    ///
    /// 三个使能位一律 set 不 write，保留复位后硬件默认位。时钟就绪超时返回
    /// [`TransError::ClockTimeout`]，此时不置 `DEVICE_ENABLED`。
    pub fn apply_power(&self) -> TransResult {
        log::debug!(target: "wireless::trans::power", "apply_power");

        // 关 L0s 不影响 L1
        self.io
            .set_bit(csr::CSR_GIO_CHICKEN_BITS, gio::L1A_NO_L0S_RX);
        // FH 等待门限拉满
        self.io
            .set_bit(csr::CSR_DBG_HPET_MEM_REG, csr::CSR_DBG_HPET_MEM_REG_VAL);
        self.io
            .set_bit(csr::CSR_HW_IF_CONFIG_REG, hw_if_config::HAP_WAKE_L1A);

        self.configure_link();

        self.io.set_bit(csr::CSR_GP_CNTRL, gp_cntrl::INIT_DONE);
        if !self.io.poll_bit(
            csr::CSR_GP_CNTRL,
            gp_cntrl::MAC_CLOCK_READY,
            gp_cntrl::MAC_CLOCK_READY,
            CLOCK_READY_TIMEOUT_US,
        ) {
            log::error!(target: "wireless::trans::power", "apply_power: MAC clock not ready after {}us", CLOCK_READY_TIMEOUT_US);
            return Err(TransError::ClockTimeout);
        }

        self.status.set(TransStatus::DEVICE_ENABLED);
        Ok(())
    }

    /// 链路 ASPM 配置：启用 L1 时禁止 L0s
    fn configure_link(&self) {
        if self.cfg.aspm_l1 {
            self.io.set_bit(csr::CSR_GIO_REG, gio::L0S_DISABLED);
        } else {
            self.io.clear_bit(csr::CSR_GIO_REG, gio::L0S_DISABLED);
        }
        log::debug!(target: "wireless::trans::power", "L1 {}", if self.cfg.aspm_l1 { "enabled, L0s disabled" } else { "disabled" });
    }

    /// APM 下电：D0A -> D0U
    ///
    /// `notify_peer` 时先通知 ME 驱动离开；握手失败只记录，下电本身无条件执行。
    pub fn release_power(&self, notify_peer: bool) {
        log::debug!(target: "wireless::trans::power", "release_power notify_peer={}", notify_peer);

        if notify_peer {
            if !self.status.test(TransStatus::DEVICE_ENABLED) {
                if let Err(e) = self.apply_power() {
                    log::warn!(target: "wireless::trans::power", "release_power: wake for ME handshake failed: {:?}", e);
                }
            }
            self.io
                .set_bit(csr::CSR_DBG_LINK_PWR_MGMT_REG, reset::LINK_PWR_MGMT_DISABLED);
            self.io.set_bit(
                csr::CSR_HW_IF_CONFIG_REG,
                hw_if_config::PREPARE | hw_if_config::ENABLE_PME,
            );
            sync::delay_spin_us(1);
            self.io
                .clear_bit(csr::CSR_DBG_LINK_PWR_MGMT_REG, reset::LINK_PWR_MGMT_DISABLED);
            sync::delay_spin_us(5);
        }

        self.status.clear(TransStatus::DEVICE_ENABLED);

        self.stop_master();
        self.sw_reset();

        self.io.clear_bit(csr::CSR_GP_CNTRL, gp_cntrl::INIT_DONE);
    }

    /// 停止设备 DMA 主控；超时只告警
    pub fn stop_master(&self) {
        self.io.set_bit(csr::CSR_RESET, reset::STOP_MASTER);
        if !self.io.poll_bit(
            csr::CSR_RESET,
            reset::MASTER_DISABLED,
            reset::MASTER_DISABLED,
            STOP_MASTER_TIMEOUT_US,
        ) {
            log::warn!(target: "wireless::trans::power", "master disable timed out");
        }
        log::debug!(target: "wireless::trans::power", "stop master");
    }

    pub fn sw_reset(&self) {
        self.io.set_bit(csr::CSR_RESET, reset::SW_RESET);
        sync::delay_spin_us(SW_RESET_DELAY_US);
    }

    /// 置 NIC_READY 并确认设备已交给主机
    fn set_hw_ready(&self) -> bool {
        self.io
            .set_bit(csr::CSR_HW_IF_CONFIG_REG, hw_if_config::NIC_READY);
        let ready = self.io.poll_bit(
            csr::CSR_HW_IF_CONFIG_REG,
            hw_if_config::NIC_READY,
            hw_if_config::NIC_READY,
            HW_READY_TIMEOUT_US,
        );
        if ready {
            self.io.set_bit(csr::CSR_MBOX_SET_REG, mbox::OS_ALIVE);
        }
        log::debug!(target: "wireless::trans::power", "hardware{} ready", if ready { "" } else { " not" });
        ready
    }

    /// 从 ME 等竞争方取得设备所有权
    pub fn prepare_card_hw(&self) -> TransResult {
        log::debug!(target: "wireless::trans::power", "prepare_card_hw enter");
        if self.set_hw_ready() {
            return Ok(());
        }

        self.io
            .set_bit(csr::CSR_DBG_LINK_PWR_MGMT_REG, reset::LINK_PWR_MGMT_DISABLED);
        sync::delay_spin_us(1000);

        // 总预算跨轮累计：第一轮耗尽后，后续每轮只再试一次
        let mut waited = 0u32;
        for _ in 0..PREPARE_ROUNDS {
            self.io
                .set_bit(csr::CSR_HW_IF_CONFIG_REG, hw_if_config::PREPARE);
            loop {
                if self.set_hw_ready() {
                    return Ok(());
                }
                sync::delay_spin_us(PREPARE_RETRY_INTERVAL_US);
                waited += PREPARE_RETRY_INTERVAL_US;
                if waited >= PREPARE_RETRY_BUDGET_US {
                    break;
                }
            }
            sync::delay_spin_ms(PREPARE_ROUND_DELAY_MS);
        }

        log::error!(target: "wireless::trans::power", "couldn't prepare the card");
        Err(TransError::OwnershipDenied)
    }
}
