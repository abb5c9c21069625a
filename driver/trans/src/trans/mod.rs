//! Transport：设备生命周期
//!
//! 一个 [`Transport`] 对应一块设备。生命周期操作（start_hw / start_fw / fw_alive /
//! stop_device）在 `state` 互斥锁下串行执行；中断下半部只用各自的细粒度锁与原子状态位，
//! 从不拿 `state`。
//!
//! 锁顺序：`state` → `irq`；`state` → `rxq` → `txqs[i]` → `hcmd` → `dma` → RX 池。
//! RX 补充任务只拿 `dma` 再拿池锁，不与其它锁嵌套。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use skb::SkbQueue;

use crate::config::{DeviceFamily, IrqMode, TransConfig};
use crate::csr::{self, fh_rx, gp1, gp_cntrl, ict};
use crate::dma::DmaAllocator;
use crate::error::{TransError, TransResult};
use crate::hcmd::HcmdTracker;
use crate::io::{CsrBus, Io};
use crate::irq::{select_umac_irq_mode, InterruptController, IsrStats};
use crate::ops::{FwLoader, FwMemory, OpModeOps, RingBases};
use crate::power::PowerController;
use crate::rfkill::{RfKillMonitor, RfKillOverride};
use crate::rx::allocator::{RxAllocator, MAX_RX_VID};
use crate::rx::queue::RxQueue;
use crate::status::{StatusFlags, TransStatus};
use crate::tx::queue::TxQueue;
use crate::tx::ring::{TFD_CMD_SLOTS, TFD_QUEUE_SIZE_MAX};

mod isr;
mod xmit;

/// 设备生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    /// start_hw 完成：已取得所有权并上电，只开 RF-kill 中断
    PoweredUp,
    /// 固件已交接、中断全开
    Active,
    Stopping,
    PoweredDown,
}

struct TransState {
    device: DeviceState,
    fw_mem: FwMemory,
    scd_base_addr: u32,
    loader: Box<dyn FwLoader>,
}

pub struct Transport<B: CsrBus, D: DmaAllocator> {
    cfg: TransConfig,
    io: Io<B>,
    status: StatusFlags,
    state: spin::Mutex<TransState>,
    irq: spin::Mutex<InterruptController>,
    rfkill: RfKillMonitor,
    rba: RxAllocator,
    rxq: spin::Mutex<Option<RxQueue>>,
    txqs: Vec<spin::Mutex<Option<TxQueue>>>,
    /// 位图：已启用的 TX 队列
    queue_used: AtomicU32,
    /// 位图：已通知 op-mode 暂停的 TX 队列
    queue_stopped: AtomicU32,
    hcmd: spin::Mutex<HcmdTracker>,
    dma: spin::Mutex<D>,
    op_mode: Arc<dyn OpModeOps>,
}

fn validate(cfg: &TransConfig) -> TransResult {
    let ok = cfg.num_tx_queues > 0
        && cfg.num_tx_queues <= 32
        && cfg.cmd_queue < cfg.num_tx_queues
        && cfg.rx_queue_size.is_power_of_two()
        && cfg.rx_queue_size >= 8
        && cfg.rx_pool_size >= cfg.rx_queue_size
        && cfg.rx_pool_size <= MAX_RX_VID
        && cfg.rx_buf_size >= 256
        && cfg.tx_slot_size >= 64
        && (1..=16).contains(&cfg.msix_vectors);
    if !ok {
        log::error!(target: "wireless::trans", "invalid transport config: {:?}", cfg);
        return Err(TransError::InvalidInput);
    }
    Ok(())
}

impl<B: CsrBus, D: DmaAllocator> Transport<B, D> {
    /// 建立 transport。legacy 模式在这里分配 ICT 表；设备保持停止态直到 [`Self::start_hw`]。
    pub fn attach(
        cfg: TransConfig,
        bus: B,
        mut dma: D,
        op_mode: Arc<dyn OpModeOps>,
        loader: Box<dyn FwLoader>,
    ) -> TransResult<Self> {
        validate(&cfg)?;
        let ict_table = match cfg.irq_mode {
            IrqMode::Legacy => Some(dma.alloc_coherent(ict::SIZE).ok_or(TransError::NoMemory)?),
            IrqMode::Msix => None,
        };
        let irq = InterruptController::new(&cfg, ict_table);
        let txqs = (0..cfg.num_tx_queues).map(|_| spin::Mutex::new(None)).collect();
        log::info!(
            target: "wireless::trans",
            "attach: {:?}, irq {:?}, {} tx queues (cmd {}), rx ring {} pool {}",
            cfg.family,
            cfg.irq_mode,
            cfg.num_tx_queues,
            cfg.cmd_queue,
            cfg.rx_queue_size,
            cfg.rx_pool_size
        );
        Ok(Self {
            rba: RxAllocator::new(cfg.rx_buf_size),
            io: Io::new(bus),
            status: StatusFlags::new(TransStatus::IS_DOWN | TransStatus::OPMODE_DOWN),
            state: spin::Mutex::new(TransState {
                device: DeviceState::Uninitialized,
                fw_mem: FwMemory::default(),
                scd_base_addr: 0,
                loader,
            }),
            irq: spin::Mutex::new(irq),
            rfkill: RfKillMonitor::new(),
            rxq: spin::Mutex::new(None),
            txqs,
            queue_used: AtomicU32::new(0),
            queue_stopped: AtomicU32::new(0),
            hcmd: spin::Mutex::new(HcmdTracker::new()),
            dma: spin::Mutex::new(dma),
            op_mode,
            cfg,
        })
    }

    #[inline]
    pub fn config(&self) -> &TransConfig {
        &self.cfg
    }

    #[inline]
    pub fn io(&self) -> &Io<B> {
        &self.io
    }

    #[inline]
    pub fn status(&self) -> TransStatus {
        self.status.get()
    }

    pub fn device_state(&self) -> DeviceState {
        self.state.lock().device
    }

    /// 固件 alive 时报告的调度器 SRAM 基址
    pub fn scd_base_addr(&self) -> u32 {
        self.state.lock().scd_base_addr
    }

    pub fn isr_stats(&self) -> IsrStats {
        self.irq.lock().stats.clone()
    }

    /// 调试：覆盖 RF-kill 开关读数并立即重新检查
    pub fn set_rfkill_override(&self, ov: RfKillOverride) {
        self.rfkill.set_override(ov);
        self.check_rfkill();
    }

    fn power(&self) -> PowerController<'_, B> {
        PowerController::new(&self.io, &self.status, &self.cfg)
    }

    /// 读开关、更新状态位，变化时通知 op-mode
    fn check_rfkill(&self) -> bool {
        let op_mode = &self.op_mode;
        self.rfkill
            .check(&self.io, &self.status, &mut |killed| op_mode.hw_rf_kill(killed))
    }

    #[inline]
    fn queue_bit(txq_id: usize) -> u32 {
        1u32 << txq_id
    }

    /// 取得所有权、上电并只开 RF-kill 中断
    pub fn start_hw(&self) -> TransResult {
        let mut st = self.state.lock();
        if matches!(st.device, DeviceState::PoweredUp | DeviceState::Active) {
            log::debug!(target: "wireless::trans", "start_hw: already started");
            return Ok(());
        }

        let power = self.power();
        if let Err(e) = power.prepare_card_hw() {
            log::error!(target: "wireless::trans", "error while preparing HW: {:?}", e);
            return Err(e);
        }
        power.sw_reset();
        power.apply_power()?;

        select_umac_irq_mode(&self.io, &self.cfg, &self.status);
        {
            let mut irq = self.irq.lock();
            irq.configure_msix_hw(&self.io);
            // 此后 op-mode 始终能收到 RF-kill 状态
            irq.enable_rfkill_only(&self.io);
        }

        self.status
            .clear(TransStatus::IS_DOWN | TransStatus::OPMODE_DOWN);
        self.check_rfkill();
        st.device = DeviceState::PoweredUp;
        log::info!(target: "wireless::trans", "hardware started");
        Ok(())
    }

    /// 初始化 NIC、交给加载器装载固件并打开中断
    ///
    /// 装载前后各检查一次 RF-kill。装载开始后任一步失败都会走内部停止流程，
    /// 设备回到停止态后再返回错误。
    pub fn start_fw(&self, image: &[u8], run_in_rfkill: bool) -> TransResult {
        // AMT 可能占有设备
        if let Err(e) = self.power().prepare_card_hw() {
            log::warn!(target: "wireless::trans", "exit HW not ready");
            return Err(e);
        }

        {
            let mut irq = self.irq.lock();
            irq.enable_rfkill_only(&self.io);
            self.io.write32(csr::CSR_INT, 0xffff_ffff);
            // RF-kill 中断刚打开，处理函数可能正在跑；先全关
            irq.disable(&self.io, &self.status);
        }

        let mut st = self.state.lock();

        let hw_rfkill = self.check_rfkill();
        if hw_rfkill && !run_in_rfkill {
            log::warn!(target: "wireless::trans", "start_fw: RF-kill asserted");
            return Err(TransError::KillAsserted);
        }

        if self.status.test(TransStatus::IS_DOWN) {
            log::warn!(target: "wireless::trans", "can't start_fw since the HW hasn't been started");
            return Err(TransError::NotReady);
        }

        // 清 RF-kill 握手位
        self.io.write32(csr::CSR_UCODE_DRV_GP1_CLR, gp1::SW_BIT_RFKILL);
        self.io.write32(csr::CSR_UCODE_DRV_GP1_CLR, gp1::CMD_BLOCKED);
        self.io.write32(csr::CSR_INT, 0xffff_ffff);

        if let Err(e) = self.bring_up(&mut st, image) {
            log::error!(target: "wireless::trans", "start_fw failed: {:?}", e);
            self.stop_locked(&mut st, false);
            return Err(e);
        }

        // 中断已全开，开关可能在装载期间被按下
        let hw_rfkill = self.check_rfkill();
        if hw_rfkill && !run_in_rfkill {
            log::warn!(target: "wireless::trans", "start_fw: RF-kill asserted during load");
            self.stop_locked(&mut st, false);
            return Err(TransError::KillAsserted);
        }

        st.device = DeviceState::Active;
        log::info!(target: "wireless::trans", "firmware started, {} bytes", image.len());
        Ok(())
    }

    fn bring_up(&self, st: &mut TransState, image: &[u8]) -> TransResult {
        self.nic_init()?;

        self.irq.lock().enable_fw_load_only(&self.io);

        let rings = self.ring_bases()?;
        let mem = {
            let mut dma = self.dma.lock();
            st.fw_mem.free_all(&mut *dma);
            st.loader.load(&self.io, &rings, image, &mut *dma)?
        };
        log::debug!(
            target: "wireless::trans",
            "firmware memory: {} boot, {} paging",
            mem.boot.len(),
            mem.paging.len()
        );
        st.fw_mem = mem;

        // 固件接管后打开全部中断
        self.irq.lock().enable(&self.io, &self.status);
        Ok(())
    }

    fn nic_init(&self) -> TransResult {
        self.power().apply_power()?;
        self.op_mode.nic_config(&self.io);
        self.rx_init()?;
        self.tx_init()?;
        self.io
            .set_bit(csr::CSR_MAC_SHADOW_REG_CTRL, csr::CSR_MAC_SHADOW_REG_CTRL_VAL);
        log::debug!(target: "wireless::trans", "enabling shadow registers in device");
        Ok(())
    }

    /// 首次分配 RX 队列与缓冲池，之后只复位；预分配整池缓冲并发布到环上
    fn rx_init(&self) -> TransResult {
        let mut rxq = self.rxq.lock();
        let mut dma = self.dma.lock();
        let q = match rxq.take() {
            Some(mut q) => {
                q.reset(&self.rba);
                q
            }
            None => {
                let q = RxQueue::alloc(0, self.cfg.rx_queue_size, &mut *dma)?;
                self.rba.init(self.cfg.rx_pool_size);
                q
            }
        };
        let q = rxq.insert(q);

        self.rba.request_refill(self.cfg.rx_pool_size);
        self.rba.refill_work(&mut *dma);
        drop(dma);

        if self.rba.counts().allocated == 0 {
            log::error!(target: "wireless::trans::rx", "rx init: no buffers allocated");
            return Err(TransError::NoMemory);
        }
        let published = q.publish_ready_buffers(&self.io, &self.rba);
        log::debug!(target: "wireless::trans::rx", "rx init: {} buffers on ring", published);
        Ok(())
    }

    /// 命令队列：首次分配，之后清空复用
    fn tx_init(&self) -> TransResult {
        let id = self.cfg.cmd_queue;
        let mut slot = self.txqs[id].lock();
        match slot.as_mut() {
            Some(q) => {
                let _ = q.unmap();
            }
            None => {
                let mut dma = self.dma.lock();
                *slot = Some(TxQueue::alloc(
                    id as u32,
                    TFD_CMD_SLOTS,
                    self.cfg.tx_slot_size,
                    &mut *dma,
                )?);
            }
        }
        self.queue_used
            .fetch_or(Self::queue_bit(id), Ordering::AcqRel);
        Ok(())
    }

    fn ring_bases(&self) -> TransResult<RingBases> {
        let (rx_bd, rx_used_bd, rx_rb_stts) = {
            let rxq = self.rxq.lock();
            let q = rxq.as_ref().ok_or(TransError::NotReady)?;
            (q.bd_bus(), q.used_bd_bus(), q.rb_stts_bus())
        };
        let cmd_tfds = {
            let txq = self.txqs[self.cfg.cmd_queue].lock();
            txq.as_ref().ok_or(TransError::NotReady)?.tfd_bus()
        };
        Ok(RingBases {
            rx_bd,
            rx_used_bd,
            rx_rb_stts,
            cmd_tfds,
            cmd_queue: self.cfg.cmd_queue as u32,
        })
    }

    /// 固件报告 alive：切到 ICT（legacy），清空队列位图，释放启动期固件内存
    pub fn fw_alive(&self, scd_addr: u32) {
        let mut st = self.state.lock();
        self.irq.lock().reset_ict(&self.io, &self.status);

        self.queue_stopped.store(0, Ordering::Release);
        self.queue_used.store(0, Ordering::Release);

        st.scd_base_addr = scd_addr;
        // 分页内存固件仍在使用
        st.fw_mem.free_boot(&mut *self.dma.lock());
        log::info!(target: "wireless::trans", "firmware alive, scd base 0x{:x}", scd_addr);
    }

    /// 停止设备；重复调用无副作用
    pub fn stop_device(&self, low_power: bool) {
        let mut st = self.state.lock();
        self.status.set(TransStatus::OPMODE_DOWN);
        let was_in_rfkill = self.status.test(TransStatus::RFKILL_OPMODE);
        self.stop_locked(&mut st, low_power);
        let op_mode = &self.op_mode;
        self.rfkill.reconcile_after_stop(
            &self.io,
            &self.status,
            was_in_rfkill,
            &mut |killed| op_mode.hw_rf_kill(killed),
        );
    }

    fn stop_locked(&self, st: &mut TransState, low_power: bool) {
        if self.status.test(TransStatus::IS_DOWN) {
            return;
        }
        self.status.set(TransStatus::IS_DOWN);
        st.device = DeviceState::Stopping;
        log::debug!(target: "wireless::trans", "stop device, low_power={}", low_power);

        {
            let mut irq = self.irq.lock();
            irq.disable(&self.io, &self.status);
            irq.disable_ict();
        }

        // 装载中途重启可能已经停过一次
        if self.status.test_and_clear(TransStatus::DEVICE_ENABLED) {
            log::debug!(target: "wireless::trans", "DEVICE_ENABLED bit was set and is now cleared");
            self.tx_stop();
            self.rx_stop();
        }

        st.fw_mem.free_all(&mut *self.dma.lock());

        self.io.clear_bit(csr::CSR_GP_CNTRL, gp_cntrl::MAC_ACCESS_REQ);

        let power = self.power();
        power.release_power(false);
        power.sw_reset();

        {
            let mut irq = self.irq.lock();
            // 复位擦除了 IVAR 表
            irq.configure_msix_hw(&self.io);
            // 部分硬件在复位时仍会挂起 RF-kill 中断，再应答一次
            irq.disable(&self.io, &self.status);
        }

        self.status.clear(
            TransStatus::SYNC_HCMD_ACTIVE | TransStatus::INT_ENABLED | TransStatus::TPOWER_PMI,
        );

        self.irq.lock().enable_rfkill_only(&self.io);

        // 重新占住设备，防止被其它实体拿走
        if let Err(e) = power.prepare_card_hw() {
            log::warn!(target: "wireless::trans", "stop: could not re-take ownership: {:?}", e);
        }
        st.device = DeviceState::PoweredDown;
    }

    fn tx_stop(&self) {
        for (id, slot) in self.txqs.iter().enumerate() {
            if let Some(q) = slot.lock().as_mut() {
                let dropped = q.unmap();
                if !dropped.is_empty() {
                    log::debug!(target: "wireless::trans::tx", "txq{}: dropped {} frames", id, dropped.len());
                }
            }
        }
        self.hcmd.lock().clear();
        self.queue_used.store(0, Ordering::Release);
        self.queue_stopped.store(0, Ordering::Release);
    }

    fn rx_stop(&self) {
        self.io.write32(fh_rx::MEM_RCSR_CHNL0_CONFIG_REG, 0);
        if !self.io.poll_bit(
            fh_rx::MEM_RSSR_RX_STATUS_REG,
            fh_rx::RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
            fh_rx::RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
            fh_rx::STOP_TIMEOUT_US,
        ) {
            log::warn!(target: "wireless::trans::rx", "rx DMA stop timed out");
        }
        if let Some(q) = self.rxq.lock().as_mut() {
            q.reset(&self.rba);
        }
    }

    /// op-mode 卸载：关中断并下电（通知 ME），不释放队列
    pub fn op_mode_leave(&self) {
        let mut st = self.state.lock();
        self.irq.lock().disable(&self.io, &self.status);
        self.power().release_power(true);
        {
            let mut irq = self.irq.lock();
            irq.disable(&self.io, &self.status);
            irq.disable_ict();
        }
        st.device = DeviceState::PoweredDown;
        log::info!(target: "wireless::trans", "op-mode left");
    }

    /// 启用数据队列（固件已 alive）
    pub fn enable_txq(&self, txq_id: usize) -> TransResult {
        let st = self.state.lock();
        if st.device != DeviceState::Active {
            return Err(TransError::NotReady);
        }
        if txq_id >= self.txqs.len() || txq_id == self.cfg.cmd_queue {
            return Err(TransError::InvalidInput);
        }
        let bit = Self::queue_bit(txq_id);
        if self.queue_used.load(Ordering::Acquire) & bit != 0 {
            log::warn!(target: "wireless::trans::tx", "txq{} already enabled", txq_id);
            return Err(TransError::Busy);
        }
        let mut slot = self.txqs[txq_id].lock();
        match slot.as_mut() {
            Some(q) => {
                // 停止设备时已清空，正常不会剩帧
                let dropped = q.unmap();
                if !dropped.is_empty() {
                    log::warn!(target: "wireless::trans::tx", "txq{}: dropped {} stale frames", txq_id, dropped.len());
                }
            }
            None => {
                let mut dma = self.dma.lock();
                *slot = Some(TxQueue::alloc(
                    txq_id as u32,
                    TFD_QUEUE_SIZE_MAX,
                    self.cfg.tx_slot_size,
                    &mut *dma,
                )?);
            }
        }
        self.queue_stopped.fetch_and(!bit, Ordering::AcqRel);
        self.queue_used.fetch_or(bit, Ordering::AcqRel);
        log::debug!(target: "wireless::trans::tx", "txq{} enabled", txq_id);
        Ok(())
    }

    /// 停用数据队列并释放其内存，返回尚未回收的帧
    pub fn disable_txq(&self, txq_id: usize) -> TransResult<SkbQueue> {
        if txq_id >= self.txqs.len() || txq_id == self.cfg.cmd_queue {
            return Err(TransError::InvalidInput);
        }
        let bit = Self::queue_bit(txq_id);
        if self.queue_used.fetch_and(!bit, Ordering::AcqRel) & bit == 0 {
            log::warn!(target: "wireless::trans::tx", "queue {} not used", txq_id);
            return Ok(SkbQueue::new());
        }
        self.queue_stopped.fetch_and(!bit, Ordering::AcqRel);
        let q = self.txqs[txq_id].lock().take();
        Ok(match q {
            Some(q) => q.free(&mut *self.dma.lock()),
            None => SkbQueue::new(),
        })
    }

    /// RX 补充任务：为待补充缓冲分配页，再把就绪缓冲发布到环上
    pub fn rx_allocator_work(&self) -> usize {
        let n = self.rba.refill_work(&mut *self.dma.lock());
        if n > 0 {
            if let Some(q) = self.rxq.lock().as_mut() {
                q.publish_ready_buffers(&self.io, &self.rba);
            }
        }
        n
    }

    /// 22000 系列 alive 后重新发布 RX 缓冲
    fn restock_rx(&self) {
        if self.cfg.family < DeviceFamily::F22000 {
            return;
        }
        if let Some(q) = self.rxq.lock().as_mut() {
            q.publish_ready_buffers(&self.io, &self.rba);
        }
    }
}

impl<B: CsrBus, D: DmaAllocator> Drop for Transport<B, D> {
    fn drop(&mut self) {
        let dma = self.dma.get_mut();
        for slot in self.txqs.iter_mut() {
            if let Some(q) = slot.get_mut().take() {
                let _ = q.free(&mut *dma);
            }
        }
        if let Some(q) = self.rxq.get_mut().take() {
            q.free(&mut *dma);
        }
        self.rba.free_all(&mut *dma);
        if let Some(t) = self.irq.get_mut().take_ict_table() {
            dma.free_coherent(t);
        }
        self.state.get_mut().fw_mem.free_all(&mut *dma);
        log::debug!(target: "wireless::trans", "transport released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{hbus, int, msix};
    use crate::hcmd::{CmdFlags, HostCmd};
    use crate::io::CsrIo;
    use crate::rx::packet::{write_packet, RxPacket, SEQ_RX_FRAME};
    use crate::sim::{SimBus, SimDma};
    use alloc::sync::Weak;
    use alloc::vec;
    use core::sync::atomic::AtomicUsize;
    use skb::SkBuff;

    #[derive(Default)]
    struct RecOpMode {
        rfkill: spin::Mutex<Vec<bool>>,
        rx: spin::Mutex<Vec<(u8, u16)>>,
        full: spin::Mutex<Vec<u32>>,
        not_full: spin::Mutex<Vec<u32>>,
        errors: AtomicUsize,
    }

    impl OpModeOps for RecOpMode {
        fn hw_rf_kill(&self, killed: bool) {
            self.rfkill.lock().push(killed);
        }
        fn nic_error(&self) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn rx(&self, pkt: &RxPacket<'_>) {
            self.rx.lock().push((pkt.cmd, pkt.sequence));
        }
        fn queue_full(&self, txq: u32) {
            self.full.lock().push(txq);
        }
        fn queue_not_full(&self, txq: u32) {
            self.not_full.lock().push(txq);
        }
    }

    #[derive(Default)]
    struct TestLoader {
        fail: bool,
        boot: usize,
        paging: usize,
        /// 装载期间按下开关
        kill: Option<SimBus>,
    }

    impl FwLoader for TestLoader {
        fn load(
            &mut self,
            _io: &dyn CsrIo,
            rings: &RingBases,
            image: &[u8],
            dma: &mut dyn DmaAllocator,
        ) -> TransResult<FwMemory> {
            assert!(!image.is_empty());
            assert_ne!(rings.rx_bd, 0);
            assert_ne!(rings.cmd_tfds, 0);
            if self.fail {
                return Err(TransError::Io);
            }
            let mut mem = FwMemory::default();
            for _ in 0..self.boot {
                mem.boot.push(dma.alloc_coherent(4096).ok_or(TransError::NoMemory)?);
            }
            for _ in 0..self.paging {
                mem.paging.push(dma.alloc_coherent(4096).ok_or(TransError::NoMemory)?);
            }
            if let Some(bus) = &self.kill {
                bus.set_rf_kill(true);
            }
            Ok(mem)
        }
    }

    struct Fixture {
        t: Transport<SimBus, SimDma>,
        bus: SimBus,
        dma: SimDma,
        op: Arc<RecOpMode>,
    }

    const IMAGE: &[u8] = &[0x5a; 64];

    fn test_cfg(mode: IrqMode) -> TransConfig {
        TransConfig {
            irq_mode: mode,
            rx_queue_size: 32,
            rx_pool_size: 64,
            tx_slot_size: 512,
            hcmd_timeout_ms: 20,
            ..TransConfig::default()
        }
    }

    fn fixture_with(mode: IrqMode, loader: TestLoader) -> Fixture {
        let bus = SimBus::new();
        let dma = SimDma::new();
        let op = Arc::new(RecOpMode::default());
        let t = Transport::attach(
            test_cfg(mode),
            bus.clone(),
            dma.clone(),
            op.clone() as Arc<dyn OpModeOps>,
            Box::new(loader),
        )
        .unwrap();
        Fixture { t, bus, dma, op }
    }

    fn fixture(mode: IrqMode) -> Fixture {
        fixture_with(
            mode,
            TestLoader {
                boot: 2,
                paging: 1,
                ..TestLoader::default()
            },
        )
    }

    fn active(mode: IrqMode) -> Fixture {
        let f = fixture(mode);
        f.t.start_hw().unwrap();
        f.t.start_fw(IMAGE, false).unwrap();
        f
    }

    /// 设备把一个包写进下一块 RX 缓冲并交回
    fn inject_rx(f: &Fixture, cmd: u8, seq: u16, payload: &[u8]) {
        let mut rxq = f.t.rxq.lock();
        let q = rxq.as_mut().unwrap();
        let vid = q.next_hw_vid();
        f.t.rba
            .with_page_mut(vid, |p| write_packet(p.as_mut_slice(), cmd, 0, seq, payload))
            .unwrap();
        q.hw_complete(1);
    }

    fn raise_rx(f: &Fixture) {
        match f.t.cfg.irq_mode {
            IrqMode::Msix => f.bus.raise(msix::FH_INT_CAUSES_AD, msix::fh_cause::Q0),
            IrqMode::Legacy => {
                let mut irq = f.t.irq.lock();
                if irq.use_ict() {
                    irq.ict_inject(0, 0x8000);
                } else {
                    drop(irq);
                    f.bus.raise(csr::CSR_INT, int::FH_RX);
                }
            }
        }
    }

    #[test]
    fn start_hw_then_fw_reaches_active() {
        let f = fixture(IrqMode::Msix);
        assert_eq!(f.t.device_state(), DeviceState::Uninitialized);
        f.t.start_hw().unwrap();
        assert_eq!(f.t.device_state(), DeviceState::PoweredUp);
        assert!(!f.t.status().contains(TransStatus::IS_DOWN));
        // 重复调用无副作用
        let resets = f.bus.sw_reset_count();
        f.t.start_hw().unwrap();
        assert_eq!(f.bus.sw_reset_count(), resets);

        f.t.start_fw(IMAGE, false).unwrap();
        assert_eq!(f.t.device_state(), DeviceState::Active);
        assert!(f.t.status().contains(TransStatus::INT_ENABLED | TransStatus::DEVICE_ENABLED));
        assert_eq!(
            f.bus.peek(csr::CSR_MAC_SHADOW_REG_CTRL),
            csr::CSR_MAC_SHADOW_REG_CTRL_VAL
        );
        assert_eq!(f.t.state.lock().fw_mem.boot.len(), 2);
        assert!(f.op.rfkill.lock().is_empty());
    }

    #[test]
    fn start_fw_before_start_hw_is_not_ready() {
        let f = fixture(IrqMode::Msix);
        assert_eq!(f.t.start_fw(IMAGE, false), Err(TransError::NotReady));
        assert!(f.bus.writes_to(csr::CSR_MAC_SHADOW_REG_CTRL).is_empty());
    }

    #[test]
    fn start_fw_refused_in_rfkill() {
        let f = fixture(IrqMode::Msix);
        f.bus.set_rf_kill(true);
        f.t.start_hw().unwrap();
        assert_eq!(*f.op.rfkill.lock(), [true]);

        assert_eq!(f.t.start_fw(IMAGE, false), Err(TransError::KillAsserted));
        assert!(f.bus.writes_to(csr::CSR_MAC_SHADOW_REG_CTRL).is_empty());
        assert_eq!(f.t.device_state(), DeviceState::PoweredUp);
        assert_eq!(*f.op.rfkill.lock(), [true]);
    }

    #[test]
    fn start_fw_runs_in_rfkill_when_asked() {
        let f = fixture(IrqMode::Msix);
        f.bus.set_rf_kill(true);
        f.t.start_hw().unwrap();
        f.t.start_fw(IMAGE, true).unwrap();
        assert_eq!(f.t.device_state(), DeviceState::Active);
        assert!(f.t.status().contains(TransStatus::RFKILL_HW));
    }

    #[test]
    fn kill_during_load_stops_device() {
        let bus = SimBus::new();
        let dma = SimDma::new();
        let op = Arc::new(RecOpMode::default());
        let loader = TestLoader {
            boot: 1,
            paging: 1,
            kill: Some(bus.clone()),
            ..TestLoader::default()
        };
        let t = Transport::attach(
            test_cfg(IrqMode::Msix),
            bus.clone(),
            dma.clone(),
            op.clone() as Arc<dyn OpModeOps>,
            Box::new(loader),
        )
        .unwrap();
        t.start_hw().unwrap();

        assert_eq!(t.start_fw(IMAGE, false), Err(TransError::KillAsserted));
        assert_eq!(t.device_state(), DeviceState::PoweredDown);
        assert!(t.status().contains(TransStatus::IS_DOWN));
        assert!(!t.status().contains(TransStatus::INT_ENABLED));
        {
            let st = t.state.lock();
            assert!(st.fw_mem.boot.is_empty() && st.fw_mem.paging.is_empty());
        }
        assert_eq!(*op.rfkill.lock(), [true]);
        drop(t);
        assert_eq!(dma.live(), 0);
    }

    #[test]
    fn loader_failure_stops_device() {
        let f = fixture_with(
            IrqMode::Msix,
            TestLoader {
                fail: true,
                ..TestLoader::default()
            },
        );
        f.t.start_hw().unwrap();
        assert_eq!(f.t.start_fw(IMAGE, false), Err(TransError::Io));
        assert_eq!(f.t.device_state(), DeviceState::PoweredDown);
        assert!(f.t.status().contains(TransStatus::IS_DOWN));
    }

    #[test]
    fn clock_timeout_during_nic_init() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        f.bus.set_clock_ready(false);
        assert_eq!(f.t.start_fw(IMAGE, false), Err(TransError::ClockTimeout));
        let s = f.t.status();
        assert!(!s.contains(TransStatus::DEVICE_ENABLED));
        assert!(s.contains(TransStatus::IS_DOWN));
        assert_eq!(f.t.device_state(), DeviceState::PoweredDown);
    }

    #[test]
    fn ownership_denied() {
        let f = fixture(IrqMode::Msix);
        f.bus.set_nic_owned(false);
        assert_eq!(f.t.start_hw(), Err(TransError::OwnershipDenied));
        assert_eq!(f.t.device_state(), DeviceState::Uninitialized);
        assert!(f.t.status().contains(TransStatus::IS_DOWN));
    }

    #[test]
    fn stop_is_idempotent() {
        let f = active(IrqMode::Msix);
        f.t.stop_device(false);
        assert_eq!(f.t.device_state(), DeviceState::PoweredDown);
        let resets = f.bus.sw_reset_count();
        f.bus.clear_log();
        f.t.stop_device(false);
        assert!(f.bus.write_log().is_empty());
        assert_eq!(f.bus.sw_reset_count(), resets);
    }

    #[test]
    fn msix_stop_leaves_only_rfkill_enabled() {
        let f = active(IrqMode::Msix);
        f.t.stop_device(false);
        assert_eq!(f.bus.peek(msix::HW_INT_MASK_AD), !msix::hw_cause::RF_KILL);
        let s = f.t.status();
        assert!(s.contains(TransStatus::IS_DOWN | TransStatus::OPMODE_DOWN));
        assert!(!s.intersects(
            TransStatus::DEVICE_ENABLED | TransStatus::INT_ENABLED | TransStatus::SYNC_HCMD_ACTIVE
        ));
        // 停止后重新占住设备
        assert_ne!(
            f.bus.peek(csr::CSR_HW_IF_CONFIG_REG) & csr::hw_if_config::NIC_READY,
            0
        );
    }

    #[test]
    fn legacy_stop_masks_then_enables_rfkill() {
        let f = active(IrqMode::Legacy);
        f.bus.set_rfkill_irq_on_reset(true);
        f.bus.set_rf_kill(true);
        f.bus.clear_log();
        f.t.stop_device(false);
        assert_eq!(f.bus.writes_to(csr::CSR_INT_MASK), [0, 0, int::RF_KILL]);
        // 复位顺带挂起的 RF-kill 中断已被应答
        assert_eq!(f.bus.peek(csr::CSR_INT), 0);
        assert_eq!(*f.op.rfkill.lock(), [true]);
    }

    #[test]
    fn stop_reports_rfkill_change() {
        let f = active(IrqMode::Msix);
        f.bus.set_rf_kill(true);
        f.t.stop_device(false);
        assert_eq!(*f.op.rfkill.lock(), [true]);
        assert!(f.t.status().contains(TransStatus::RFKILL_OPMODE));
    }

    #[test]
    fn restart_after_stop() {
        let f = active(IrqMode::Msix);
        f.t.stop_device(false);
        f.t.start_hw().unwrap();
        f.t.start_fw(IMAGE, false).unwrap();
        assert_eq!(f.t.device_state(), DeviceState::Active);
        let cmdq = f.t.txqs[0].lock();
        assert_eq!(cmdq.as_ref().unwrap().write_ptr(), 0);
    }

    #[test]
    fn fw_alive_frees_boot_memory_only() {
        let f = active(IrqMode::Msix);
        let live = f.dma.live();
        f.t.fw_alive(0x80_0000);
        assert_eq!(f.dma.live(), live - 2);
        assert_eq!(f.t.scd_base_addr(), 0x80_0000);
        f.t.stop_device(false);
        assert_eq!(f.dma.live(), live - 3);
    }

    #[test]
    fn op_mode_leave_powers_down() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        f.bus.clear_log();
        f.t.op_mode_leave();
        assert_eq!(f.t.device_state(), DeviceState::PoweredDown);
        assert!(!f.t.status().contains(TransStatus::DEVICE_ENABLED));
        assert_eq!(f.bus.writes_to(csr::CSR_DBG_LINK_PWR_MGMT_REG).len(), 2);
    }

    #[test]
    fn drop_releases_all_dma() {
        let f = active(IrqMode::Legacy);
        f.t.enable_txq(1).unwrap();
        f.t.tx(1, SkBuff::from_slice(&[1; 100])).unwrap();
        let dma = f.dma.clone();
        assert!(dma.live() > 0);
        drop(f);
        assert_eq!(dma.live(), 0);
    }

    #[test]
    fn attach_rejects_bad_config() {
        let cfg = TransConfig {
            rx_queue_size: 30,
            ..test_cfg(IrqMode::Msix)
        };
        let r = Transport::attach(
            cfg,
            SimBus::new(),
            SimDma::new(),
            Arc::new(RecOpMode::default()) as Arc<dyn OpModeOps>,
            Box::new(TestLoader::default()),
        );
        assert_eq!(r.err(), Some(TransError::InvalidInput));

        let cfg = TransConfig {
            cmd_queue: 4,
            ..test_cfg(IrqMode::Msix)
        };
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn sync_hcmd_returns_response() {
        let f = active(IrqMode::Msix);
        // 响应先于等待到达
        inject_rx(&f, 0x42, 0, &[7, 7]);
        raise_rx(&f);

        let cmd = HostCmd::new(0x42, 0, &[1, 2, 3]).with_flags(CmdFlags::WANT_SKB);
        let resp = f.t.send_hcmd(&cmd).unwrap();
        assert_eq!(resp.as_deref(), Some(&[7u8, 7][..]));
        assert!(!f.t.status().contains(TransStatus::SYNC_HCMD_ACTIVE));
        assert_eq!(*f.op.rx.lock(), [(0x42, 0)]);
        assert_eq!(f.t.txqs[0].lock().as_ref().unwrap().read_ptr(), 1);
    }

    #[test]
    fn sync_hcmd_times_out() {
        let f = active(IrqMode::Msix);
        let cmd = HostCmd::new(0x10, 0, &[0; 4]);
        assert_eq!(f.t.send_hcmd(&cmd), Err(TransError::CmdTimeout));
        assert!(!f.t.status().contains(TransStatus::SYNC_HCMD_ACTIVE));
        assert_eq!(f.t.hcmd.lock().pending(), 0);
    }

    #[test]
    fn second_sync_hcmd_is_busy() {
        let f = active(IrqMode::Msix);
        f.t.status.set(TransStatus::SYNC_HCMD_ACTIVE);
        let cmd = HostCmd::new(0x10, 0, &[0; 4]);
        assert_eq!(f.t.send_hcmd(&cmd), Err(TransError::Busy));
        assert_eq!(f.t.txqs[0].lock().as_ref().unwrap().write_ptr(), 0);
    }

    #[test]
    fn async_hcmd_completes_without_sync_flag() {
        let f = active(IrqMode::Msix);
        let cmd = HostCmd::new(0x20, 1, &[9; 8]).with_flags(CmdFlags::ASYNC);
        assert_eq!(f.t.send_hcmd(&cmd), Ok(None));
        assert_eq!(f.t.txqs[0].lock().as_ref().unwrap().write_ptr(), 1);

        let bad = HostCmd::new(0x20, 1, &[]).with_flags(CmdFlags::ASYNC | CmdFlags::WANT_SKB);
        assert_eq!(f.t.send_hcmd(&bad), Err(TransError::InvalidInput));

        inject_rx(&f, 0x20, 0, &[]);
        raise_rx(&f);
        assert!(f.t.handle_interrupt());
        assert_eq!(f.t.txqs[0].lock().as_ref().unwrap().read_ptr(), 1);
        assert!(!f.t.status().contains(TransStatus::SYNC_HCMD_ACTIVE));
    }

    #[test]
    fn hcmd_in_rfkill() {
        let f = active(IrqMode::Msix);
        f.bus.set_rf_kill(true);
        f.bus.raise(msix::HW_INT_CAUSES_AD, msix::hw_cause::RF_KILL);
        assert!(f.t.handle_interrupt());
        assert_eq!(*f.op.rfkill.lock(), [true]);

        let cmd = HostCmd::new(0x10, 0, &[0; 4]);
        assert_eq!(f.t.send_hcmd(&cmd), Err(TransError::KillAsserted));
        let cmd = cmd.with_flags(CmdFlags::ASYNC | CmdFlags::SEND_IN_RFKILL);
        assert_eq!(f.t.send_hcmd(&cmd), Ok(None));
    }

    #[test]
    fn rfkill_interrupt_while_powered_up() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        f.bus.set_rf_kill(true);
        f.bus.raise(msix::HW_INT_CAUSES_AD, msix::hw_cause::RF_KILL);
        assert!(f.t.handle_interrupt());
        assert_eq!(*f.op.rfkill.lock(), [true]);
        assert_eq!(f.t.isr_stats().rfkill, 1);
        // 自动屏蔽已解除
        assert_eq!(f.bus.peek(msix::AUTOMASK_ST_AD), 0b11);
    }

    #[test]
    fn rfkill_override_reports() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        f.t.set_rfkill_override(RfKillOverride::ForceOn);
        assert_eq!(*f.op.rfkill.lock(), [true]);
    }

    #[test]
    fn rx_notification_reaches_op_mode() {
        let f = active(IrqMode::Msix);
        inject_rx(&f, 0x1c, SEQ_RX_FRAME, &[1, 2, 3]);
        raise_rx(&f);
        assert!(f.t.handle_interrupt());
        assert_eq!(*f.op.rx.lock(), [(0x1c, SEQ_RX_FRAME)]);
        assert_eq!(f.t.isr_stats().rx, 1);
        // 已处理的缓冲由补充任务重新分配页
        assert_eq!(f.t.rx_allocator_work(), 1);
        assert!(!f.t.handle_interrupt());
    }

    #[test]
    fn legacy_rx_through_ict() {
        let f = active(IrqMode::Legacy);
        f.t.fw_alive(0);
        assert!(f.t.irq.lock().use_ict());
        inject_rx(&f, 0x1c, SEQ_RX_FRAME, &[4; 16]);
        raise_rx(&f);
        assert!(f.t.handle_interrupt());
        assert_eq!(f.op.rx.lock().len(), 1);
        assert_eq!(f.bus.peek(csr::CSR_INT_MASK), int::INI_SET_MASK);
    }

    #[test]
    fn legacy_hw_gone() {
        let f = fixture(IrqMode::Legacy);
        f.t.start_hw().unwrap();
        f.bus.poke(csr::CSR_INT, 0xffff_ffff);
        assert!(!f.t.handle_interrupt());
        f.bus.poke(csr::CSR_INT, 0xa5a5_a5a3);
        assert!(!f.t.handle_interrupt());
        f.bus.poke(csr::CSR_INT, 0);
        assert!(!f.t.handle_interrupt());
    }

    #[test]
    fn hw_error_marks_fw_error() {
        let f = active(IrqMode::Msix);
        f.bus.raise(msix::HW_INT_CAUSES_AD, msix::hw_cause::HW_ERR);
        assert!(f.t.handle_interrupt());
        assert!(f.t.status().contains(TransStatus::FW_ERROR));
        assert_eq!(f.op.errors.load(Ordering::SeqCst), 1);
        // 只在首次出错时通知
        f.bus.raise(msix::HW_INT_CAUSES_AD, msix::hw_cause::SW_ERR);
        f.t.handle_interrupt();
        assert_eq!(f.op.errors.load(Ordering::SeqCst), 1);

        let cmd = HostCmd::new(0x10, 0, &[0; 4]);
        assert_eq!(f.t.send_hcmd(&cmd), Err(TransError::Io));
    }

    #[test]
    fn legacy_hw_error_keeps_interrupts_off() {
        let f = active(IrqMode::Legacy);
        f.bus.raise(csr::CSR_INT, int::HW_ERR);
        assert!(f.t.handle_interrupt());
        assert!(!f.t.status().contains(TransStatus::INT_ENABLED));
        assert_eq!(f.bus.peek(csr::CSR_INT_MASK), 0);
        assert_eq!(f.t.isr_stats().hw, 1);
    }

    #[test]
    fn tx_watermarks_stop_and_wake() {
        let f = active(IrqMode::Msix);
        f.t.fw_alive(0);
        f.t.enable_txq(1).unwrap();

        for _ in 0..223 {
            f.t.tx(1, SkBuff::from_slice(&[0xee; 64])).unwrap();
        }
        assert!(f.op.full.lock().is_empty());
        f.t.tx(1, SkBuff::from_slice(&[0xee; 64])).unwrap();
        assert_eq!(*f.op.full.lock(), [1]);
        f.t.tx(1, SkBuff::from_slice(&[0xee; 64])).unwrap();
        assert_eq!(*f.op.full.lock(), [1]);

        let done = f.t.reclaim(1, 64).unwrap();
        assert_eq!(done.len(), 64);
        assert_eq!(*f.op.not_full.lock(), [1]);

        let left = f.t.disable_txq(1).unwrap();
        assert_eq!(left.len(), 225 - 64);
        assert_eq!(f.t.tx(1, SkBuff::from_slice(&[0; 8])), Err(TransError::InvalidInput));
    }

    #[test]
    fn tx_rejects_unused_and_cmd_queue() {
        let f = active(IrqMode::Msix);
        let frame = || SkBuff::from_slice(&vec![0u8; 32]);
        assert_eq!(f.t.tx(0, frame()), Err(TransError::InvalidInput));
        assert_eq!(f.t.tx(2, frame()), Err(TransError::InvalidInput));
        assert_eq!(f.t.tx(9, frame()), Err(TransError::InvalidInput));
        assert_eq!(f.t.enable_txq(0), Err(TransError::InvalidInput));
    }

    #[test]
    fn enable_txq_requires_active() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        assert_eq!(f.t.enable_txq(1), Err(TransError::NotReady));
    }

    #[test]
    fn umac_irq_mode_set_outside_irq_setup() {
        let f = fixture(IrqMode::Msix);
        f.t.start_hw().unwrap();
        let log = f.bus.write_log();
        let prph: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, (r, _))| *r == hbus::TARG_PRPH_WADDR)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(prph.len(), 1);
        // 先选模式，再在 irq 锁内编程 IVAR
        let first_ivar = log.iter().position(|(r, _)| *r == msix::rx_ivar(0)).unwrap();
        assert!(prph[0] < first_ivar);

        // 停止时设备已下电，不再经 PRPH 访问
        f.bus.clear_log();
        f.t.stop_device(false);
        assert!(f.bus.writes_to(hbus::TARG_PRPH_WADDR).is_empty());
        assert!(f.bus.sw_reset_count() > 0);
    }

    #[test]
    fn late_response_does_not_complete_next_cmd() {
        let f = active(IrqMode::Msix);
        let first = HostCmd::new(0x10, 0, &[0; 4]);
        assert_eq!(f.t.send_hcmd(&first), Err(TransError::CmdTimeout));

        // 超时命令（下标 0）的响应在下一条命令等待期间才到
        inject_rx(&f, 0x10, 0, &[1]);
        raise_rx(&f);
        let next = HostCmd::new(0x11, 0, &[0; 4]).with_flags(CmdFlags::WANT_SKB);
        assert_eq!(f.t.send_hcmd(&next), Err(TransError::CmdTimeout));

        assert_eq!(*f.op.rx.lock(), [(0x10, 0)]);
        assert!(!f.t.status().contains(TransStatus::SYNC_HCMD_ACTIVE));
        assert_eq!(f.t.hcmd.lock().pending(), 0);
        assert_eq!(f.t.txqs[0].lock().as_ref().unwrap().read_ptr(), 1);
    }

    #[test]
    fn enable_txq_twice_is_busy() {
        let f = active(IrqMode::Msix);
        f.t.enable_txq(1).unwrap();
        f.t.tx(1, SkBuff::from_slice(&[3; 40])).unwrap();
        assert_eq!(f.t.enable_txq(1), Err(TransError::Busy));
        // 在途帧还在
        assert_eq!(f.t.txqs[1].lock().as_ref().unwrap().write_ptr(), 1);

        let left = f.t.disable_txq(1).unwrap();
        assert_eq!(left.len(), 1);
        f.t.enable_txq(1).unwrap();
    }

    /// rx 回调里回一条异步命令
    #[derive(Default)]
    struct ReplyOpMode {
        t: spin::Once<Weak<Transport<SimBus, SimDma>>>,
        sent: spin::Mutex<Vec<TransResult<Option<Vec<u8>>>>>,
    }

    impl OpModeOps for ReplyOpMode {
        fn hw_rf_kill(&self, _killed: bool) {}
        fn rx(&self, pkt: &RxPacket<'_>) {
            if let Some(t) = self.t.get().and_then(Weak::upgrade) {
                let cmd = HostCmd::new(pkt.cmd, 0, &[]).with_flags(CmdFlags::ASYNC);
                self.sent.lock().push(t.send_hcmd(&cmd));
            }
        }
    }

    #[test]
    fn async_hcmd_from_rx_callback() {
        let bus = SimBus::new();
        let op = Arc::new(ReplyOpMode::default());
        let t = Arc::new(
            Transport::attach(
                test_cfg(IrqMode::Msix),
                bus.clone(),
                SimDma::new(),
                op.clone() as Arc<dyn OpModeOps>,
                Box::new(TestLoader::default()),
            )
            .unwrap(),
        );
        op.t.call_once(|| Arc::downgrade(&t));
        t.start_hw().unwrap();
        t.start_fw(IMAGE, false).unwrap();

        {
            let mut rxq = t.rxq.lock();
            let q = rxq.as_mut().unwrap();
            let vid = q.next_hw_vid();
            t.rba
                .with_page_mut(vid, |p| write_packet(p.as_mut_slice(), 0x77, 0, SEQ_RX_FRAME, &[]))
                .unwrap();
            q.hw_complete(1);
        }
        bus.raise(msix::FH_INT_CAUSES_AD, msix::fh_cause::Q0);
        assert!(t.handle_interrupt());

        assert_eq!(*op.sent.lock(), [Ok(None)]);
        assert_eq!(t.txqs[0].lock().as_ref().unwrap().write_ptr(), 1);
    }
}
