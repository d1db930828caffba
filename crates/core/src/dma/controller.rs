// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! One DesignWare DMA controller: eight channels sharing one register block.
//!
//! Guest register writes run on the bus thread. Bursts run as scheduler
//! tasks, one per active channel. READY records arrive on the bridge
//! reader thread. All three paths serialize on the controller lock.

use super::channel::{ChannelSnapshot, ChannelState, TransferKind, TransferSummary};
use super::descriptor::Descriptor;
use super::regs::*;
use super::DmaEnv;
use crate::bridge::{
    shm::{dma_channel_region, dma_region_name},
    BridgeError, BridgeResult, DmaDirection, DmaMessage, DmaOp, Message, SharedRegion,
};
use crate::peripherals::regfile::RegisterFile;
use crate::{lock, Peripheral, Side, SimResult, SimulationError};
use std::fs::File;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, trace, warn};

/// Offset from a CLEAR_* register to its RAW_* counterpart.
const CLEAR_TO_RAW: u64 = CLEAR_TFR - RAW_TFR;

#[derive(Debug)]
struct DmacState {
    regs: RegisterFile,
    channels: [ChannelState; NUM_CHANNELS],
    irq_asserted: bool,
    next_token: u64,
}

impl DmacState {
    fn get(&self, offset: u64) -> u32 {
        self.regs.read(offset).unwrap_or(0)
    }

    fn set(&self, offset: u64, value: u32) {
        if let Err(e) = self.regs.write(offset, value) {
            warn!("dma: register {:#x} store failed: {}", offset, e);
        }
    }

    fn modify(&self, offset: u64, f: impl FnOnce(u32) -> u32) {
        self.set(offset, f(self.get(offset)));
    }

    fn chan(&self, ch: ChannelId, reg: u64) -> u32 {
        self.get(ch.reg(reg))
    }
}

#[derive(Debug)]
pub struct DwDmac {
    id: u32,
    side: Side,
    irq_line: u32,
    env: DmaEnv,
    me: Weak<DwDmac>,
    state: Mutex<DmacState>,
}

impl DwDmac {
    /// A shared `regs` block is taken as found; the peer may already hold
    /// state in it.
    pub fn new(id: u32, side: Side, irq_line: u32, regs: RegisterFile, env: DmaEnv) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            side,
            irq_line,
            env,
            me: me.clone(),
            state: Mutex::new(DmacState {
                regs,
                channels: std::array::from_fn(|_| ChannelState::default()),
                irq_asserted: false,
                next_token: 0,
            }),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn irq_line(&self) -> u32 {
        self.irq_line
    }

    pub fn is_active(&self, ch: ChannelId) -> bool {
        lock(&self.state).channels[ch.index()].active
    }

    /// Bytes moved in the current block and in the current run.
    pub fn progress(&self, ch: ChannelId) -> (u32, u64) {
        let st = lock(&self.state);
        let c = &st.channels[ch.index()];
        (c.block_bytes, c.total_bytes)
    }

    pub fn last_transfer(&self, ch: ChannelId) -> Option<TransferSummary> {
        lock(&self.state).channels[ch.index()].last
    }

    pub fn irq_asserted(&self) -> bool {
        lock(&self.state).irq_asserted
    }

    // ---- interrupt derivation ----

    fn update_interrupts(&self, st: &mut DmacState) {
        let tfr = 0xff & st.get(RAW_TFR) & !st.get(MASK_TFR);
        let block = 0xff & st.get(RAW_BLOCK) & !st.get(MASK_BLOCK);
        st.set(STATUS_TFR, tfr);
        st.set(STATUS_BLOCK, block);

        let mut intr = IntrStatus::empty();
        intr.set(IntrStatus::TFR, tfr != 0);
        intr.set(IntrStatus::BLOCK, block != 0);
        st.set(INTR_STATUS, intr.bits());
        trace!(
            "dmac{}: status {:?} block {:#x} tfr {:#x}",
            self.id,
            intr,
            block,
            tfr
        );

        if !intr.is_empty() && !st.irq_asserted {
            st.irq_asserted = true;
            debug!("dmac{}: irq {} set", self.id, self.irq_line);
            self.env.irq.set_irq(self.irq_line, true);
        } else if intr.is_empty() && st.irq_asserted {
            st.irq_asserted = false;
            debug!("dmac{}: irq {} clear", self.id, self.irq_line);
            self.env.irq.set_irq(self.irq_line, false);
        }
    }

    // ---- register side effects ----

    fn write_chan_en(&self, st: &mut DmacState, value: u32) {
        let old = st.get(CHAN_EN) & 0xff;
        let mut enabled = old;
        let mut armed = Vec::new();
        for ch in ChannelId::all() {
            if value & ch.write_enable() == 0 {
                continue;
            }
            let had = old & ch.bit() != 0;
            if value & ch.bit() != 0 {
                enabled |= ch.bit();
                if !had {
                    armed.push(ch);
                }
            } else {
                enabled &= !ch.bit();
                if had {
                    self.request_stop(st, ch);
                }
            }
        }
        st.set(CHAN_EN, enabled);
        for ch in armed {
            self.arm(st, ch);
        }
    }

    fn write_mask(&self, st: &mut DmacState, offset: u64, value: u32) {
        let mut masked = st.get(offset) & 0xff;
        for ch in ChannelId::all() {
            if value & ch.write_enable() == 0 {
                continue;
            }
            if value & ch.bit() != 0 {
                masked &= !ch.bit();
            } else {
                masked |= ch.bit();
            }
        }
        st.set(offset, masked);
        self.update_interrupts(st);
    }

    fn request_stop(&self, st: &mut DmacState, ch: ChannelId) {
        let c = &mut st.channels[ch.index()];
        if !c.active {
            return;
        }
        c.stop = true;
        info!(
            "dmac{}: {}: stop SAR {:#x} DAR {:#x} total bytes {:#x}",
            self.id,
            ch,
            st.chan(ch, SAR),
            st.chan(ch, DAR),
            st.channels[ch.index()].total_bytes
        );
    }

    // ---- transfer lifecycle ----

    fn port_at(&self, addr: u32) -> Option<usize> {
        self.env
            .ssps
            .iter()
            .position(|p| p.data_address() == addr as u64)
    }

    fn m2m_direction(&self, sar: u32) -> DmaDirection {
        let dsp_source = sar & DSP_ADDR_BIT != 0;
        match (self.side, dsp_source) {
            (Side::Dsp, true) | (Side::Host, false) => DmaDirection::Write,
            _ => DmaDirection::Read,
        }
    }

    fn arm(&self, st: &mut DmacState, ch: ChannelId) {
        if st.channels[ch.index()].active {
            warn!("dmac{}: {}: re-armed while active", self.id, ch);
            self.release_region(st, ch);
            st.channels[ch.index()].teardown(true);
        }
        let run = st.channels[ch.index()].arm();
        let (sar, dar) = (st.chan(ch, SAR), st.chan(ch, DAR));
        let ctl_lo = st.chan(ch, CTL_LO);
        let size = block_ts(st.chan(ch, CTL_HI));
        info!(
            "dmac{}: {}: start SAR {:#x} DAR {:#x} size {:#x}",
            self.id, ch, sar, dar, size
        );
        let cfg_hi = st.chan(ch, CFG_HI);
        debug!(
            "dmac{}: {}: width {}/{} inc {}/{} msize {}/{} master {}/{} per {}/{}",
            self.id,
            ch,
            src_width(ctl_lo),
            dst_width(ctl_lo),
            sinc(ctl_lo),
            dinc(ctl_lo),
            src_msize(ctl_lo),
            dst_msize(ctl_lo),
            sms(ctl_lo),
            dms(ctl_lo),
            src_per(cfg_hi),
            dst_per(cfg_hi)
        );

        if size == 0 {
            error!("dmac{}: {}: zero-length transfer ignored", self.id, ch);
            return self.abandon(st, ch);
        }

        let kind = match FlowControl::from_ctl_lo(ctl_lo) {
            Ok(FlowControl::MemToMem) => TransferKind::MemToMem(self.m2m_direction(sar)),
            Ok(FlowControl::MemToPeriph) => match self.port_at(dar) {
                Some(port) => TransferKind::MemToPeriph { port },
                None => {
                    error!("dmac{}: {}: no peripheral at DAR {:#x}", self.id, ch, dar);
                    return self.abandon(st, ch);
                }
            },
            Ok(FlowControl::PeriphToMem) => match self.port_at(sar) {
                Some(port) => TransferKind::PeriphToMem { port },
                None => {
                    error!("dmac{}: {}: no peripheral at SAR {:#x}", self.id, ch, sar);
                    return self.abandon(st, ch);
                }
            },
            Err(fc) => {
                error!("dmac{}: {}: invalid flow control {}", self.id, ch, fc);
                return self.abandon(st, ch);
            }
        };

        let c = &mut st.channels[ch.index()];
        c.kind = Some(kind);
        c.capture = self.open_capture(ch, run);

        match kind {
            TransferKind::MemToMem(_) => self.request_block(st, ch),
            _ => self.start_worker(ch, run, self.env.timing.periph_interval()),
        }
    }

    fn open_capture(&self, ch: ChannelId, run: u64) -> Option<File> {
        let dir = self.env.timing.capture_dir.as_ref()?;
        let path = dir.join(format!("dmac{}-{}-{}.raw", self.id, ch, run));
        match File::create(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("dmac{}: {}: can't open {}: {}", self.id, ch, path.display(), e);
                None
            }
        }
    }

    fn send(&self, msg: Message) -> BridgeResult<u32> {
        let bridge = self.env.bridge.upgrade().ok_or(BridgeError::NotRegistered)?;
        bridge.send(&msg)
    }

    /// Ask the peer for a shared buffer covering the current block.
    fn request_block(&self, st: &mut DmacState, ch: ChannelId) {
        let Some(TransferKind::MemToMem(direction)) = st.channels[ch.index()].kind else {
            return;
        };
        st.next_token += 1;
        let token = st.next_token;
        let msg = DmaMessage {
            op: DmaOp::NewRequest,
            host_data: 0,
            src: st.chan(ch, SAR),
            dest: st.chan(ch, DAR),
            size: block_ts(st.chan(ch, CTL_HI)),
            controller: self.id,
            channel: ch.raw(),
            client_data: token,
            direction,
        };
        let c = &mut st.channels[ch.index()];
        c.request = Some(msg);
        c.awaiting_ready = true;

        debug!(
            "dmac{}: {}: request {:?} src {:#x} dest {:#x} size {:#x}",
            self.id, ch, direction, msg.src, msg.dest, msg.size
        );
        if let Err(e) = self.send(Message::Dma(msg)) {
            error!("dmac{}: {}: can't send request: {}", self.id, ch, e);
            return self.abandon(st, ch);
        }

        let me = self.me.clone();
        self.env.scheduler.once(
            &format!("{}-handshake", dma_region_name(self.id, ch.raw())),
            self.env.handshake_timeout,
            Box::new(move || {
                if let Some(dmac) = me.upgrade() {
                    dmac.handshake_expired(ch, token);
                }
            }),
        );
    }

    fn handshake_expired(&self, ch: ChannelId, token: u64) {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let c = &st.channels[ch.index()];
        if !c.awaiting_ready || c.request.map(|r| r.client_data) != Some(token) {
            return;
        }
        error!(
            "dmac{}: {}: no READY within {:?}, abandoning transfer",
            self.id, ch, self.env.handshake_timeout
        );
        self.abandon(st, ch);
    }

    /// Peer has its side of the buffer in place.
    pub fn on_ready(&self, msg: &DmaMessage) {
        let Some(ch) = ChannelId::new(msg.channel) else {
            warn!("dmac{}: READY for invalid channel {}", self.id, msg.channel);
            return;
        };
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let c = &mut st.channels[ch.index()];
        let pending = c.request.filter(|r| c.awaiting_ready && r.client_data == msg.client_data);
        let Some(mut request) = pending else {
            warn!(
                "dmac{}: {}: dropping stale READY (token {})",
                self.id, ch, msg.client_data
            );
            return;
        };
        c.awaiting_ready = false;
        request.host_data = msg.host_data;
        c.request = Some(request);

        match self.map_region(ch, request.size as usize) {
            Ok(region) => {
                let run = c.run;
                c.region = Some(region);
                self.start_worker(ch, run, self.env.timing.mem_interval());
            }
            Err(e) => {
                error!("dmac{}: {}: can't map transfer buffer: {}", self.id, ch, e);
                self.abandon(st, ch);
            }
        }
    }

    fn map_region(&self, ch: ChannelId, size: usize) -> BridgeResult<Arc<SharedRegion>> {
        let bridge = self.env.bridge.upgrade().ok_or(BridgeError::NotRegistered)?;
        let id = dma_channel_region(self.id, ch.raw());
        let name = dma_region_name(self.id, ch.raw());
        match bridge.regions().register(&name, id, size) {
            Err(BridgeError::AlreadyInUse { .. }) => {
                warn!("dmac{}: {}: freeing stale region {}", self.id, ch, id);
                bridge.regions().free(id);
                bridge.regions().register(&name, id, size)
            }
            other => other,
        }
    }

    fn release_region(&self, st: &mut DmacState, ch: ChannelId) {
        if let Some(region) = st.channels[ch.index()].region.take() {
            if let Some(bridge) = self.env.bridge.upgrade() {
                bridge.regions().free(region.id());
            }
        }
    }

    fn start_worker(&self, ch: ChannelId, run: u64, interval: std::time::Duration) {
        let me = self.me.clone();
        self.env.scheduler.spawn(
            &dma_region_name(self.id, ch.raw()),
            interval,
            Box::new(move || match me.upgrade() {
                Some(dmac) => dmac.burst(ch, run),
                None => false,
            }),
        );
    }

    /// One worker iteration. Returns false when the worker should retire.
    fn burst(&self, ch: ChannelId, run: u64) -> bool {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let c = &st.channels[ch.index()];
        if c.run != run || !c.active || c.awaiting_ready {
            return false;
        }
        let Some(kind) = c.kind else {
            return false;
        };

        match self.copy_burst(st, ch, kind) {
            Ok(n) => st.channels[ch.index()].account(n),
            Err(e) => {
                error!("dmac{}: {}: burst failed: {}", self.id, ch, e);
                st.channels[ch.index()].stop = true;
            }
        }

        let size = block_ts(st.chan(ch, CTL_HI));
        let c = &st.channels[ch.index()];
        if c.block_bytes >= size || c.stop {
            self.block_complete(st, ch)
        } else {
            true
        }
    }

    fn copy_burst(&self, st: &mut DmacState, ch: ChannelId, kind: TransferKind) -> SimResult<u32> {
        let (sar, dar) = (st.chan(ch, SAR), st.chan(ch, DAR));
        let size = block_ts(st.chan(ch, CTL_HI));
        let c = &mut st.channels[ch.index()];
        let remaining = size.saturating_sub(c.block_bytes);

        let n = match kind {
            TransferKind::MemToPeriph { port } => {
                let n = (size / 2).max(1).min(remaining);
                let mut buf = vec![0u8; n as usize];
                self.env.memory.read(sar as u64, &mut buf)?;
                if let Some(ssp) = self.env.ssps.get(port) {
                    ssp.playback(&buf);
                }
                c.record(&buf);
                st.set(ch.reg(SAR), sar.wrapping_add(n));
                n
            }
            TransferKind::PeriphToMem { port } => {
                let n = (size / 2).max(1).min(remaining);
                let mut buf = vec![0u8; n as usize];
                if let Some(ssp) = self.env.ssps.get(port) {
                    ssp.capture(&mut buf);
                }
                self.env.memory.write(dar as u64, &buf)?;
                c.record(&buf);
                st.set(ch.reg(DAR), dar.wrapping_add(n));
                n
            }
            TransferKind::MemToMem(direction) => {
                let n = self.env.timing.mem_burst_bytes.min(remaining);
                let offset = c.block_bytes as usize;
                let region = c.region.clone().ok_or(SimulationError::Bridge(
                    BridgeError::InvalidRegion {
                        id: dma_channel_region(self.id, ch.raw()),
                    },
                ))?;
                let mut buf = vec![0u8; n as usize];
                match direction {
                    DmaDirection::Read => {
                        region.read_at(offset, &mut buf)?;
                        self.env.memory.write(dar as u64, &buf)?;
                    }
                    DmaDirection::Write => {
                        self.env.memory.read(sar as u64, &mut buf)?;
                        region.write_at(offset, &buf)?;
                    }
                }
                c.record(&buf);
                st.set(ch.reg(SAR), sar.wrapping_add(n));
                st.set(ch.reg(DAR), dar.wrapping_add(n));
                n
            }
        };
        Ok(n)
    }

    fn next_descriptor(&self, st: &DmacState, ch: ChannelId) -> Option<Descriptor> {
        let addr = llp_addr(st.chan(ch, LLP));
        if addr == 0 {
            return None;
        }
        match Descriptor::read(&self.env.memory, addr as u64) {
            Ok(lli) if block_ts(lli.ctrl_hi) == 0 => {
                error!(
                    "dmac{}: {}: zero-length descriptor at {:#x}, not reloading",
                    self.id, ch, addr
                );
                None
            }
            Ok(lli) => Some(lli),
            Err(e) => {
                error!("dmac{}: {}: can't read LLP at {:#x}: {}", self.id, ch, addr, e);
                None
            }
        }
    }

    /// Returns true if the worker carries on with a reloaded block.
    fn block_complete(&self, st: &mut DmacState, ch: ChannelId) -> bool {
        st.modify(RAW_BLOCK, |v| v | ch.bit());
        st.modify(ch.reg(CTL_HI), |v| v | CTL_HI_DONE);
        self.update_interrupts(st);

        let c = &mut st.channels[ch.index()];
        c.blocks += 1;
        let block_bytes = c.block_bytes;
        let m2m = matches!(c.kind, Some(TransferKind::MemToMem(_)));
        for o in &self.env.observers {
            o.on_block_complete(self.id, ch, block_bytes);
        }

        if m2m {
            // unlink our side before the peer can reuse the slot
            self.release_region(st, ch);
            if let Some(request) = st.channels[ch.index()].request.take() {
                // a stopped block lands only what was copied
                let done = DmaMessage {
                    size: block_bytes,
                    ..request.reply(DmaOp::Complete)
                };
                if let Err(e) = self.send(Message::Dma(done)) {
                    error!("dmac{}: {}: can't send completion: {}", self.id, ch, e);
                }
            }
        }

        if !st.channels[ch.index()].stop {
            if let Some(lli) = self.next_descriptor(st, ch) {
                st.set(ch.reg(SAR), lli.sar);
                st.set(ch.reg(DAR), lli.dar);
                st.set(ch.reg(LLP), lli.llp);
                st.set(ch.reg(CTL_LO), lli.ctrl_lo);
                st.set(ch.reg(CTL_HI), lli.ctrl_hi);
                st.channels[ch.index()].block_bytes = 0;
                debug!(
                    "dmac{}: {}: LLP reload SAR {:#x} DAR {:#x} size {:#x}",
                    self.id,
                    ch,
                    lli.sar,
                    lli.dar,
                    block_ts(lli.ctrl_hi)
                );
                for o in &self.env.observers {
                    o.on_reload(self.id, ch, &lli);
                }
                if m2m {
                    self.request_block(st, ch);
                    return false;
                }
                return true;
            }
        }

        self.finish(st, ch);
        false
    }

    fn finish(&self, st: &mut DmacState, ch: ChannelId) {
        st.modify(CHAN_EN, |v| v & !ch.bit());
        st.modify(RAW_TFR, |v| v | ch.bit());
        self.update_interrupts(st);
        self.release_region(st, ch);
        let summary = st.channels[ch.index()].teardown(false);
        info!(
            "dmac{}: {}: transfer done, {} blocks {} bursts {:#x} bytes{}",
            self.id,
            ch,
            summary.blocks,
            summary.bursts,
            summary.bytes,
            if summary.stopped { " (stopped)" } else { "" }
        );
        for o in &self.env.observers {
            o.on_transfer_complete(self.id, ch, &summary);
        }
    }

    /// Drop the run without raising any interrupt.
    fn abandon(&self, st: &mut DmacState, ch: ChannelId) {
        st.modify(CHAN_EN, |v| v & !ch.bit());
        self.release_region(st, ch);
        st.channels[ch.index()].teardown(true);
    }
}

impl Peripheral for DwDmac {
    fn read(&self, offset: u64) -> SimResult<u32> {
        lock(&self.state).regs.read(offset)
    }

    fn write(&self, offset: u64, value: u32) -> SimResult<()> {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let old = st.regs.read(offset)?;
        if offset != DMA_CFG && st.get(DMA_CFG) & DMA_CFG_EN == 0 {
            debug!(
                "dmac{}: write {:#x} = {:#x} ignored, controller disabled",
                self.id, offset, value
            );
            return Ok(());
        }

        match offset {
            CHAN_EN => self.write_chan_en(st, value),
            RAW_TFR | RAW_BLOCK => {
                st.set(offset, value);
                self.update_interrupts(st);
            }
            MASK_TFR | MASK_BLOCK | MASK_SRC_TRAN | MASK_DST_TRAN | MASK_ERR => {
                self.write_mask(st, offset, value)
            }
            CLEAR_TFR | CLEAR_BLOCK | CLEAR_SRC_TRAN | CLEAR_DST_TRAN | CLEAR_ERR => {
                st.set(offset, value);
                st.modify(offset - CLEAR_TO_RAW, |raw| raw & !value);
                self.update_interrupts(st);
            }
            STATUS_TFR | STATUS_BLOCK => self.update_interrupts(st),
            _ => {
                st.set(offset, value);
                if let Some((ch, CFG_LO)) = ChannelId::decode(offset) {
                    if value & !old & CFG_LO_SUSPEND != 0 {
                        self.request_stop(st, ch);
                    }
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        let st = lock(&self.state);
        let channels: Vec<ChannelSnapshot> = st.channels.iter().map(ChannelSnapshot::from).collect();
        serde_json::json!({
            "id": self.id,
            "side": self.side,
            "irq_line": self.irq_line,
            "irq_asserted": st.irq_asserted,
            "dma_cfg": st.get(DMA_CFG),
            "chan_en": st.get(CHAN_EN),
            "raw_tfr": st.get(RAW_TFR),
            "raw_block": st.get(RAW_BLOCK),
            "mask_tfr": st.get(MASK_TFR),
            "mask_block": st.get(MASK_BLOCK),
            "intr_status": st.get(INTR_STATUS),
            "channels": channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Bridge, BridgeHandler, Event, LocalLink, Role};
    use crate::dma::DmaObserver;
    use crate::interrupt::InterruptLines;
    use crate::memory::AddressSpace;
    use crate::peripherals::ssp::SspPort;
    use crate::scheduler::ManualScheduler;
    use adsp_config::{BridgeConfig, DmaTiming};
    use std::time::Duration;

    const DRAM: u64 = 0xFF30_0000;
    const SSP0: u64 = 0xFF2A_0000;
    const PERIOD: Duration = Duration::from_micros(6667);

    #[derive(Debug, Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl DmaObserver for Journal {
        fn on_block_complete(&self, _dmac: u32, chan: ChannelId, bytes: u32) {
            self.0.lock().unwrap().push(format!("block {} {}", chan, bytes));
        }
        fn on_reload(&self, _dmac: u32, chan: ChannelId, next: &Descriptor) {
            self.0.lock().unwrap().push(format!("reload {} {:#x}", chan, next.sar));
        }
        fn on_transfer_complete(&self, _dmac: u32, chan: ChannelId, s: &TransferSummary) {
            self.0.lock().unwrap().push(format!("tfr {} {}", chan, s.bytes));
        }
    }

    struct Rig {
        dmac: Arc<DwDmac>,
        sched: Arc<ManualScheduler>,
        irq: Arc<InterruptLines>,
        mem: Arc<AddressSpace>,
        ssp: Arc<SspPort>,
        journal: Arc<Journal>,
    }

    fn rig_with(bridge: Weak<Bridge>, capture: Option<std::path::PathBuf>) -> Rig {
        rig_on(
            bridge,
            capture,
            RegisterFile::local("dmac0", REG_BLOCK_SIZE, &[]),
        )
    }

    fn rig_on(
        bridge: Weak<Bridge>,
        capture: Option<std::path::PathBuf>,
        regs: RegisterFile,
    ) -> Rig {
        let mut mem = AddressSpace::new();
        mem.add_local("dram", DRAM, 0x4000).unwrap();
        let mem = Arc::new(mem);
        let sched = Arc::new(ManualScheduler::new());
        let irq = Arc::new(InterruptLines::recording());
        let ssp = Arc::new(SspPort::new("ssp0", SSP0, 0x1000, capture.clone()));
        let journal = Arc::new(Journal::default());
        let env = DmaEnv {
            memory: mem.clone(),
            irq: irq.clone(),
            scheduler: sched.clone(),
            bridge,
            ssps: vec![ssp.clone()],
            timing: DmaTiming {
                capture_dir: capture,
                ..DmaTiming::default()
            },
            handshake_timeout: Duration::from_millis(2000),
            observers: vec![journal.clone()],
        };
        let dmac = DwDmac::new(0, Side::Dsp, 13, regs, env);
        dmac.write(DMA_CFG, DMA_CFG_EN).unwrap();
        Rig {
            dmac,
            sched,
            irq,
            mem,
            ssp,
            journal,
        }
    }

    fn rig() -> Rig {
        rig_with(Weak::new(), None)
    }

    fn ch(n: u32) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    fn program(r: &Rig, c: ChannelId, sar: u32, dar: u32, fc: u32, size: u32, llp: u32) {
        r.dmac.write(c.reg(SAR), sar).unwrap();
        r.dmac.write(c.reg(DAR), dar).unwrap();
        r.dmac.write(c.reg(LLP), llp).unwrap();
        r.dmac.write(c.reg(CTL_LO), set_tt_fc(CTL_LO_INT_EN, fc)).unwrap();
        r.dmac.write(c.reg(CTL_HI), set_block_ts(0, size)).unwrap();
    }

    fn enable(r: &Rig, c: ChannelId) {
        r.dmac.write(CHAN_EN, c.write_enable() | c.bit()).unwrap();
    }

    fn reg(r: &Rig, offset: u64) -> u32 {
        r.dmac.read(offset).unwrap()
    }

    #[test]
    fn test_m2p_channel2_scenario() {
        let r = rig();
        let c = ch(2);
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 256, 0);
        enable(&r, c);
        assert_eq!(reg(&r, CHAN_EN) & c.bit(), c.bit());

        // half-block bursts: two of them fill the block
        r.sched.advance(PERIOD);
        assert_eq!(r.dmac.progress(c), (128, 128));
        assert_eq!(reg(&r, RAW_BLOCK) & c.bit(), 0);

        r.sched.advance(PERIOD);
        assert_eq!(reg(&r, RAW_BLOCK) & c.bit(), c.bit());
        let intr = IntrStatus::from_bits_truncate(reg(&r, INTR_STATUS));
        assert!(intr.contains(IntrStatus::BLOCK));
        assert_eq!(reg(&r, STATUS_BLOCK), c.bit());
        assert!(r.irq.is_asserted(13));
        assert_eq!(r.ssp.byte_counts().0, 256);
    }

    #[test]
    fn test_block_then_transfer_complete_once() {
        let r = rig();
        let c = ch(0);
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 64, 0);
        enable(&r, c);
        r.sched.run_until_idle(PERIOD, PERIOD * 10);

        assert_eq!(r.journal.entries(), vec!["block 0 64", "tfr 0 64"]);
        assert_eq!(reg(&r, CHAN_EN) & c.bit(), 0);
        assert_eq!(reg(&r, RAW_TFR), c.bit());
        assert_eq!(reg(&r, RAW_BLOCK), c.bit());
        assert_eq!(reg(&r, c.reg(CTL_HI)) & CTL_HI_DONE, CTL_HI_DONE);
        assert_eq!(r.irq.edges().len(), 1);
        assert!(!r.dmac.is_active(c));
        assert_eq!(r.sched.pending(), 0);

        let s = r.dmac.last_transfer(c).unwrap();
        assert_eq!(s.bytes, 64);
        assert_eq!(s.blocks, 1);
        assert!(!s.stopped && !s.aborted);
    }

    #[test]
    fn test_shared_register_block_is_not_wiped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = crate::bridge::ShmRegistry::new(dir.path(), "regs");
        let region = registry
            .register("dmac0", crate::bridge::shm::dmac_region(0), REG_BLOCK_SIZE)
            .unwrap();
        // left by the side that mapped the block first
        region.write_u32(ch(2).reg(SAR) as usize, 0xFF30_1000).unwrap();

        let r = rig_on(Weak::new(), None, RegisterFile::shared(region.clone(), &[]));
        assert_eq!(reg(&r, ch(2).reg(SAR)), 0xFF30_1000);
        assert_eq!(region.read_u32(DMA_CFG as usize).unwrap(), DMA_CFG_EN);
    }

    #[test]
    fn test_llp_reload_runs_second_block() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig_with(Weak::new(), Some(dir.path().into()));
        let c = ch(1);
        for i in 0..0x300u64 {
            r.mem.write(DRAM + i, &[i as u8]).unwrap();
        }
        let lli = Descriptor {
            sar: (DRAM + 0x200) as u32,
            dar: (SSP0 + 0x10) as u32,
            llp: 0,
            ctrl_lo: set_tt_fc(CTL_LO_INT_EN, 1),
            ctrl_hi: 64,
            sstat: 0,
            dstat: 0,
        };
        lli.write(&r.mem, DRAM + 0x1000).unwrap();

        r.ssp.write(crate::peripherals::ssp::SSCR1, crate::peripherals::ssp::SSCR1_TSRE).unwrap();
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 128, (DRAM + 0x1000) as u32);
        enable(&r, c);

        r.sched.advance(PERIOD * 2);
        assert_eq!(reg(&r, c.reg(SAR)), lli.sar);
        assert_eq!(reg(&r, c.reg(DAR)), lli.dar);
        assert_eq!(reg(&r, c.reg(CTL_HI)), lli.ctrl_hi);
        assert_eq!(reg(&r, c.reg(LLP)), 0);
        assert_eq!(reg(&r, CHAN_EN) & c.bit(), c.bit());

        r.sched.run_until_idle(PERIOD, PERIOD * 10);
        assert_eq!(
            r.journal.entries(),
            vec![
                "block 1 128".to_string(),
                format!("reload 1 {:#x}", lli.sar),
                "block 1 64".to_string(),
                "tfr 1 192".to_string(),
            ]
        );
        let s = r.dmac.last_transfer(c).unwrap();
        assert_eq!((s.blocks, s.bytes), (2, 192));

        let played = std::fs::read(dir.path().join("ssp0-play0.raw")).unwrap();
        let expected: Vec<u8> = (0..128u32).chain(0x200..0x240).map(|i| i as u8).collect();
        assert_eq!(played, expected);
        let dumped = std::fs::read(dir.path().join("dmac0-1-1.raw")).unwrap();
        assert_eq!(dumped, expected);
    }

    #[test]
    fn test_suspend_skips_reload() {
        let r = rig();
        let c = ch(3);
        Descriptor {
            sar: DRAM as u32,
            dar: (SSP0 + 0x10) as u32,
            llp: 0,
            ctrl_lo: set_tt_fc(0, 1),
            ctrl_hi: 64,
            sstat: 0,
            dstat: 0,
        }
        .write(&r.mem, DRAM + 0x2000)
        .unwrap();
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 256, (DRAM + 0x2000) as u32);
        enable(&r, c);

        r.sched.advance(PERIOD);
        r.dmac.write(c.reg(CFG_LO), CFG_LO_SUSPEND).unwrap();
        r.sched.advance(PERIOD * 4);

        assert_eq!(r.journal.entries(), vec!["block 3 256", "tfr 3 256"]);
        let s = r.dmac.last_transfer(c).unwrap();
        assert!(s.stopped);
        assert_eq!(s.blocks, 1);
        assert_eq!(reg(&r, RAW_TFR) & c.bit(), c.bit());
        assert_eq!(r.sched.pending(), 0);
    }

    #[test]
    fn test_disable_stops_mid_block() {
        let r = rig();
        let c = ch(4);
        // 51 + 51 + 1 byte bursts
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 103, 0);
        enable(&r, c);
        r.sched.advance(PERIOD);
        r.dmac.write(CHAN_EN, c.write_enable()).unwrap();
        assert_eq!(reg(&r, CHAN_EN) & c.bit(), 0);
        assert!(r.dmac.is_active(c));
        r.sched.advance(PERIOD);

        // the in-flight burst finishes, then the run ends short of the block
        let s = r.dmac.last_transfer(c).unwrap();
        assert!(s.stopped);
        assert_eq!((s.bytes, s.bursts), (102, 2));
        assert_eq!(r.journal.entries().last().unwrap(), "tfr 4 102");
        assert_eq!(r.sched.pending(), 0);
    }

    #[test]
    fn test_bytes_sum_to_block_size() {
        let r = rig();
        let c = ch(5);
        // odd block: 51 + 51 + 1
        program(&r, c, DRAM as u32, (SSP0 + 0x10) as u32, 1, 103, 0);
        enable(&r, c);
        r.sched.advance(PERIOD * 2);
        assert_eq!(r.dmac.progress(c), (102, 102));
        r.sched.advance(PERIOD);
        let s = r.dmac.last_transfer(c).unwrap();
        assert_eq!((s.bytes, s.bursts), (103, 3));
        assert_eq!(r.ssp.byte_counts().0, 103);
        assert_eq!(reg(&r, c.reg(SAR)), DRAM as u32 + 103);
    }

    #[test]
    fn test_p2m_zero_fills_without_capture_source() {
        let r = rig();
        let c = ch(6);
        r.mem.write(DRAM, &[0xAA; 32]).unwrap();
        program(&r, c, (SSP0 + 0x10) as u32, DRAM as u32, 2, 32, 0);
        enable(&r, c);
        r.sched.run_until_idle(PERIOD, PERIOD * 4);
        let mut buf = [0xFFu8; 32];
        r.mem.read(DRAM, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
        assert_eq!(reg(&r, c.reg(DAR)), DRAM as u32 + 32);
        assert_eq!(r.ssp.byte_counts().1, 32);
    }

    #[test]
    fn test_unusable_requests_leave_channel_idle() {
        let r = rig();
        // zero length
        program(&r, ch(0), DRAM as u32, (SSP0 + 0x10) as u32, 1, 0, 0);
        enable(&r, ch(0));
        // undefined flow control
        program(&r, ch(1), DRAM as u32, (SSP0 + 0x10) as u32, 3, 64, 0);
        enable(&r, ch(1));
        // no port behind DAR
        program(&r, ch(2), DRAM as u32, DRAM as u32, 1, 64, 0);
        enable(&r, ch(2));

        assert_eq!(reg(&r, CHAN_EN), 0);
        assert_eq!(r.sched.pending(), 0);
        assert!(!r.irq.is_asserted(13));
        for n in 0..3 {
            assert!(r.dmac.last_transfer(ch(n)).unwrap().aborted);
        }
    }

    #[test]
    fn test_writes_ignored_until_controller_enabled() {
        let r = rig();
        r.dmac.write(DMA_CFG, 0).unwrap();
        r.dmac.write(ch(0).reg(SAR), 0x1234).unwrap();
        assert_eq!(reg(&r, ch(0).reg(SAR)), 0);
        r.dmac.write(DMA_CFG, DMA_CFG_EN).unwrap();
        r.dmac.write(ch(0).reg(SAR), 0x1234).unwrap();
        assert_eq!(reg(&r, ch(0).reg(SAR)), 0x1234);
        assert!(r.dmac.write(0x3, 0).is_err());
    }

    #[test]
    fn test_irq_follows_raw_and_mask() {
        let r = rig();
        let c = ch(0);
        for raw_tfr in 0..2u32 {
            for raw_block in 0..2u32 {
                for mask_tfr in 0..2u32 {
                    for mask_block in 0..2u32 {
                        r.dmac.write(RAW_TFR, raw_tfr).unwrap();
                        r.dmac.write(RAW_BLOCK, raw_block).unwrap();
                        let m = |masked: u32| c.write_enable() | if masked == 1 { 0 } else { c.bit() };
                        r.dmac.write(MASK_TFR, m(mask_tfr)).unwrap();
                        r.dmac.write(MASK_BLOCK, m(mask_block)).unwrap();

                        let expect = (raw_tfr & !mask_tfr) | (raw_block & !mask_block) != 0;
                        assert_eq!(
                            r.irq.is_asserted(13),
                            expect,
                            "raw {}/{} mask {}/{}",
                            raw_tfr,
                            raw_block,
                            mask_tfr,
                            mask_block
                        );
                        assert_eq!(reg(&r, INTR_STATUS) != 0, expect);
                    }
                }
            }
        }
    }

    #[test]
    fn test_clear_deasserts_irq() {
        let r = rig();
        r.dmac.write(RAW_BLOCK, 0x5).unwrap();
        assert!(r.irq.is_asserted(13));
        r.dmac.write(CLEAR_BLOCK, 0x1).unwrap();
        assert!(r.irq.is_asserted(13));
        assert_eq!(reg(&r, STATUS_BLOCK), 0x4);
        r.dmac.write(CLEAR_BLOCK, 0x4).unwrap();
        assert!(!r.irq.is_asserted(13));
        assert_eq!(reg(&r, INTR_STATUS), 0);
    }

    #[test]
    fn test_mask_write_enable_leaves_other_channels() {
        let r = rig();
        r.dmac.write(MASK_TFR, ch(1).write_enable()).unwrap();
        r.dmac.write(MASK_TFR, ch(2).write_enable() | 0xff).unwrap();
        assert_eq!(reg(&r, MASK_TFR), ch(1).bit());
        r.dmac.write(MASK_TFR, ch(1).write_enable() | ch(1).bit()).unwrap();
        assert_eq!(reg(&r, MASK_TFR), 0);
    }

    #[derive(Default)]
    struct Inbox(Mutex<Vec<Message>>);

    impl BridgeHandler for Inbox {
        fn handle(&self, _b: &Bridge, ev: Event) {
            self.0.lock().unwrap().push(ev.message);
        }
    }

    fn bridged(dir: &tempfile::TempDir) -> (Arc<Bridge>, Arc<Bridge>, Arc<Inbox>) {
        let link = LocalLink::default();
        let cfg = BridgeConfig {
            name: "dmat".into(),
            shm_root: dir.path().into(),
            ..BridgeConfig::default()
        };
        let child = Arc::new(Bridge::new(cfg.clone(), Arc::new(link.clone())));
        let parent = Arc::new(Bridge::new(cfg, Arc::new(link)));
        let inbox = Arc::new(Inbox::default());
        child.register(Role::Child, Arc::new(Inbox::default())).unwrap();
        parent.register(Role::Parent, inbox.clone()).unwrap();
        (child, parent, inbox)
    }

    fn last_dma(inbox: &Inbox) -> DmaMessage {
        match inbox.0.lock().unwrap().last() {
            Some(Message::Dma(m)) => *m,
            other => panic!("expected a DMA record, got {:?}", other),
        }
    }

    #[test]
    fn test_handshake_timeout_abandons_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (child, parent, inbox) = bridged(&dir);
        let r = rig_with(Arc::downgrade(&child), None);
        let c = ch(0);
        program(&r, c, 0x1000_0000, DRAM as u32, 0, 64, 0);
        enable(&r, c);

        parent.pump().unwrap();
        let req = last_dma(&inbox);
        assert_eq!(req.op, DmaOp::NewRequest);
        assert_eq!(req.direction, DmaDirection::Read);
        assert_eq!((req.src, req.dest, req.size), (0x1000_0000, DRAM as u32, 64));

        r.sched.advance(Duration::from_millis(1999));
        assert!(r.dmac.is_active(c));
        r.sched.advance(Duration::from_millis(1));
        assert!(!r.dmac.is_active(c));
        assert!(r.dmac.last_transfer(c).unwrap().aborted);
        assert_eq!(reg(&r, CHAN_EN), 0);
        assert_eq!(reg(&r, RAW_TFR), 0);
        assert!(r.irq.edges().is_empty());

        // a late READY is now stale
        r.dmac.on_ready(&req.reply(DmaOp::Ready));
        assert_eq!(r.sched.pending(), 0);
    }

    #[test]
    fn test_ready_with_wrong_token_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (child, parent, inbox) = bridged(&dir);
        let r = rig_with(Arc::downgrade(&child), None);
        let c = ch(1);
        program(&r, c, (DRAM | 0x8000_0000) as u32, 0x1000_0000, 0, 32, 0);
        enable(&r, c);
        parent.pump().unwrap();
        let req = last_dma(&inbox);
        assert_eq!(req.direction, DmaDirection::Write);

        let mut forged = req.reply(DmaOp::Ready);
        forged.client_data += 1;
        r.dmac.on_ready(&forged);
        assert_eq!(r.sched.task_names(), vec!["dmac0.1-handshake".to_string()]);

        r.dmac.on_ready(&req.reply(DmaOp::Ready));
        assert!(child.regions().is_registered(dma_channel_region(0, 1)));
        assert_eq!(r.sched.pending(), 2);
    }
}
