// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{map_slot, MachineEnv};
use crate::bridge::{
    shm::{dmac_region, dma_region_name},
    Bridge, Role,
};
use crate::bus::SystemBus;
use crate::dispatch::Dispatcher;
use crate::dma::{DmaEnv, DmaPeer, DwDmac};
use crate::interrupt::{CpuControl, InterruptLines};
use crate::memory::AddressSpace;
use crate::peripherals::mailbox::Mailbox;
use crate::peripherals::regfile::RegisterFile;
use crate::peripherals::shim::Shim;
use crate::peripherals::ssp::SspPort;
use crate::Side;
use adsp_config::{parse_size, BoardDescriptor, DmacConfig, RegionSlot};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// The DSP half of a board, living in the child process.
#[derive(Debug)]
pub struct DspMachine {
    pub board: String,
    pub bridge: Arc<Bridge>,
    pub bus: SystemBus,
    pub irq: Arc<InterruptLines>,
    pub cpu: Arc<dyn CpuControl>,
    pub shim: Arc<Shim>,
    pub mailbox: Option<Arc<Mailbox>>,
    pub dmacs: Vec<Arc<DwDmac>>,
    pub ssps: Vec<Arc<SspPort>>,
    pub dispatcher: Arc<Dispatcher>,
}

impl DspMachine {
    pub fn build(board: &BoardDescriptor, bridge: Arc<Bridge>, env: MachineEnv) -> anyhow::Result<Self> {
        let layout = &board.dsp;
        info!("{}: building DSP machine", board.name);

        let mut memory = AddressSpace::new();
        for mem in &layout.memories {
            let region = map_slot(&bridge, &mem.name, mem.slot, &mem.size)?;
            if let Some(pattern) = mem.fill {
                region.fill_u32(pattern);
            }
            memory
                .add_shared(mem.base, region)
                .with_context(|| format!("{}: memory '{}'", board.name, mem.name))?;
        }
        let memory = Arc::new(memory);
        let mut bus = SystemBus::new(memory.clone());
        let irq = Arc::new(InterruptLines::new());

        let shim_region = map_slot(&bridge, &layout.shim.name, RegionSlot::Shim, &layout.shim.size)?;
        let shim = Arc::new(
            Shim::new(
                Side::Dsp,
                RegisterFile::shared(shim_region.clone(), Shim::map()),
                Arc::downgrade(&bridge),
                irq.clone(),
                layout.ipc_irq,
            )
            .with_cpu(env.cpu.clone()),
        );
        bus.attach(
            &layout.shim.name,
            layout.shim.base,
            shim_region.len() as u64,
            Some(layout.ipc_irq),
            shim.clone(),
        )?;

        let mailbox = match &layout.mailbox {
            Some(window) => {
                let region = map_slot(&bridge, &window.name, RegionSlot::Mbox, &window.size)?;
                let mbox = Arc::new(Mailbox::new(
                    Side::Dsp,
                    RegisterFile::shared(region.clone(), Mailbox::map()),
                ));
                bus.attach(&window.name, window.base, region.len() as u64, None, mbox.clone())?;
                Some(mbox)
            }
            None => None,
        };

        let mut ssps = Vec::new();
        for window in &layout.ssps {
            let size = parse_size(&window.size).with_context(|| format!("size of '{}'", window.name))?;
            let port = Arc::new(SspPort::new(
                &window.name,
                window.base,
                size as usize,
                env.timing.capture_dir.clone(),
            ));
            bus.attach(&window.name, window.base, size, window.irq, port.clone())?;
            ssps.push(port);
        }

        let dma_env = DmaEnv {
            memory: memory.clone(),
            irq: irq.clone(),
            scheduler: env.scheduler.clone(),
            bridge: Arc::downgrade(&bridge),
            ssps: ssps.clone(),
            timing: env.timing.clone(),
            handshake_timeout: bridge.config().handshake_timeout(),
            observers: env.observers.clone(),
        };
        let dmacs = build_controllers(&bridge, &mut bus, Side::Dsp, &layout.dmacs, &dma_env)?;

        let peer = Arc::new(DmaPeer::new(Side::Dsp, memory, Arc::downgrade(&bridge)));
        let dispatcher = Arc::new(
            dmacs
                .iter()
                .fold(Dispatcher::new(Side::Dsp).with_shim(shim.clone()), |d, dmac| {
                    d.with_controller(dmac.clone())
                })
                .with_peer(peer),
        );
        bridge
            .register(Role::Child, dispatcher.clone())
            .context("Failed to register DSP side of the bridge")?;

        Ok(Self {
            board: board.name.clone(),
            bridge,
            bus,
            irq,
            cpu: env.cpu,
            shim,
            mailbox,
            dmacs,
            ssps,
            dispatcher,
        })
    }

    pub fn dmac(&self, id: u32) -> Option<&Arc<DwDmac>> {
        self.dmacs.iter().find(|d| d.id() == id)
    }

    pub fn ssp(&self, name: &str) -> Option<&Arc<SspPort>> {
        self.ssps.iter().find(|p| p.name() == name)
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "board": self.board,
            "side": Side::Dsp,
            "cpu_in_reset": self.cpu.is_in_reset(),
            "irq_pending": self.irq.pending(),
            "devices": self.bus.snapshot(),
        })
    }
}

/// Controllers of one side, each attached to `bus` at its window.
pub(crate) fn build_controllers(
    bridge: &Bridge,
    bus: &mut SystemBus,
    side: Side,
    configs: &[DmacConfig],
    env: &DmaEnv,
) -> anyhow::Result<Vec<Arc<DwDmac>>> {
    let mut dmacs = Vec::new();
    for cfg in configs {
        let name = format!("dmac{}", cfg.id);
        let size = parse_size(&cfg.size).with_context(|| format!("size of '{}'", name))?;
        let regs = if cfg.shared {
            let region = bridge
                .regions()
                .register(&name, dmac_region(cfg.id), size as usize)
                .with_context(|| format!("Failed to map register block of '{}'", name))?;
            RegisterFile::shared(region, &[])
        } else {
            RegisterFile::local(&name, size as usize, &[])
        };
        let dmac = DwDmac::new(cfg.id, side, cfg.irq, regs, env.clone());
        bus.attach(&name, cfg.base, size, Some(cfg.irq), dmac.clone())?;
        info!(
            "{}: {:?} side at {:#x}, irq {}, channel buffers {}..{}",
            name,
            side,
            cfg.base,
            cfg.irq,
            dma_region_name(cfg.id, 0),
            dma_region_name(cfg.id, 7)
        );
        dmacs.push(dmac);
    }
    Ok(dmacs)
}
