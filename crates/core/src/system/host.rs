// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::dsp::build_controllers;
use super::{map_slot, MachineEnv};
use crate::bridge::{Bridge, Role};
use crate::bus::SystemBus;
use crate::dispatch::Dispatcher;
use crate::dma::{DmaEnv, DmaPeer, DwDmac};
use crate::interrupt::InterruptLines;
use crate::memory::AddressSpace;
use crate::peripherals::mailbox::Mailbox;
use crate::peripherals::regfile::RegisterFile;
use crate::peripherals::shim::Shim;
use crate::Side;
use adsp_config::{parse_size, BoardDescriptor, RegionSlot};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

/// The host half of a board: the PCI function the audio driver talks to,
/// living in the parent process.
#[derive(Debug)]
pub struct HostDevice {
    pub board: String,
    pub bridge: Arc<Bridge>,
    pub bus: SystemBus,
    pub irq: Arc<InterruptLines>,
    pub pci_irq: u32,
    pub shim: Arc<Shim>,
    pub mailbox: Option<Arc<Mailbox>>,
    pub dmacs: Vec<Arc<DwDmac>>,
    pub dispatcher: Arc<Dispatcher>,
}

impl HostDevice {
    pub fn build(board: &BoardDescriptor, bridge: Arc<Bridge>, env: MachineEnv) -> anyhow::Result<Self> {
        let dsp = &board.dsp;
        let layout = &board.host;
        info!("{}: building host device", board.name);

        let mut memory = AddressSpace::new();
        let ram_size = parse_size(&layout.ram.size).context("host ram size")?;
        memory.add_local("host-ram", layout.ram.base, ram_size as usize)?;

        let window_of = |slot: RegionSlot| layout.windows.iter().find(|w| w.slot == slot).map(|w| w.base);
        for cfg in &dsp.memories {
            let region = map_slot(&bridge, &cfg.name, cfg.slot, &cfg.size)?;
            match window_of(cfg.slot) {
                Some(base) => memory
                    .add_shared(base, region)
                    .with_context(|| format!("{}: host window for '{}'", board.name, cfg.name))?,
                // still mapped so DMA peers and MEM SYNC can reach it
                None => warn!("{}: no host window for '{}'", board.name, cfg.name),
            }
        }
        let memory = Arc::new(memory);
        let mut bus = SystemBus::new(memory.clone());
        let irq = Arc::new(InterruptLines::new());

        let shim_region = map_slot(&bridge, &dsp.shim.name, RegionSlot::Shim, &dsp.shim.size)?;
        let shim = Arc::new(Shim::new(
            Side::Host,
            RegisterFile::shared(shim_region.clone(), Shim::map()),
            Arc::downgrade(&bridge),
            irq.clone(),
            layout.pci_irq,
        ));
        let shim_base = window_of(RegionSlot::Shim).unwrap_or(layout.mmio_base);
        bus.attach(
            &dsp.shim.name,
            shim_base,
            shim_region.len() as u64,
            Some(layout.pci_irq),
            shim.clone(),
        )?;

        let mailbox = match (&dsp.mailbox, window_of(RegionSlot::Mbox)) {
            (Some(window), Some(base)) => {
                let region = map_slot(&bridge, &window.name, RegionSlot::Mbox, &window.size)?;
                let mbox = Arc::new(Mailbox::new(
                    Side::Host,
                    RegisterFile::shared(region.clone(), Mailbox::map()),
                ));
                bus.attach(&window.name, base, region.len() as u64, None, mbox.clone())?;
                Some(mbox)
            }
            (Some(window), None) => {
                warn!("{}: mailbox '{}' has no host window", board.name, window.name);
                None
            }
            _ => None,
        };

        let dma_env = DmaEnv {
            memory: memory.clone(),
            irq: irq.clone(),
            scheduler: env.scheduler.clone(),
            bridge: Arc::downgrade(&bridge),
            ssps: Vec::new(),
            timing: env.timing.clone(),
            handshake_timeout: bridge.config().handshake_timeout(),
            observers: env.observers.clone(),
        };
        let dmacs = build_controllers(&bridge, &mut bus, Side::Host, &layout.dmacs, &dma_env)?;

        let peer = Arc::new(DmaPeer::new(Side::Host, memory, Arc::downgrade(&bridge)));
        let dispatcher = Arc::new(
            dmacs
                .iter()
                .fold(Dispatcher::new(Side::Host).with_shim(shim.clone()), |d, dmac| {
                    d.with_controller(dmac.clone())
                })
                .with_peer(peer),
        );
        bridge
            .register(Role::Parent, dispatcher.clone())
            .context("Failed to register host side of the bridge")?;

        Ok(Self {
            board: board.name.clone(),
            bridge,
            bus,
            irq,
            pci_irq: layout.pci_irq,
            shim,
            mailbox,
            dmacs,
            dispatcher,
        })
    }

    pub fn irq_asserted(&self) -> bool {
        self.irq.is_asserted(self.pci_irq)
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "board": self.board,
            "side": Side::Host,
            "pci_irq": self.irq_asserted(),
            "devices": self.bus.snapshot(),
        })
    }
}
