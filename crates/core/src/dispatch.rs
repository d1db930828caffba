// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Inbound record routing for one side of the bridge.

use crate::bridge::{Bridge, BridgeHandler, DmaOp, Event, Message};
use crate::dma::{DmaPeer, DwDmac};
use crate::peripherals::shim::Shim;
use crate::Side;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
pub struct Dispatcher {
    side: Side,
    shim: Option<Arc<Shim>>,
    controllers: Vec<Arc<DwDmac>>,
    peer: Option<Arc<DmaPeer>>,
    pm_state: AtomicU32,
}

impl Dispatcher {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            shim: None,
            controllers: Vec::new(),
            peer: None,
            pm_state: AtomicU32::new(0),
        }
    }

    pub fn with_shim(mut self, shim: Arc<Shim>) -> Self {
        self.shim = Some(shim);
        self
    }

    pub fn with_controller(mut self, dmac: Arc<DwDmac>) -> Self {
        self.controllers.push(dmac);
        self
    }

    pub fn with_peer(mut self, peer: Arc<DmaPeer>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Last power state requested by the peer.
    pub fn pm_state(&self) -> u32 {
        self.pm_state.load(Ordering::SeqCst)
    }

    fn controller(&self, id: u32) -> Option<&Arc<DwDmac>> {
        self.controllers.iter().find(|d| d.id() == id)
    }
}

impl BridgeHandler for Dispatcher {
    fn handle(&self, bridge: &Bridge, event: Event) {
        trace!("dispatch {:?}: id {} {:?}", self.side, event.id, event.message);
        match event.message {
            Message::Reg(access) => match &self.shim {
                Some(shim) => shim.on_register(&access),
                None => debug!("dispatch {:?}: no SHIM for {:?}", self.side, access),
            },
            Message::Irq { irq } => match &self.shim {
                Some(shim) => {
                    if let Err(e) = shim.on_irq() {
                        error!("dispatch {:?}: irq {} failed: {}", self.side, irq, e);
                    }
                }
                None => debug!("dispatch {:?}: no SHIM for irq {}", self.side, irq),
            },
            Message::Pm { state } => {
                // board power management is not modelled
                info!("dispatch {:?}: power state {}", self.side, state);
                self.pm_state.store(state, Ordering::SeqCst);
            }
            Message::Dma(msg) => match msg.op {
                DmaOp::Ready => match self.controller(msg.controller) {
                    Some(dmac) => dmac.on_ready(&msg),
                    None => warn!(
                        "dispatch {:?}: READY for unknown dmac{}",
                        self.side, msg.controller
                    ),
                },
                DmaOp::NewRequest | DmaOp::Complete => match &self.peer {
                    Some(peer) => peer.handle(&msg),
                    None => warn!("dispatch {:?}: no DMA peer for {:?}", self.side, msg.op),
                },
            },
            Message::MemSync {
                region,
                offset,
                length,
            } => {
                if let Err(e) = bridge
                    .regions()
                    .sync(region, offset as usize, length as usize)
                {
                    warn!("dispatch {:?}: {}", self.side, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{DmaDirection, DmaMessage, LocalLink, Role};
    use crate::interrupt::InterruptLines;
    use crate::peripherals::regfile::RegisterFile;
    use crate::peripherals::shim::{IPCXH, IPC_BUSY, ISRD};
    use crate::Peripheral;
    use adsp_config::BridgeConfig;

    fn pair(dir: &tempfile::TempDir) -> (Arc<Bridge>, Arc<Bridge>) {
        let link = LocalLink::default();
        let cfg = BridgeConfig {
            name: "disp".into(),
            shm_root: dir.path().into(),
            ..BridgeConfig::default()
        };
        let host = Arc::new(Bridge::new(cfg.clone(), Arc::new(link.clone())));
        let dsp = Arc::new(Bridge::new(cfg, Arc::new(link)));
        (host, dsp)
    }

    #[test]
    fn test_irq_record_reaches_shim() {
        let dir = tempfile::tempdir().unwrap();
        let (host, dsp) = pair(&dir);
        let dsp_irq = Arc::new(InterruptLines::new());
        let dsp_shim = Arc::new(Shim::new(
            Side::Dsp,
            RegisterFile::shared(dsp.regions().register("shim", 4, 0x1000).unwrap(), Shim::map()),
            Arc::downgrade(&dsp),
            dsp_irq.clone(),
            10,
        ));
        let host_shim = Arc::new(Shim::new(
            Side::Host,
            RegisterFile::shared(host.regions().register("shim", 4, 0x1000).unwrap(), Shim::map()),
            Arc::downgrade(&host),
            Arc::new(InterruptLines::new()),
            0,
        ));
        dsp.register(Role::Child, Arc::new(Dispatcher::new(Side::Dsp).with_shim(dsp_shim.clone())))
            .unwrap();
        host.register(Role::Parent, Arc::new(Dispatcher::new(Side::Host).with_shim(host_shim.clone())))
            .unwrap();

        host_shim.write(IPCXH, IPC_BUSY | 1).unwrap();
        assert_ne!(dsp_shim.read(ISRD).unwrap(), 0);
        assert!(!dsp_irq.is_asserted(10));
        assert_eq!(dsp.pump().unwrap(), 1);
        assert!(dsp_irq.is_asserted(10));
    }

    #[test]
    fn test_unroutable_records_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (host, dsp) = pair(&dir);
        let disp = Arc::new(Dispatcher::new(Side::Dsp));
        dsp.register(Role::Child, disp.clone()).unwrap();
        host.register(Role::Parent, Arc::new(Dispatcher::new(Side::Host))).unwrap();

        let ready = DmaMessage {
            op: DmaOp::Ready,
            host_data: 40,
            src: 0,
            dest: 0,
            size: 32,
            controller: 3,
            channel: 0,
            client_data: 1,
            direction: DmaDirection::Read,
        };
        host.send(&Message::Dma(ready)).unwrap();
        host.send(&Message::Dma(ready.reply(DmaOp::NewRequest))).unwrap();
        host.send(&Message::Irq { irq: 0 }).unwrap();
        host.send(&Message::MemSync {
            region: 99,
            offset: 0,
            length: 64,
        })
        .unwrap();
        host.send(&Message::Pm { state: 3 }).unwrap();

        assert_eq!(dsp.pump().unwrap(), 5);
        assert_eq!(disp.pm_state(), 3);
        assert_eq!(dsp.stats().received, 5);
    }
}
