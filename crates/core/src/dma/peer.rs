// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bridge::{
    shm::{dma_channel_region, dma_region_name},
    Bridge, BridgeError, DmaDirection, DmaMessage, DmaOp, Message,
};
use crate::memory::AddressSpace;
use crate::Side;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Far side of a mem-to-mem transfer: owns the memory named in the
/// request and the matching end of the per-channel buffer.
#[derive(Debug)]
pub struct DmaPeer {
    side: Side,
    memory: Arc<AddressSpace>,
    bridge: Weak<Bridge>,
}

impl DmaPeer {
    pub fn new(side: Side, memory: Arc<AddressSpace>, bridge: Weak<Bridge>) -> Self {
        Self {
            side,
            memory,
            bridge,
        }
    }

    pub fn handle(&self, msg: &DmaMessage) {
        let Some(bridge) = self.bridge.upgrade() else {
            warn!("dma peer {:?}: bridge gone, dropping {:?}", self.side, msg.op);
            return;
        };
        match msg.op {
            DmaOp::NewRequest => self.new_request(&bridge, msg),
            DmaOp::Complete => self.complete(&bridge, msg),
            DmaOp::Ready => warn!(
                "dma peer {:?}: unexpected READY for dmac{}.{}",
                self.side, msg.controller, msg.channel
            ),
        }
    }

    fn new_request(&self, bridge: &Bridge, msg: &DmaMessage) {
        if msg.size == 0 {
            error!(
                "dma peer {:?}: zero-length request on dmac{}.{}",
                self.side, msg.controller, msg.channel
            );
            return;
        }
        let id = dma_channel_region(msg.controller, msg.channel);
        let name = dma_region_name(msg.controller, msg.channel);
        let size = msg.size as usize;

        let region = match bridge.regions().register(&name, id, size) {
            Err(BridgeError::AlreadyInUse { .. }) => {
                warn!("dma peer {:?}: region {} still mapped, freeing it", self.side, id);
                bridge.regions().free(id);
                bridge.regions().register(&name, id, size)
            }
            other => other,
        };
        let region = match region {
            Ok(r) => r,
            Err(e) => {
                error!("dma peer {:?}: can't map {}: {}", self.side, name, e);
                return;
            }
        };

        if msg.direction == DmaDirection::Read {
            let mut buf = vec![0u8; size];
            let filled = self
                .memory
                .read(msg.src as u64, &mut buf)
                .map_err(|e| e.to_string())
                .and_then(|_| region.write_at(0, &buf).map_err(|e| e.to_string()));
            if let Err(e) = filled {
                error!(
                    "dma peer {:?}: can't stage {:#x} bytes from {:#x}: {}",
                    self.side, size, msg.src, e
                );
                bridge.regions().free(id);
                return;
            }
        }

        debug!(
            "dma peer {:?}: {} ready, {:?} {:#x} bytes",
            self.side, name, msg.direction, size
        );
        let mut ready = msg.reply(DmaOp::Ready);
        ready.host_data = id as u64;
        if let Err(e) = bridge.send(&Message::Dma(ready)) {
            error!("dma peer {:?}: can't send READY for {}: {}", self.side, name, e);
            bridge.regions().free(id);
        }
    }

    fn complete(&self, bridge: &Bridge, msg: &DmaMessage) {
        let id = dma_channel_region(msg.controller, msg.channel);
        if msg.direction == DmaDirection::Write {
            match bridge.regions().get(id) {
                Some(_) if msg.size == 0 => debug!(
                    "dma peer {:?}: dmac{}.{} stopped before any data",
                    self.side, msg.controller, msg.channel
                ),
                Some(region) => {
                    let mut buf = vec![0u8; (msg.size as usize).min(region.len())];
                    let copied = region
                        .read_at(0, &mut buf)
                        .map_err(|e| e.to_string())
                        .and_then(|_| {
                            self.memory
                                .write(msg.dest as u64, &buf)
                                .map_err(|e| e.to_string())
                        });
                    if let Err(e) = copied {
                        error!(
                            "dma peer {:?}: can't land {:#x} bytes at {:#x}: {}",
                            self.side,
                            buf.len(),
                            msg.dest,
                            e
                        );
                    }
                }
                None => warn!("dma peer {:?}: COMPLETE for unmapped region {}", self.side, id),
            }
        }
        bridge.regions().free(id);
        debug!(
            "dma peer {:?}: dmac{}.{} complete",
            self.side, msg.controller, msg.channel
        );
    }
}
