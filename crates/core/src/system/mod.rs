// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Assembly of the two halves of a board: the DSP machine (child) and the
//! host PCI function (parent).

pub mod dsp;
pub mod host;

pub use dsp::DspMachine;
pub use host::HostDevice;

use crate::bridge::{shm::slot_id, Bridge, SharedRegion};
use crate::dma::DmaObserver;
use crate::interrupt::{CpuControl, CpuState};
use crate::scheduler::{Scheduler, ThreadScheduler};
use adsp_config::{parse_size, DmaTiming, RegionSlot};
use anyhow::Context;
use std::sync::Arc;
use tracing::debug;

/// Process-level collaborators handed to a machine at build time.
#[derive(Debug, Clone)]
pub struct MachineEnv {
    pub scheduler: Arc<dyn Scheduler>,
    pub timing: DmaTiming,
    pub cpu: Arc<dyn CpuControl>,
    pub observers: Vec<Arc<dyn DmaObserver>>,
}

impl Default for MachineEnv {
    fn default() -> Self {
        Self {
            scheduler: Arc::new(ThreadScheduler),
            timing: DmaTiming::default(),
            cpu: Arc::new(CpuState::default()),
            observers: Vec::new(),
        }
    }
}

/// Register one of the architecturally fixed regions.
pub(crate) fn map_slot(
    bridge: &Bridge,
    name: &str,
    slot: RegionSlot,
    size: &str,
) -> anyhow::Result<Arc<SharedRegion>> {
    let size = parse_size(size).with_context(|| format!("size of region '{}'", name))?;
    let region = bridge
        .regions()
        .register(name, slot_id(slot), size as usize)
        .with_context(|| format!("Failed to map {} region '{}'", slot.as_str(), name))?;
    debug!("{}: mapped {:#x} bytes", name, size);
    Ok(region)
}
