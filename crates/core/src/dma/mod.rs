// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! DesignWare DMA controller model and the far-side peer of its
//! mem-to-mem transfers.

pub mod channel;
pub mod controller;
pub mod descriptor;
pub mod peer;
pub mod regs;

pub use channel::{TransferKind, TransferSummary};
pub use controller::DwDmac;
pub use descriptor::Descriptor;
pub use peer::DmaPeer;
pub use regs::ChannelId;

use crate::bridge::Bridge;
use crate::interrupt::IrqSink;
use crate::memory::AddressSpace;
use crate::peripherals::ssp::SspPort;
use crate::scheduler::Scheduler;
use adsp_config::DmaTiming;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Channel lifecycle hooks. Called with the controller lock held, so an
/// observer must not call back into the controller.
pub trait DmaObserver: Debug + Send + Sync {
    fn on_block_complete(&self, _dmac: u32, _chan: ChannelId, _bytes: u32) {}
    fn on_reload(&self, _dmac: u32, _chan: ChannelId, _next: &Descriptor) {}
    fn on_transfer_complete(&self, _dmac: u32, _chan: ChannelId, _summary: &TransferSummary) {}
}

/// Everything a controller needs from the machine it lives in.
#[derive(Debug, Clone)]
pub struct DmaEnv {
    pub memory: Arc<AddressSpace>,
    pub irq: Arc<dyn IrqSink>,
    pub scheduler: Arc<dyn Scheduler>,
    pub bridge: Weak<Bridge>,
    pub ssps: Vec<Arc<SspPort>>,
    pub timing: DmaTiming,
    pub handshake_timeout: Duration,
    pub observers: Vec<Arc<dyn DmaObserver>>,
}
