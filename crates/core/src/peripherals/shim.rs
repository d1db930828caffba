// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SHIM register block: IPC doorbells and their interrupt status/mask pairs.
//!
//! The word array is a shared region, so both processes see the same
//! register contents. Writes with cross-process effects additionally send
//! an IRQ or REG record to the peer.

use super::regfile::{RegisterFile, SubRegion};
use crate::bridge::{Bridge, Message, RegAccess, RegOp};
use crate::interrupt::{CpuControl, IrqSink};
use crate::{Peripheral, Side, SimResult};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

pub const CSR: u64 = 0x00;
pub const PISR: u64 = 0x08;
pub const PIMR: u64 = 0x10;
pub const ISRX: u64 = 0x18;
pub const ISRD: u64 = 0x20;
pub const IMRX: u64 = 0x28;
pub const IMRD: u64 = 0x30;
pub const IPCXL: u64 = 0x38;
pub const IPCXH: u64 = 0x3C;
pub const IPCDL: u64 = 0x40;
pub const IPCDH: u64 = 0x44;
pub const CLKCTL: u64 = 0x78;

pub const IPC_BUSY: u32 = 1 << 31;
pub const IPC_DONE: u32 = 1 << 30;
pub const ISR_BUSY: u32 = 1 << 1;
pub const ISR_DONE: u32 = 1 << 0;
pub const CSR_RST: u32 = 1 << 0;
pub const CSR_STALL: u32 = 1 << 2;

const FW_DEAD_MASK: u32 = 0xffff_0000;
const FW_DEAD: u32 = 0xdead_0000;

const SHIM_MAP: &[SubRegion] = &[
    SubRegion {
        name: "csr",
        offset: CSR,
        size: 0x08,
    },
    SubRegion {
        name: "irq",
        offset: PISR,
        size: 0x30,
    },
    SubRegion {
        name: "ipc",
        offset: IPCXL,
        size: 0x10,
    },
    SubRegion {
        name: "clk",
        offset: CLKCTL,
        size: 0x08,
    },
];

#[derive(Debug)]
pub struct Shim {
    side: Side,
    regs: RegisterFile,
    bridge: Weak<Bridge>,
    irq: Arc<dyn IrqSink>,
    irq_line: u32,
    cpu: Option<Arc<dyn CpuControl>>,
}

impl Shim {
    pub fn new(
        side: Side,
        regs: RegisterFile,
        bridge: Weak<Bridge>,
        irq: Arc<dyn IrqSink>,
        irq_line: u32,
    ) -> Self {
        Self {
            side,
            regs,
            bridge,
            irq,
            irq_line,
            cpu: None,
        }
    }

    pub fn with_cpu(mut self, cpu: Arc<dyn CpuControl>) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn map() -> &'static [SubRegion] {
        SHIM_MAP
    }

    /// Status/mask pair this side services.
    fn inbound_pair(&self) -> (u64, u64) {
        match self.side {
            Side::Dsp => (ISRD, IMRD),
            Side::Host => (ISRX, IMRX),
        }
    }

    /// Status register this side raises towards the peer.
    fn outbound_status(&self) -> u64 {
        match self.side {
            Side::Dsp => ISRX,
            Side::Host => ISRD,
        }
    }

    fn active(&self) -> SimResult<u32> {
        let (isr, imr) = self.inbound_pair();
        Ok(self.regs.read(isr)? & !self.regs.read(imr)? & (ISR_BUSY | ISR_DONE))
    }

    fn update_irq(&self) -> SimResult<()> {
        let active = self.active()?;
        debug!(
            "shim {:?}: active {:#x}, irq line {} -> {}",
            self.side,
            active,
            self.irq_line,
            active != 0
        );
        self.irq.set_irq(self.irq_line, active != 0);
        Ok(())
    }

    fn notify(&self, msg: Message) {
        let Some(bridge) = self.bridge.upgrade() else {
            warn!("shim {:?}: bridge gone, dropping {:?}", self.side, msg);
            return;
        };
        if let Err(e) = bridge.send(&msg) {
            error!("shim {:?}: failed to notify peer: {}", self.side, e);
        }
    }

    fn doorbell(&self, offset: u64, value: u32) -> SimResult<()> {
        self.regs.write(offset, value)?;
        let mut status = self.regs.read(self.outbound_status())? & !(ISR_BUSY | ISR_DONE);
        if value & IPC_BUSY != 0 {
            status |= ISR_BUSY;
        }
        if value & IPC_DONE != 0 {
            status |= ISR_DONE;
        }
        self.regs.write(self.outbound_status(), status)?;

        // a new message rings on BUSY, a reply on DONE
        let ring = match (self.side, offset) {
            (Side::Dsp, IPCDH) | (Side::Host, IPCXH) => value & IPC_BUSY != 0,
            _ => value & IPC_DONE != 0,
        };
        if ring {
            debug!("shim {:?}: doorbell {:#x} = {:#x}", self.side, offset, value);
            self.notify(Message::Irq { irq: 0 });
        }
        Ok(())
    }

    /// IRQ record from the peer: re-derive our interrupt line.
    pub fn on_irq(&self) -> SimResult<()> {
        self.update_irq()
    }

    /// Register record from the peer. The word itself is already visible
    /// through the shared block; only CSR run control needs action here.
    pub fn on_register(&self, access: &RegAccess) {
        if !access.op.is_write() || access.reg as u64 != CSR {
            debug!("shim {:?}: ignoring register record {:?}", self.side, access);
            return;
        }
        let Some(cpu) = &self.cpu else {
            return;
        };
        let val = access.val as u32;
        if !cpu.is_in_reset() && val & CSR_RST != 0 {
            info!("cpu: reset");
            cpu.reset();
        } else if cpu.is_in_reset() && val & (CSR_RST | CSR_STALL) == 0 {
            info!("cpu: running");
            cpu.run();
        }
    }
}

impl Peripheral for Shim {
    fn read(&self, offset: u64) -> SimResult<u32> {
        self.regs.read(offset)
    }

    fn write(&self, offset: u64, value: u32) -> SimResult<()> {
        match (self.side, offset) {
            (_, IPCXH) | (_, IPCDH) => self.doorbell(offset, value),
            (Side::Dsp, IPCDL) => {
                self.regs.write(offset, value)?;
                if value & FW_DEAD_MASK == FW_DEAD {
                    error!("shim: firmware is dead ({:#x}), cpu held in reset", value);
                    if let Some(cpu) = &self.cpu {
                        cpu.reset();
                    }
                }
                Ok(())
            }
            (Side::Dsp, IMRD) | (Side::Host, IMRX) => {
                self.regs.write(offset, value)?;
                self.update_irq()
            }
            (Side::Dsp, PISR) => {
                self.regs.update(offset, |v| v & !value)?;
                Ok(())
            }
            (_, CSR) => {
                self.regs.write(offset, value)?;
                self.notify(Message::Reg(RegAccess {
                    op: RegOp::Write32,
                    reg: CSR as u32,
                    val: value as u64,
                }));
                Ok(())
            }
            _ => self.regs.write(offset, value),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let word = |o| self.regs.read(o).unwrap_or(0);
        serde_json::json!({
            "side": self.side,
            "csr": word(CSR),
            "isrx": word(ISRX),
            "isrd": word(ISRD),
            "imrx": word(IMRX),
            "imrd": word(IMRD),
            "ipcx": word(IPCXH),
            "ipcd": word(IPCDH),
        })
    }
}
