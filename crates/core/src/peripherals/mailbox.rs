// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::regfile::{RegisterFile, SubRegion};
use crate::{Peripheral, Side, SimResult};
use tracing::trace;

const MAILBOX_MAP: &[SubRegion] = &[
    SubRegion {
        name: "outbox",
        offset: 0x000,
        size: 0x400,
    },
    SubRegion {
        name: "inbox",
        offset: 0x400,
        size: 0x400,
    },
    SubRegion {
        name: "exception",
        offset: 0x800,
        size: 0x100,
    },
    SubRegion {
        name: "debug",
        offset: 0x900,
        size: 0x100,
    },
    SubRegion {
        name: "stream",
        offset: 0xA00,
        size: 0x200,
    },
    SubRegion {
        name: "trace",
        offset: 0xC00,
        size: 0x400,
    },
];

/// IPC payload window. Plain shared words; the doorbell lives in the SHIM.
#[derive(Debug)]
pub struct Mailbox {
    side: Side,
    regs: RegisterFile,
}

impl Mailbox {
    pub fn new(side: Side, regs: RegisterFile) -> Self {
        Self { side, regs }
    }

    pub fn map() -> &'static [SubRegion] {
        MAILBOX_MAP
    }

    fn area(&self, offset: u64) -> &'static str {
        self.regs.area(offset).map(|a| a.name).unwrap_or("unknown")
    }
}

impl Peripheral for Mailbox {
    fn read(&self, offset: u64) -> SimResult<u32> {
        let value = self.regs.read(offset)?;
        trace!(
            "mbox {:?}: read {} +{:#x} = {:#x}",
            self.side,
            self.area(offset),
            offset,
            value
        );
        Ok(value)
    }

    fn write(&self, offset: u64, value: u32) -> SimResult<()> {
        trace!(
            "mbox {:?}: write {} +{:#x} = {:#x}",
            self.side,
            self.area(offset),
            offset,
            value
        );
        self.regs.write(offset, value)
    }
}
