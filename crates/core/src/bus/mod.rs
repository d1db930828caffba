// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::AddressSpace;
use crate::{Peripheral, SimResult, SimulationError};
use std::sync::Arc;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub irq: Option<u32>,
    pub dev: Arc<dyn Peripheral>,
}

impl std::fmt::Debug for PeripheralEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralEntry")
            .field("name", &self.name)
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("irq", &self.irq)
            .finish()
    }
}

/// 32-bit access path of one machine: RAM first, then device windows.
#[derive(Debug)]
pub struct SystemBus {
    pub memory: Arc<AddressSpace>,
    pub peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new(memory: Arc<AddressSpace>) -> Self {
        Self {
            memory,
            peripherals: Vec::new(),
        }
    }

    pub fn attach(
        &mut self,
        name: &str,
        base: u64,
        size: u64,
        irq: Option<u32>,
        dev: Arc<dyn Peripheral>,
    ) -> anyhow::Result<()> {
        let end = base + size;
        if let Some(other) = self
            .peripherals
            .iter()
            .find(|p| base < p.base + p.size && p.base < end)
        {
            anyhow::bail!(
                "peripheral '{}' at {:#x} overlaps '{}' at {:#x}",
                name,
                base,
                other.name,
                other.base
            );
        }
        tracing::debug!("bus: {} at {:#x}..{:#x}", name, base, end);
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            irq,
            dev,
        });
        Ok(())
    }

    pub fn find_peripheral(&self, addr: u64) -> Option<(&PeripheralEntry, u64)> {
        self.peripherals
            .iter()
            .find(|p| addr >= p.base && addr < p.base + p.size)
            .map(|p| (p, addr - p.base))
    }

    pub fn peripheral(&self, name: &str) -> Option<&Arc<dyn Peripheral>> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.dev)
    }

    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        if self.memory.contains(addr, 4) {
            return self.memory.read_u32(addr);
        }
        if addr & 3 != 0 {
            return Err(SimulationError::Misaligned(addr));
        }
        match self.find_peripheral(addr) {
            Some((p, offset)) => p.dev.read(offset),
            None => Err(SimulationError::MemoryViolation(addr)),
        }
    }

    pub fn write_u32(&self, addr: u64, value: u32) -> SimResult<()> {
        if self.memory.contains(addr, 4) {
            return self.memory.write_u32(addr, value);
        }
        if addr & 3 != 0 {
            return Err(SimulationError::Misaligned(addr));
        }
        match self.find_peripheral(addr) {
            Some((p, offset)) => p.dev.write(offset, value),
            None => Err(SimulationError::MemoryViolation(addr)),
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let mut devices = serde_json::Map::new();
        for p in &self.peripherals {
            devices.insert(p.name.clone(), p.dev.snapshot());
        }
        serde_json::Value::Object(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::ssp::{SspPort, SSSR, SSSR_TNF};

    fn bus() -> SystemBus {
        let mut mem = AddressSpace::new();
        mem.add_local("dram", 0xFF30_0000, 0x1000).unwrap();
        let mut bus = SystemBus::new(Arc::new(mem));
        bus.attach(
            "ssp0",
            0xFF2A_0000,
            0x1000,
            Some(16),
            Arc::new(SspPort::new("ssp0", 0xFF2A_0000, 0x1000, None)),
        )
        .unwrap();
        bus
    }

    #[test]
    fn test_routes_ram_and_devices() {
        let bus = bus();
        bus.write_u32(0xFF30_0010, 0xCAFE_F00D).unwrap();
        assert_eq!(bus.read_u32(0xFF30_0010).unwrap(), 0xCAFE_F00D);
        assert_eq!(bus.read_u32(0xFF2A_0000 + SSSR).unwrap() & SSSR_TNF, SSSR_TNF);
        assert!(matches!(
            bus.read_u32(0x1000),
            Err(SimulationError::MemoryViolation(0x1000))
        ));
        assert!(matches!(
            bus.write_u32(0xFF2A_0002, 0),
            Err(SimulationError::Misaligned(_))
        ));
    }

    #[test]
    fn test_overlapping_window_rejected() {
        let mut bus = bus();
        let dev = Arc::new(SspPort::new("ssp1", 0xFF2A_0800, 0x1000, None));
        assert!(bus.attach("ssp1", 0xFF2A_0800, 0x1000, None, dev).is_err());
        assert!(bus.snapshot().get("ssp0").is_some());
    }
}
