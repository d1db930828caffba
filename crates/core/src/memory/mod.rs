// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bridge::SharedRegion;
use crate::{lock, SimResult, SimulationError};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
enum Backing {
    Local(Mutex<Vec<u8>>),
    Shared(Arc<SharedRegion>),
}

/// A contiguous span of guest RAM.
#[derive(Debug)]
pub struct MemoryRegion {
    pub name: String,
    pub base: u64,
    pub size: u64,
    backing: Backing,
}

impl MemoryRegion {
    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.base && addr + len as u64 <= self.base + self.size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> SimResult<()> {
        match &self.backing {
            Backing::Local(data) => {
                buf.copy_from_slice(&lock(data)[offset..offset + buf.len()]);
                Ok(())
            }
            Backing::Shared(region) => Ok(region.read_at(offset, buf)?),
        }
    }

    fn write(&self, offset: usize, data: &[u8]) -> SimResult<()> {
        match &self.backing {
            Backing::Local(mem) => {
                lock(mem)[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            Backing::Shared(region) => Ok(region.write_at(offset, data)?),
        }
    }
}

/// Guest-physical address space of one side, as seen by bus masters.
///
/// An access must fall entirely inside one region.
#[derive(Debug, Default)]
pub struct AddressSpace {
    regions: Vec<MemoryRegion>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, region: MemoryRegion) -> anyhow::Result<()> {
        let end = region.base + region.size;
        if let Some(other) = self
            .regions
            .iter()
            .find(|r| region.base < r.base + r.size && r.base < end)
        {
            anyhow::bail!(
                "region '{}' at {:#x} overlaps '{}' at {:#x}",
                region.name,
                region.base,
                other.name,
                other.base
            );
        }
        self.regions.push(region);
        Ok(())
    }

    /// Process-private RAM.
    pub fn add_local(&mut self, name: &str, base: u64, size: usize) -> anyhow::Result<()> {
        self.insert(MemoryRegion {
            name: name.to_string(),
            base,
            size: size as u64,
            backing: Backing::Local(Mutex::new(vec![0; size])),
        })
    }

    /// RAM backed by a region shared with the peer process.
    pub fn add_shared(&mut self, base: u64, region: Arc<SharedRegion>) -> anyhow::Result<()> {
        self.insert(MemoryRegion {
            name: region.name().to_string(),
            base,
            size: region.len() as u64,
            backing: Backing::Shared(region),
        })
    }

    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    fn find(&self, addr: u64, len: usize) -> SimResult<(&MemoryRegion, usize)> {
        self.regions
            .iter()
            .find(|r| r.contains(addr, len))
            .map(|r| (r, (addr - r.base) as usize))
            .ok_or(SimulationError::MemoryViolation(addr))
    }

    pub fn contains(&self, addr: u64, len: usize) -> bool {
        self.find(addr, len).is_ok()
    }

    pub fn read(&self, addr: u64, buf: &mut [u8]) -> SimResult<()> {
        let (region, offset) = self.find(addr, buf.len())?;
        region.read(offset, buf)
    }

    pub fn write(&self, addr: u64, data: &[u8]) -> SimResult<()> {
        let (region, offset) = self.find(addr, data.len())?;
        region.write(offset, data)
    }

    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let mut b = [0u8; 4];
        self.read(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn write_u32(&self, addr: u64, value: u32) -> SimResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}
