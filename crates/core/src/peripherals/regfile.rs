// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bridge::SharedRegion;
use crate::{lock, SimResult, SimulationError};
use std::sync::{Arc, Mutex};

/// Named span inside a register window, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegion {
    pub name: &'static str,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug)]
enum Words {
    Local(Mutex<Vec<u32>>),
    Shared(Arc<SharedRegion>),
}

/// Backing word array of a memory-mapped device.
///
/// Offsets are byte offsets and must be word-aligned. Storage is either
/// private to the process or a shared region both sides map.
#[derive(Debug)]
pub struct RegisterFile {
    name: String,
    size: u64,
    words: Words,
    map: &'static [SubRegion],
}

impl RegisterFile {
    pub fn local(name: &str, size: usize, map: &'static [SubRegion]) -> Self {
        Self {
            name: name.to_string(),
            size: size as u64,
            words: Words::Local(Mutex::new(vec![0; size / 4])),
            map,
        }
    }

    pub fn shared(region: Arc<SharedRegion>, map: &'static [SubRegion]) -> Self {
        Self {
            name: region.name().to_string(),
            size: region.len() as u64,
            words: Words::Shared(region),
            map,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn check(&self, offset: u64) -> SimResult<usize> {
        if offset & 3 != 0 {
            return Err(SimulationError::Misaligned(offset));
        }
        if offset + 4 > self.size {
            return Err(SimulationError::MemoryViolation(offset));
        }
        Ok(offset as usize)
    }

    pub fn read(&self, offset: u64) -> SimResult<u32> {
        let off = self.check(offset)?;
        match &self.words {
            Words::Local(w) => Ok(lock(w)[off >> 2]),
            Words::Shared(r) => Ok(r.read_u32(off)?),
        }
    }

    pub fn write(&self, offset: u64, value: u32) -> SimResult<()> {
        let off = self.check(offset)?;
        match &self.words {
            Words::Local(w) => {
                lock(w)[off >> 2] = value;
                Ok(())
            }
            Words::Shared(r) => Ok(r.write_u32(off, value)?),
        }
    }

    /// Read-modify-write of one word.
    pub fn update(&self, offset: u64, f: impl FnOnce(u32) -> u32) -> SimResult<u32> {
        let new = f(self.read(offset)?);
        self.write(offset, new)?;
        Ok(new)
    }

    /// Sub-region containing `offset`, if any.
    pub fn area(&self, offset: u64) -> Option<&'static SubRegion> {
        self.map
            .iter()
            .find(|a| offset >= a.offset && offset < a.offset + a.size)
    }

    pub fn words(&self) -> Vec<u32> {
        (0..self.size / 4)
            .map(|i| self.read(i * 4).unwrap_or(0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &[SubRegion] = &[
        SubRegion {
            name: "ctrl",
            offset: 0x0,
            size: 0x10,
        },
        SubRegion {
            name: "data",
            offset: 0x10,
            size: 0x10,
        },
    ];

    #[test]
    fn test_word_access() {
        let regs = RegisterFile::local("dev", 0x20, MAP);
        regs.write(0x14, 0xabcd).unwrap();
        assert_eq!(regs.read(0x14).unwrap(), 0xabcd);
        assert_eq!(regs.update(0x14, |v| v | 1).unwrap(), 0xabcd);
        assert!(matches!(regs.read(0x2), Err(SimulationError::Misaligned(2))));
        assert!(regs.read(0x20).is_err());
    }

    #[test]
    fn test_area_lookup() {
        let regs = RegisterFile::local("dev", 0x40, MAP);
        assert_eq!(regs.area(0x18).map(|a| a.name), Some("data"));
        assert!(regs.area(0x30).is_none());
    }
}
