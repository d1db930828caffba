// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::AddressSpace;
use crate::SimResult;
use serde::Serialize;

/// Linked-list item as laid out in guest memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub sar: u32,
    pub dar: u32,
    pub llp: u32,
    pub ctrl_lo: u32,
    pub ctrl_hi: u32,
    pub sstat: u32,
    pub dstat: u32,
}

impl Descriptor {
    pub const SIZE: usize = 28;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        let w = |i: usize| u32::from_le_bytes([b[i * 4], b[i * 4 + 1], b[i * 4 + 2], b[i * 4 + 3]]);
        Self {
            sar: w(0),
            dar: w(1),
            llp: w(2),
            ctrl_lo: w(3),
            ctrl_hi: w(4),
            sstat: w(5),
            dstat: w(6),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let words = [
            self.sar,
            self.dar,
            self.llp,
            self.ctrl_lo,
            self.ctrl_hi,
            self.sstat,
            self.dstat,
        ];
        for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    pub fn read(mem: &AddressSpace, addr: u64) -> SimResult<Self> {
        let mut buf = [0u8; Self::SIZE];
        mem.read(addr, &mut buf)?;
        Ok(Self::from_bytes(&buf))
    }

    pub fn write(&self, mem: &AddressSpace, addr: u64) -> SimResult<()> {
        mem.write(addr, &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layout() {
        let mut mem = AddressSpace::new();
        mem.add_local("dram", 0x1000, 0x100).unwrap();
        let lli = Descriptor {
            sar: 0x1111,
            dar: 0x2222,
            llp: 0,
            ctrl_lo: 0x10_0000,
            ctrl_hi: 64,
            sstat: 0,
            dstat: 0,
        };
        lli.write(&mem, 0x1010).unwrap();
        assert_eq!(mem.read_u32(0x1010 + 4).unwrap(), 0x2222);
        assert_eq!(mem.read_u32(0x1010 + 16).unwrap(), 64);
        assert_eq!(Descriptor::read(&mem, 0x1010).unwrap(), lli);
        assert!(Descriptor::read(&mem, 0x10F0).is_err());
    }
}
