// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! DesignWare AHB DMA register map and field accessors.

use bitflags::bitflags;
use serde::Serialize;

pub const NUM_CHANNELS: usize = 8;
pub const CH_STRIDE: u64 = 0x58;
pub const REG_BLOCK_SIZE: usize = 0x1000;

// per-channel, relative to the channel base
pub const SAR: u64 = 0x00;
pub const DAR: u64 = 0x08;
pub const LLP: u64 = 0x10;
pub const CTL_LO: u64 = 0x18;
pub const CTL_HI: u64 = 0x1C;
pub const CFG_LO: u64 = 0x40;
pub const CFG_HI: u64 = 0x44;

pub const RAW_TFR: u64 = 0x2C0;
pub const RAW_BLOCK: u64 = 0x2C8;
pub const RAW_SRC_TRAN: u64 = 0x2D0;
pub const RAW_DST_TRAN: u64 = 0x2D8;
pub const RAW_ERR: u64 = 0x2E0;
pub const STATUS_TFR: u64 = 0x2E8;
pub const STATUS_BLOCK: u64 = 0x2F0;
pub const STATUS_SRC_TRAN: u64 = 0x2F8;
pub const STATUS_DST_TRAN: u64 = 0x300;
pub const STATUS_ERR: u64 = 0x308;
pub const MASK_TFR: u64 = 0x310;
pub const MASK_BLOCK: u64 = 0x318;
pub const MASK_SRC_TRAN: u64 = 0x320;
pub const MASK_DST_TRAN: u64 = 0x328;
pub const MASK_ERR: u64 = 0x330;
pub const CLEAR_TFR: u64 = 0x338;
pub const CLEAR_BLOCK: u64 = 0x340;
pub const CLEAR_SRC_TRAN: u64 = 0x348;
pub const CLEAR_DST_TRAN: u64 = 0x350;
pub const CLEAR_ERR: u64 = 0x358;
pub const INTR_STATUS: u64 = 0x360;
pub const DMA_CFG: u64 = 0x398;
pub const CHAN_EN: u64 = 0x3A0;
pub const FIFO_PART0_LO: u64 = 0x400;
pub const FIFO_PART0_HI: u64 = 0x404;
pub const FIFO_PART1_LO: u64 = 0x408;
pub const FIFO_PART1_HI: u64 = 0x40C;
pub const CH_SAI_ERR: u64 = 0x410;

pub const DMA_CFG_EN: u32 = 1 << 0;

pub const CFG_LO_SUSPEND: u32 = 1 << 8;
pub const CFG_LO_FIFO_EMPTY: u32 = 1 << 9;
pub const CFG_LO_DRAIN: u32 = 1 << 10;
pub const CFG_LO_SRC_RELOAD: u32 = 1 << 30;
pub const CFG_LO_DST_RELOAD: u32 = 1 << 31;

pub const CTL_LO_INT_EN: u32 = 1 << 0;
pub const CTL_LO_LLP_D_EN: u32 = 1 << 27;
pub const CTL_LO_LLP_S_EN: u32 = 1 << 28;
pub const CTL_HI_DONE: u32 = 1 << 17;

/// Address bit marking a DSP-resident buffer.
pub const DSP_ADDR_BIT: u32 = 1 << 31;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntrStatus: u32 {
        const TFR = 1 << 0;
        const BLOCK = 1 << 1;
    }
}

const fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

const fn with_field(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let mask = ((1 << width) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}

// CTL_LO
pub const fn dst_width(ctl_lo: u32) -> u32 {
    field(ctl_lo, 1, 3)
}
pub const fn src_width(ctl_lo: u32) -> u32 {
    field(ctl_lo, 4, 3)
}
pub const fn dinc(ctl_lo: u32) -> u32 {
    field(ctl_lo, 7, 2)
}
pub const fn sinc(ctl_lo: u32) -> u32 {
    field(ctl_lo, 9, 2)
}
pub const fn dst_msize(ctl_lo: u32) -> u32 {
    field(ctl_lo, 11, 3)
}
pub const fn src_msize(ctl_lo: u32) -> u32 {
    field(ctl_lo, 14, 3)
}
pub const fn tt_fc(ctl_lo: u32) -> u32 {
    field(ctl_lo, 20, 3)
}
pub const fn set_tt_fc(ctl_lo: u32, fc: u32) -> u32 {
    with_field(ctl_lo, 20, 3, fc)
}
pub const fn dms(ctl_lo: u32) -> u32 {
    field(ctl_lo, 23, 2)
}
pub const fn sms(ctl_lo: u32) -> u32 {
    field(ctl_lo, 25, 2)
}

// CTL_HI
pub const fn block_ts(ctl_hi: u32) -> u32 {
    field(ctl_hi, 0, 17)
}
pub const fn set_block_ts(ctl_hi: u32, size: u32) -> u32 {
    with_field(ctl_hi, 0, 17, size)
}

// CFG_HI
pub const fn src_per(cfg_hi: u32) -> u32 {
    field(cfg_hi, 7, 4)
}
pub const fn dst_per(cfg_hi: u32) -> u32 {
    field(cfg_hi, 11, 4)
}

/// Descriptor address held in an LLP register; the low bits pick the bus
/// master.
pub const fn llp_addr(llp: u32) -> u32 {
    llp & !3
}

/// Flow control and transfer type, CTL_LO.TT_FC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowControl {
    MemToMem,
    MemToPeriph,
    PeriphToMem,
}

impl FlowControl {
    pub fn from_ctl_lo(ctl_lo: u32) -> Result<Self, u32> {
        match tt_fc(ctl_lo) {
            0 => Ok(FlowControl::MemToMem),
            1 => Ok(FlowControl::MemToPeriph),
            2 => Ok(FlowControl::PeriphToMem),
            other => Err(other),
        }
    }
}

/// A range-checked channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChannelId(u8);

impl ChannelId {
    pub fn new(index: u32) -> Option<Self> {
        (index < NUM_CHANNELS as u32).then_some(Self(index as u8))
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..NUM_CHANNELS as u8).map(ChannelId)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0 as u32
    }

    /// Bit in the RAW/STATUS/CHAN_EN low byte.
    pub fn bit(self) -> u32 {
        1 << self.0
    }

    /// Write-enable bit in CHAN_EN and MASK_*.
    pub fn write_enable(self) -> u32 {
        0x100 << self.0
    }

    pub fn reg(self, reg: u64) -> u64 {
        self.0 as u64 * CH_STRIDE + reg
    }

    /// Split a block offset into channel and per-channel register.
    pub fn decode(offset: u64) -> Option<(ChannelId, u64)> {
        if offset >= NUM_CHANNELS as u64 * CH_STRIDE {
            return None;
        }
        Some((ChannelId((offset / CH_STRIDE) as u8), offset % CH_STRIDE))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
