// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Event record wire format.
//!
//! Every record starts with a 16-byte little-endian header
//! `{id, category, subtype, size}` followed by a fixed payload per variant.
//! `size` is the total record length and must match the variant exactly.

pub const HEADER_SIZE: usize = 16;

const CAT_REG: u32 = 1;
const CAT_IRQ: u32 = 2;
const CAT_PM: u32 = 3;
const CAT_DMA: u32 = 4;
const CAT_MEM: u32 = 5;

const REG_READ32: u32 = 1;
const REG_WRITE32: u32 = 2;
const REG_READ64: u32 = 3;
const REG_WRITE64: u32 = 4;

const IRQ_ASSERT: u32 = 1;
const PM_SET_STATE: u32 = 1;

const DMA_NEW_REQUEST: u32 = 1;
const DMA_READY: u32 = 2;
const DMA_COMPLETE: u32 = 3;

const MEM_SYNC: u32 = 1;

const REG32_SIZE: usize = HEADER_SIZE + 8;
const REG64_SIZE: usize = HEADER_SIZE + 16;
const IRQ_SIZE: usize = HEADER_SIZE + 4;
const PM_SIZE: usize = HEADER_SIZE + 4;
const DMA_SIZE: usize = HEADER_SIZE + 40;
const MEM_SIZE: usize = HEADER_SIZE + 12;

/// Largest record the codec produces.
pub const MAX_RECORD_SIZE: usize = DMA_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unknown event category {0}")]
    UnknownCategory(u32),
    #[error("unknown subtype {subtype} for category {category}")]
    UnknownSubtype { category: u32, subtype: u32 },
    #[error("size field {declared} does not match variant size {expected}")]
    SizeMismatch { expected: usize, declared: usize },
    #[error("invalid DMA direction {0}")]
    InvalidDirection(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Reg,
    Irq,
    Pm,
    Dma,
    Mem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOp {
    Read32,
    Write32,
    Read64,
    Write64,
}

impl RegOp {
    pub fn is_write(self) -> bool {
        matches!(self, RegOp::Write32 | RegOp::Write64)
    }

    fn is_wide(self) -> bool {
        matches!(self, RegOp::Read64 | RegOp::Write64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAccess {
    pub op: RegOp,
    pub reg: u32,
    pub val: u64,
}

impl RegAccess {
    pub fn write32(reg: u32, val: u32) -> Self {
        Self {
            op: RegOp::Write32,
            reg,
            val: val as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaOp {
    NewRequest,
    Ready,
    Complete,
}

/// From the point of view of the peer that owns the far memory:
/// `Read` means the peer supplies the data, `Write` means it receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DmaDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMessage {
    pub op: DmaOp,
    /// Region id of the shared buffer, filled by the peer in `Ready`.
    pub host_data: u64,
    pub src: u32,
    pub dest: u32,
    pub size: u32,
    pub controller: u32,
    pub channel: u32,
    /// Request token chosen by the initiator and echoed by the peer.
    pub client_data: u64,
    pub direction: DmaDirection,
}

impl DmaMessage {
    /// Same request with a different opcode.
    pub fn reply(&self, op: DmaOp) -> Self {
        Self { op, ..*self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Reg(RegAccess),
    Irq { irq: u32 },
    Pm { state: u32 },
    Dma(DmaMessage),
    MemSync { region: u32, offset: u32, length: u32 },
}

impl Message {
    pub fn category(&self) -> Category {
        match self {
            Message::Reg(_) => Category::Reg,
            Message::Irq { .. } => Category::Irq,
            Message::Pm { .. } => Category::Pm,
            Message::Dma(_) => Category::Dma,
            Message::MemSync { .. } => Category::Mem,
        }
    }

    pub fn wire_size(&self) -> usize {
        match self {
            Message::Reg(r) if r.op.is_wide() => REG64_SIZE,
            Message::Reg(_) => REG32_SIZE,
            Message::Irq { .. } => IRQ_SIZE,
            Message::Pm { .. } => PM_SIZE,
            Message::Dma(_) => DMA_SIZE,
            Message::MemSync { .. } => MEM_SIZE,
        }
    }

    fn tags(&self) -> (u32, u32) {
        match self {
            Message::Reg(r) => (
                CAT_REG,
                match r.op {
                    RegOp::Read32 => REG_READ32,
                    RegOp::Write32 => REG_WRITE32,
                    RegOp::Read64 => REG_READ64,
                    RegOp::Write64 => REG_WRITE64,
                },
            ),
            Message::Irq { .. } => (CAT_IRQ, IRQ_ASSERT),
            Message::Pm { .. } => (CAT_PM, PM_SET_STATE),
            Message::Dma(d) => (
                CAT_DMA,
                match d.op {
                    DmaOp::NewRequest => DMA_NEW_REQUEST,
                    DmaOp::Ready => DMA_READY,
                    DmaOp::Complete => DMA_COMPLETE,
                },
            ),
            Message::MemSync { .. } => (CAT_MEM, MEM_SYNC),
        }
    }
}

/// A decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub id: u32,
    pub message: Message,
}

pub fn encode(id: u32, msg: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.wire_size());
    encode_into(id, msg, &mut out);
    out
}

pub fn encode_into(id: u32, msg: &Message, out: &mut Vec<u8>) {
    let (category, subtype) = msg.tags();
    push_u32(out, id);
    push_u32(out, category);
    push_u32(out, subtype);
    push_u32(out, msg.wire_size() as u32);

    match msg {
        Message::Reg(r) if r.op.is_wide() => {
            push_u32(out, r.reg);
            push_u32(out, 0);
            push_u64(out, r.val);
        }
        Message::Reg(r) => {
            push_u32(out, r.reg);
            push_u32(out, r.val as u32);
        }
        Message::Irq { irq } => push_u32(out, *irq),
        Message::Pm { state } => push_u32(out, *state),
        Message::Dma(d) => {
            push_u64(out, d.host_data);
            push_u32(out, d.src);
            push_u32(out, d.dest);
            push_u32(out, d.size);
            push_u32(out, d.controller);
            push_u32(out, d.channel);
            push_u64(out, d.client_data);
            push_u32(
                out,
                match d.direction {
                    DmaDirection::Read => 0,
                    DmaDirection::Write => 1,
                },
            );
        }
        Message::MemSync {
            region,
            offset,
            length,
        } => {
            push_u32(out, *region);
            push_u32(out, *offset);
            push_u32(out, *length);
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<Event, DecodeError> {
    let mut r = Reader::new(bytes);
    let id = r.read_u32()?;
    let category = r.read_u32()?;
    let subtype = r.read_u32()?;
    let declared = r.read_u32()? as usize;

    let unknown_subtype = || DecodeError::UnknownSubtype { category, subtype };
    let expected = match category {
        CAT_REG => match subtype {
            REG_READ32 | REG_WRITE32 => REG32_SIZE,
            REG_READ64 | REG_WRITE64 => REG64_SIZE,
            _ => return Err(unknown_subtype()),
        },
        CAT_IRQ if subtype == IRQ_ASSERT => IRQ_SIZE,
        CAT_PM if subtype == PM_SET_STATE => PM_SIZE,
        CAT_DMA if (DMA_NEW_REQUEST..=DMA_COMPLETE).contains(&subtype) => DMA_SIZE,
        CAT_MEM if subtype == MEM_SYNC => MEM_SIZE,
        CAT_IRQ | CAT_PM | CAT_DMA | CAT_MEM => return Err(unknown_subtype()),
        other => return Err(DecodeError::UnknownCategory(other)),
    };
    if declared != expected {
        return Err(DecodeError::SizeMismatch { expected, declared });
    }
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            need: expected,
            got: bytes.len(),
        });
    }

    let message = match category {
        CAT_REG => {
            let op = match subtype {
                REG_READ32 => RegOp::Read32,
                REG_WRITE32 => RegOp::Write32,
                REG_READ64 => RegOp::Read64,
                _ => RegOp::Write64,
            };
            let reg = r.read_u32()?;
            let val = if op.is_wide() {
                let _reserved = r.read_u32()?;
                r.read_u64()?
            } else {
                r.read_u32()? as u64
            };
            Message::Reg(RegAccess { op, reg, val })
        }
        CAT_IRQ => Message::Irq { irq: r.read_u32()? },
        CAT_PM => Message::Pm {
            state: r.read_u32()?,
        },
        CAT_DMA => {
            let op = match subtype {
                DMA_NEW_REQUEST => DmaOp::NewRequest,
                DMA_READY => DmaOp::Ready,
                _ => DmaOp::Complete,
            };
            let host_data = r.read_u64()?;
            let src = r.read_u32()?;
            let dest = r.read_u32()?;
            let size = r.read_u32()?;
            let controller = r.read_u32()?;
            let channel = r.read_u32()?;
            let client_data = r.read_u64()?;
            let direction = match r.read_u32()? {
                0 => DmaDirection::Read,
                1 => DmaDirection::Write,
                v => return Err(DecodeError::InvalidDirection(v)),
            };
            Message::Dma(DmaMessage {
                op,
                host_data,
                src,
                dest,
                size,
                controller,
                channel,
                client_data,
                direction,
            })
        }
        _ => Message::MemSync {
            region: r.read_u32()?,
            offset: r.read_u32()?,
            length: r.read_u32()?,
        },
    };
    Ok(Event { id, message })
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated {
                need: end,
                got: self.bytes.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take()?))
    }
}
