// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SSP audio port.
//!
//! No serial timing is modelled. Enabling the transmit DMA request opens a
//! playback file that DMA bursts are appended to; enabling the receive DMA
//! request opens a capture file that bursts are read from.

use super::regfile::{RegisterFile, SubRegion};
use crate::{lock, Peripheral, SimResult};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const SSCR0: u64 = 0x00;
pub const SSCR1: u64 = 0x04;
pub const SSSR: u64 = 0x08;
pub const SSITR: u64 = 0x0C;
pub const SSDR: u64 = 0x10;

pub const SSCR1_RSRE: u32 = 1 << 20;
pub const SSCR1_TSRE: u32 = 1 << 21;
pub const SSSR_TNF: u32 = 1 << 2;

const SSP_MAP: &[SubRegion] = &[SubRegion {
    name: "ssp",
    offset: 0,
    size: 0x4000,
}];

#[derive(Debug, Default)]
struct Stream {
    file: Option<File>,
    path: Option<PathBuf>,
    bytes: u64,
}

#[derive(Debug, Default)]
struct SspIo {
    tx: Stream,
    rx: Stream,
    play_index: u32,
}

#[derive(Debug)]
pub struct SspPort {
    name: String,
    base: u64,
    regs: RegisterFile,
    capture_dir: Option<PathBuf>,
    io: Mutex<SspIo>,
}

impl SspPort {
    pub fn new(name: &str, base: u64, size: usize, capture_dir: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            base,
            regs: RegisterFile::local(name, size, SSP_MAP),
            capture_dir,
            io: Mutex::new(SspIo::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus address of SSDR, the DMA handshake target.
    pub fn data_address(&self) -> u64 {
        self.base + SSDR
    }

    /// Bytes pushed to / pulled from the port since it was created.
    pub fn byte_counts(&self) -> (u64, u64) {
        let io = lock(&self.io);
        (io.tx.bytes, io.rx.bytes)
    }

    pub fn playback_path(&self) -> Option<PathBuf> {
        lock(&self.io).tx.path.clone()
    }

    /// Sink for memory-to-peripheral bursts.
    pub fn playback(&self, data: &[u8]) {
        let mut io = lock(&self.io);
        io.tx.bytes += data.len() as u64;
        if let Some(f) = io.tx.file.as_mut() {
            if let Err(e) = f.write_all(data) {
                warn!("{}: playback write failed: {}", self.name, e);
            }
        }
    }

    /// Source for peripheral-to-memory bursts. Silence once the capture
    /// file runs out or when none is open.
    pub fn capture(&self, buf: &mut [u8]) {
        let mut io = lock(&self.io);
        io.rx.bytes += buf.len() as u64;
        let mut filled = 0;
        if let Some(f) = io.rx.file.as_mut() {
            while filled < buf.len() {
                match f.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) => {
                        warn!("{}: capture read failed: {}", self.name, e);
                        break;
                    }
                }
            }
        }
        buf[filled..].fill(0);
    }

    fn start_playback(&self, io: &mut SspIo) {
        let Some(dir) = &self.capture_dir else {
            debug!("{}: playback enabled, no capture dir", self.name);
            return;
        };
        let path = dir.join(format!("{}-play{}.raw", self.name, io.play_index));
        io.play_index += 1;
        match File::create(&path) {
            Ok(f) => {
                info!("{}: opened {} for playback", self.name, path.display());
                io.tx.file = Some(f);
                io.tx.path = Some(path);
            }
            Err(e) => warn!("{}: can't open {}: {}", self.name, path.display(), e),
        }
    }

    fn start_capture(&self, io: &mut SspIo) {
        let Some(dir) = &self.capture_dir else {
            return;
        };
        let path = dir.join(format!("{}-capture.raw", self.name));
        match File::open(&path) {
            Ok(f) => {
                info!("{}: opened {} for capture", self.name, path.display());
                io.rx.file = Some(f);
                io.rx.path = Some(path);
            }
            Err(e) => debug!("{}: no capture source {}: {}", self.name, path.display(), e),
        }
    }

    fn control(&self, value: u32) -> SimResult<()> {
        let old = self.regs.read(SSCR1)?;
        self.regs.write(SSCR1, value)?;
        let set = value & !old;
        let clear = old & !value;

        let mut io = lock(&self.io);
        if set & SSCR1_TSRE != 0 {
            self.start_playback(&mut io);
        }
        if clear & SSCR1_TSRE != 0 && io.tx.file.take().is_some() {
            info!("{}: playback closed after {} bytes", self.name, io.tx.bytes);
        }
        if set & SSCR1_RSRE != 0 {
            self.start_capture(&mut io);
        }
        if clear & SSCR1_RSRE != 0 && io.rx.file.take().is_some() {
            info!("{}: capture closed after {} bytes", self.name, io.rx.bytes);
        }
        Ok(())
    }
}

impl Peripheral for SspPort {
    fn read(&self, offset: u64) -> SimResult<u32> {
        let value = self.regs.read(offset)?;
        // the transmit FIFO never fills
        if offset == SSSR {
            return Ok(value | SSSR_TNF);
        }
        Ok(value)
    }

    fn write(&self, offset: u64, value: u32) -> SimResult<()> {
        match offset {
            SSCR1 => self.control(value),
            _ => self.regs.write(offset, value),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let (tx, rx) = self.byte_counts();
        serde_json::json!({
            "name": self.name,
            "sscr0": self.regs.read(SSCR0).unwrap_or(0),
            "sscr1": self.regs.read(SSCR1).unwrap_or(0),
            "tx_bytes": tx,
            "rx_bytes": rx,
        })
    }
}
