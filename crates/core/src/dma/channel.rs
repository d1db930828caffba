// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bridge::{DmaDirection, DmaMessage, SharedRegion};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferKind {
    MemToMem(DmaDirection),
    /// Playback into the SSP port at `port`.
    MemToPeriph { port: usize },
    /// Capture from the SSP port at `port`.
    PeriphToMem { port: usize },
}

/// Outcome of a finished channel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub kind: Option<TransferKind>,
    pub blocks: u32,
    pub bursts: u32,
    pub bytes: u64,
    /// Ended at a block boundary because of suspend or disable.
    pub stopped: bool,
    /// Abandoned before completion (handshake timeout, send failure).
    pub aborted: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    pub active: bool,
    /// Incremented on every arm; workers holding an older value retire.
    pub run: u64,
    pub kind: Option<TransferKind>,
    pub block_bytes: u32,
    pub total_bytes: u64,
    pub blocks: u32,
    pub bursts: u32,
    pub stop: bool,
    /// In-flight mem-to-mem request for the current block.
    pub request: Option<DmaMessage>,
    pub awaiting_ready: bool,
    pub region: Option<Arc<SharedRegion>>,
    pub capture: Option<File>,
    pub last: Option<TransferSummary>,
}

impl ChannelState {
    pub fn arm(&mut self) -> u64 {
        self.run += 1;
        self.active = true;
        self.kind = None;
        self.block_bytes = 0;
        self.total_bytes = 0;
        self.blocks = 0;
        self.bursts = 0;
        self.stop = false;
        self.request = None;
        self.awaiting_ready = false;
        self.run
    }

    pub fn account(&mut self, bytes: u32) {
        self.block_bytes += bytes;
        self.total_bytes += bytes as u64;
        self.bursts += 1;
    }

    pub fn record(&mut self, data: &[u8]) {
        if let Some(f) = self.capture.as_mut() {
            if let Err(e) = f.write_all(data) {
                warn!("dma: capture write failed, closing: {}", e);
                self.capture = None;
            }
        }
    }

    /// Release everything the run held and keep its summary.
    pub fn teardown(&mut self, aborted: bool) -> TransferSummary {
        let summary = TransferSummary {
            kind: self.kind,
            blocks: self.blocks,
            bursts: self.bursts,
            bytes: self.total_bytes,
            stopped: self.stop,
            aborted,
        };
        self.active = false;
        self.kind = None;
        self.block_bytes = 0;
        self.total_bytes = 0;
        self.blocks = 0;
        self.bursts = 0;
        self.stop = false;
        self.request = None;
        self.awaiting_ready = false;
        self.region = None;
        self.capture = None;
        self.last = Some(summary);
        summary
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelSnapshot {
    pub active: bool,
    pub kind: Option<TransferKind>,
    pub block_bytes: u32,
    pub total_bytes: u64,
    pub blocks: u32,
    pub bursts: u32,
    pub stop: bool,
    pub awaiting_ready: bool,
    pub last: Option<TransferSummary>,
}

impl From<&ChannelState> for ChannelSnapshot {
    fn from(ch: &ChannelState) -> Self {
        Self {
            active: ch.active,
            kind: ch.kind,
            block_bytes: ch.block_bytes,
            total_bytes: ch.total_bytes,
            blocks: ch.blocks,
            bursts: ch.bursts,
            stop: ch.stop,
            awaiting_ready: ch.awaiting_ready,
            last: ch.last,
        }
    }
}
