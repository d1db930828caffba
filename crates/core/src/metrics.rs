// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::dma::{ChannelId, Descriptor, DmaObserver, TransferSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
pub struct TransferMetrics {
    blocks: AtomicU64,
    reloads: AtomicU64,
    transfers: AtomicU64,
    stopped: AtomicU64,
    bytes: AtomicU64,
    bytes_by_channel: Mutex<HashMap<(u32, ChannelId), u64>>,
    start_time: Instant,
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self {
            blocks: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            bytes_by_channel: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.blocks.store(0, Ordering::SeqCst);
        self.reloads.store(0, Ordering::SeqCst);
        self.transfers.store(0, Ordering::SeqCst);
        self.stopped.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.bytes_by_channel.lock() {
            m.clear();
        }
    }

    pub fn get_blocks(&self) -> u64 {
        self.blocks.load(Ordering::SeqCst)
    }

    pub fn get_reloads(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn get_transfers(&self) -> u64 {
        self.transfers.load(Ordering::SeqCst)
    }

    pub fn get_stopped(&self) -> u64 {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn get_bytes_total(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn get_bytes(&self, dmac: u32, chan: ChannelId) -> u64 {
        self.bytes_by_channel
            .lock()
            .ok()
            .and_then(|m| m.get(&(dmac, chan)).copied())
            .unwrap_or(0)
    }

    /// Bytes per wall-clock second since creation.
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_bytes_total() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl DmaObserver for TransferMetrics {
    fn on_block_complete(&self, dmac: u32, chan: ChannelId, bytes: u32) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes as u64, Ordering::SeqCst);
        if let Ok(mut m) = self.bytes_by_channel.lock() {
            *m.entry((dmac, chan)).or_insert(0) += bytes as u64;
        }
    }

    fn on_reload(&self, _dmac: u32, _chan: ChannelId, _next: &Descriptor) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn on_transfer_complete(&self, _dmac: u32, _chan: ChannelId, summary: &TransferSummary) {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        if summary.stopped {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_channel() {
        let m = TransferMetrics::new();
        let c2 = ChannelId::new(2).unwrap();
        let c3 = ChannelId::new(3).unwrap();
        m.on_block_complete(0, c2, 256);
        m.on_reload(0, c2, &Descriptor::default());
        m.on_block_complete(0, c2, 64);
        m.on_block_complete(1, c3, 32);
        m.on_transfer_complete(
            0,
            c2,
            &TransferSummary {
                kind: None,
                blocks: 2,
                bursts: 10,
                bytes: 320,
                stopped: true,
                aborted: false,
            },
        );

        assert_eq!(m.get_blocks(), 3);
        assert_eq!(m.get_reloads(), 1);
        assert_eq!(m.get_transfers(), 1);
        assert_eq!(m.get_stopped(), 1);
        assert_eq!(m.get_bytes_total(), 352);
        assert_eq!(m.get_bytes(0, c2), 320);
        assert_eq!(m.get_bytes(1, c3), 32);
        assert_eq!(m.get_bytes(1, c2), 0);

        m.reset();
        assert_eq!(m.get_bytes_total(), 0);
        assert_eq!(m.get_bytes(0, c2), 0);
    }
}
