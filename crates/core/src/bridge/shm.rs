// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Shared-memory region registry.
//!
//! Each region is a file under the configured root (normally `/dev/shm`)
//! mapped `MAP_SHARED` in both processes. Both sides register the same id
//! and name; the first one creates the backing file, the second opens it.

use super::{BridgeError, BridgeResult};
use crate::lock;
use adsp_config::RegionSlot;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const MAX_REGIONS: u32 = 128;
pub const PAGE_SIZE: usize = 4096;

const DMAC_REGION_BASE: u32 = 6;
const DMA_CHANNEL_REGION_BASE: u32 = 32;
const CHANNELS_PER_CONTROLLER: u32 = 8;

pub fn slot_id(slot: RegionSlot) -> u32 {
    match slot {
        RegionSlot::Iram => 0,
        RegionSlot::Dram => 1,
        RegionSlot::LpSram => 2,
        RegionSlot::Rom => 3,
        RegionSlot::Shim => 4,
        RegionSlot::Mbox => 5,
    }
}

/// Region holding the register block of controller `dmac`.
pub fn dmac_region(dmac: u32) -> u32 {
    DMAC_REGION_BASE + dmac
}

/// Region holding the in-flight buffer of one DMA channel.
pub fn dma_channel_region(dmac: u32, chan: u32) -> u32 {
    DMA_CHANNEL_REGION_BASE + dmac * CHANNELS_PER_CONTROLLER + chan
}

/// Name of a per-channel buffer; doubles as the worker thread name.
pub fn dma_region_name(dmac: u32, chan: u32) -> String {
    format!("dmac{}.{}", dmac, chan)
}

/// One mapped segment.
#[derive(Debug)]
pub struct SharedRegion {
    id: u32,
    name: String,
    len: usize,
    map: Mutex<MmapMut>,
}

impl SharedRegion {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize, len: usize) -> BridgeResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(BridgeError::OutOfBounds {
                name: self.name.clone(),
                offset,
                len,
            }),
        }
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> BridgeResult<()> {
        self.check(offset, buf.len())?;
        let map = lock(&self.map);
        buf.copy_from_slice(&map[offset..offset + buf.len()]);
        Ok(())
    }

    pub fn write_at(&self, offset: usize, data: &[u8]) -> BridgeResult<()> {
        self.check(offset, data.len())?;
        let mut map = lock(&self.map);
        map[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> BridgeResult<u32> {
        let mut b = [0u8; 4];
        self.read_at(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> BridgeResult<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Fill the whole region with a repeating 32-bit pattern.
    pub fn fill_u32(&self, pattern: u32) {
        let bytes = pattern.to_le_bytes();
        let mut map = lock(&self.map);
        for (i, b) in map.iter_mut().enumerate() {
            *b = bytes[i % 4];
        }
    }

    fn flush_range(&self, offset: usize, len: usize) -> io::Result<()> {
        lock(&self.map).flush_range(offset, len)
    }
}

#[derive(Debug)]
struct ShmEntry {
    region: Arc<SharedRegion>,
    path: PathBuf,
    _file: File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: u64,
    pub freed: u64,
    pub live: usize,
}

/// Process-wide table of mapped regions, owned by a bridge context.
#[derive(Debug)]
pub struct ShmRegistry {
    root: PathBuf,
    prefix: String,
    slots: Mutex<Vec<Option<ShmEntry>>>,
    registered: AtomicU64,
    freed: AtomicU64,
}

impl ShmRegistry {
    pub fn new(root: impl Into<PathBuf>, bridge_name: &str) -> Self {
        Self {
            root: root.into(),
            prefix: format!("adsp-{}", bridge_name),
            slots: Mutex::new((0..MAX_REGIONS).map(|_| None).collect()),
            registered: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing file for a region name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}-{}", self.prefix, name))
    }

    /// Create or open the backing store for `name`, size it to exactly
    /// `size` bytes and map it shared under `id`.
    pub fn register(&self, name: &str, id: u32, size: usize) -> BridgeResult<Arc<SharedRegion>> {
        if id >= MAX_REGIONS {
            return Err(BridgeError::InvalidRegion { id });
        }
        let mut slots = lock(&self.slots);
        if slots[id as usize].is_some() {
            return Err(BridgeError::AlreadyInUse { id });
        }

        let path = self.path_for(name);
        let alloc_err = |source: io::Error| BridgeError::AllocationFailed {
            name: name.to_string(),
            source,
        };
        if size == 0 {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-sized region",
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(alloc_err)?;
        file.set_len(size as u64).map_err(alloc_err)?;
        // Safety: the file stays open for the lifetime of the entry and is
        // only resized through this registry with the same size.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(alloc_err)?;

        let region = Arc::new(SharedRegion {
            id,
            name: name.to_string(),
            len: size,
            map: Mutex::new(map),
        });
        slots[id as usize] = Some(ShmEntry {
            region: region.clone(),
            path,
            _file: file,
        });
        self.registered.fetch_add(1, Ordering::SeqCst);
        debug!("shm: registered region {} '{}' ({} bytes)", id, name, size);
        Ok(region)
    }

    pub fn get(&self, id: u32) -> Option<Arc<SharedRegion>> {
        lock(&self.slots)
            .get(id as usize)
            .and_then(|e| e.as_ref().map(|e| e.region.clone()))
    }

    pub fn is_registered(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Unmap and unlink region `id`. Freeing an unused id is a no-op.
    ///
    /// The mapping itself goes away when the last `Arc<SharedRegion>` drops.
    pub fn free(&self, id: u32) {
        let entry = match lock(&self.slots).get_mut(id as usize) {
            Some(slot) => slot.take(),
            None => None,
        };
        let Some(entry) = entry else {
            debug!("shm: free of unused region {}", id);
            return;
        };
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {}
            // the peer may have unlinked it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("shm: failed to unlink {:?}: {}", entry.path, e),
        }
        self.freed.fetch_add(1, Ordering::SeqCst);
        debug!("shm: freed region {} '{}'", id, entry.region.name());
    }

    /// Flush modified pages in `[offset, offset + len)` so the peer sees them.
    pub fn sync(&self, id: u32, offset: usize, len: usize) -> BridgeResult<()> {
        let region = self.get(id).ok_or(BridgeError::InvalidRegion { id })?;
        let aligned = offset & !(PAGE_SIZE - 1);
        let end = offset.saturating_add(len).min(region.len());
        if aligned >= end {
            return Ok(());
        }
        region
            .flush_range(aligned, end - aligned)
            .map_err(|source| BridgeError::SyncFailed { id, source })
    }

    /// Release everything, best effort.
    pub fn free_all(&self) {
        for id in 0..MAX_REGIONS {
            self.free(id);
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.registered.load(Ordering::SeqCst),
            freed: self.freed.load(Ordering::SeqCst),
            live: lock(&self.slots).iter().filter(|s| s.is_some()).count(),
        }
    }
}
