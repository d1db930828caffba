// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bridge;
pub mod bus;
pub mod dispatch;
pub mod dma;
pub mod interrupt;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod scheduler;
pub mod system;

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Misaligned register access at {0:#x}")]
    Misaligned(u64),
    #[error(transparent)]
    Bridge(#[from] bridge::BridgeError),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Which process a device lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    /// x86 host (parent process).
    Host,
    /// DSP core (child process).
    Dsp,
}

/// Trait representing a memory-mapped peripheral register file.
///
/// Accesses are 32-bit and word-aligned. Devices are shared between the bus
/// thread, the bridge reader and DMA workers, so state sits behind interior
/// locks.
pub trait Peripheral: std::fmt::Debug + Send + Sync {
    fn read(&self, offset: u64) -> SimResult<u32>;
    fn write(&self, offset: u64, value: u32) -> SimResult<()>;
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
