// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::lock;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Level-triggered interrupt input of a virtual CPU or PCI function.
pub trait IrqSink: Debug + Send + Sync {
    fn set_irq(&self, line: u32, level: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqEdge {
    pub line: u32,
    pub level: bool,
}

#[derive(Debug, Default)]
struct LineState {
    levels: u64,
    edges: VecDeque<IrqEdge>,
}

/// Edges kept by [`InterruptLines::recording`].
pub const DEFAULT_EDGE_LOG: usize = 1024;

/// Interrupt lines of one CPU, all under a single lock that the CPU side
/// also takes when it samples pending interrupts.
#[derive(Debug, Default)]
pub struct InterruptLines {
    state: Mutex<LineState>,
    /// Capacity of the edge log; 0 disables it.
    edge_limit: usize,
}

impl InterruptLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep a log of the most recent level changes.
    pub fn recording() -> Self {
        Self::recording_with(DEFAULT_EDGE_LOG)
    }

    pub fn recording_with(edge_limit: usize) -> Self {
        Self {
            state: Mutex::new(LineState {
                levels: 0,
                edges: VecDeque::with_capacity(edge_limit),
            }),
            edge_limit,
        }
    }

    pub fn is_asserted(&self, line: u32) -> bool {
        line < 64 && lock(&self.state).levels & (1u64 << line) != 0
    }

    /// Bitmask of asserted lines.
    pub fn pending(&self) -> u64 {
        lock(&self.state).levels
    }

    pub fn edges(&self) -> Vec<IrqEdge> {
        lock(&self.state).edges.iter().copied().collect()
    }

    pub fn clear_edges(&self) {
        lock(&self.state).edges.clear();
    }
}

impl IrqSink for InterruptLines {
    fn set_irq(&self, line: u32, level: bool) {
        if line >= 64 {
            tracing::warn!("irq: line {} out of range", line);
            return;
        }
        let mut state = lock(&self.state);
        let bit = 1u64 << line;
        let was = state.levels & bit != 0;
        if level {
            state.levels |= bit;
        } else {
            state.levels &= !bit;
        }
        if self.edge_limit > 0 && was != level {
            if state.edges.len() >= self.edge_limit {
                state.edges.pop_front();
            }
            state.edges.push_back(IrqEdge { line, level });
        }
    }
}

/// Run control of the virtual CPU, driven by the SHIM CSR.
pub trait CpuControl: Debug + Send + Sync {
    /// Put the core in reset and hold it there.
    fn reset(&self);
    /// Release the core from reset/stall.
    fn run(&self);
    fn is_in_reset(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct CpuState {
    in_reset: AtomicBool,
    resets: AtomicU32,
}

impl CpuState {
    pub fn reset_count(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl CpuControl for CpuState {
    fn reset(&self) {
        self.in_reset.store(true, Ordering::SeqCst);
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&self) {
        self.in_reset.store(false, Ordering::SeqCst);
    }

    fn is_in_reset(&self) -> bool {
        self.in_reset.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_and_edges() {
        let lines = InterruptLines::recording();
        lines.set_irq(13, true);
        lines.set_irq(13, true);
        assert!(lines.is_asserted(13));
        assert_eq!(lines.pending(), 1 << 13);
        lines.set_irq(13, false);
        assert!(!lines.is_asserted(13));
        assert_eq!(
            lines.edges(),
            vec![
                IrqEdge {
                    line: 13,
                    level: true
                },
                IrqEdge {
                    line: 13,
                    level: false
                }
            ]
        );
    }

    #[test]
    fn test_edge_log_keeps_newest() {
        let lines = InterruptLines::recording_with(3);
        for _ in 0..3 {
            lines.set_irq(2, true);
            lines.set_irq(2, false);
        }
        lines.set_irq(5, true);
        let edges = lines.edges();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[2], IrqEdge { line: 5, level: true });
        assert_eq!(edges[0], IrqEdge { line: 2, level: true });

        let quiet = InterruptLines::new();
        quiet.set_irq(1, true);
        assert!(quiet.edges().is_empty());
    }

    #[test]
    fn test_out_of_range_line_ignored() {
        let lines = InterruptLines::new();
        lines.set_irq(64, true);
        assert_eq!(lines.pending(), 0);
        assert!(!lines.is_asserted(64));
    }

    #[test]
    fn test_cpu_state() {
        let cpu = CpuState::default();
        cpu.reset();
        assert!(cpu.is_in_reset());
        cpu.run();
        assert!(!cpu.is_in_reset());
        assert_eq!(cpu.reset_count(), 1);
    }
}
