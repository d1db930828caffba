// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Validation failures of board descriptors and run configs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown board '{name}', expected one of: {known}")]
    UnknownBoard { name: String, known: String },
    #[error("board '{board}' has duplicate DMA controller ids")]
    DuplicateDmac { board: String },
    #[error("board '{board}': DMA controller id {id} exceeds limit {limit}")]
    DmacIdOutOfRange { board: String, id: u32, limit: u32 },
    #[error("bridge.queue_depth must be non-zero")]
    ZeroQueueDepth,
    #[error("bridge.max_msg_size {size} is below the largest record ({min} bytes)")]
    MessageSizeTooSmall { size: usize, min: usize },
    #[error("dma.mem_burst_bytes must be non-zero")]
    ZeroBurst,
}

const SCHEMA_VERSION: &str = "1.0";

fn check_schema(kind: &str, version: &str) {
    if version != SCHEMA_VERSION {
        tracing::warn!(
            "{} schema version '{}' differs from supported '{}'",
            kind,
            version,
            SCHEMA_VERSION
        );
    }
}

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[serde(alias = "byt")]
    Baytrail,
    #[serde(alias = "cht")]
    Cherrytrail,
    #[serde(alias = "hsw")]
    Haswell,
    #[serde(alias = "bdw")]
    Broadwell,
    #[serde(alias = "bxt", alias = "apl")]
    Broxton,
}

/// Architecturally fixed shared-memory slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionSlot {
    Iram,
    Dram,
    LpSram,
    Rom,
    Shim,
    Mbox,
}

impl RegionSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionSlot::Iram => "iram",
            RegionSlot::Dram => "dram",
            RegionSlot::LpSram => "lp-sram",
            RegionSlot::Rom => "rom",
            RegionSlot::Shim => "shim",
            RegionSlot::Mbox => "mbox",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "1MiB"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRegionConfig {
    pub name: String,
    pub slot: RegionSlot,
    pub base: u64,
    pub size: String,
    /// 32-bit poison pattern written at init.
    #[serde(default)]
    pub fill: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceWindow {
    pub name: String,
    pub base: u64,
    pub size: String,
    #[serde(default)]
    pub irq: Option<u32>,
}

fn default_dmac_size() -> String {
    "4KiB".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DmacConfig {
    pub id: u32,
    pub base: u64,
    #[serde(default = "default_dmac_size")]
    pub size: String,
    pub irq: u32,
    /// Back the register block with a shared region instead of local storage.
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DspLayout {
    pub memories: Vec<MemoryRegionConfig>,
    pub shim: DeviceWindow,
    #[serde(default)]
    pub mailbox: Option<DeviceWindow>,
    pub ipc_irq: u32,
    #[serde(default)]
    pub dmacs: Vec<DmacConfig>,
    #[serde(default)]
    pub ssps: Vec<DeviceWindow>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct HostWindow {
    pub slot: RegionSlot,
    pub base: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostLayout {
    pub pci_base: u64,
    pub mmio_base: u64,
    #[serde(default)]
    pub pci_irq: u32,
    pub ram: MemoryRange,
    #[serde(default)]
    pub windows: Vec<HostWindow>,
    #[serde(default)]
    pub dmacs: Vec<DmacConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub family: Family,
    pub dsp: DspLayout,
    pub host: HostLayout,
}

const BUILTIN_BOARDS: &[(&str, &str)] = &[
    ("byt", include_str!("../boards/byt.yaml")),
    ("cht", include_str!("../boards/cht.yaml")),
    ("hsw", include_str!("../boards/hsw.yaml")),
    ("bdw", include_str!("../boards/bdw.yaml")),
    ("bxt", include_str!("../boards/bxt.yaml")),
];

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read board descriptor {:?}", path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to load board descriptor {:?}", path))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let board: Self =
            serde_yaml::from_str(content).context("Failed to parse Board Descriptor YAML")?;
        board.validate()?;
        check_schema("board", &board.schema_version);
        tracing::debug!(
            "Loaded board '{}' ({:?}): {} DSP memories, {} DMA controllers",
            board.name,
            board.family,
            board.dsp.memories.len(),
            board.dsp.dmacs.len() + board.host.dmacs.len()
        );
        Ok(board)
    }

    /// Look up one of the boards shipped with the crate.
    pub fn builtin(name: &str) -> Result<Self> {
        let (_, yaml) = BUILTIN_BOARDS
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| ConfigError::UnknownBoard {
                name: name.to_string(),
                known: Self::builtin_names().join(", "),
            })?;
        Self::from_yaml_str(yaml).with_context(|| format!("Built-in board '{}' is invalid", name))
    }

    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN_BOARDS.iter().map(|(n, _)| *n).collect()
    }

    fn validate(&self) -> Result<()> {
        for mem in &self.dsp.memories {
            parse_size(&mem.size).with_context(|| format!("memory '{}'", mem.name))?;
        }
        let mut ids: Vec<u32> = self
            .dsp
            .dmacs
            .iter()
            .chain(self.host.dmacs.iter())
            .map(|d| d.id)
            .collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::DuplicateDmac {
                board: self.name.clone(),
            }
            .into());
        }
        if let Some(id) = ids.iter().find(|id| **id >= MAX_DMA_CONTROLLERS) {
            return Err(ConfigError::DmacIdOutOfRange {
                board: self.name.clone(),
                id: *id,
                limit: MAX_DMA_CONTROLLERS,
            }
            .into());
        }
        parse_size(&self.host.ram.size).context("host ram")?;
        Ok(())
    }

    pub fn dsp_memory(&self, slot: RegionSlot) -> Option<&MemoryRegionConfig> {
        self.dsp.memories.iter().find(|m| m.slot == slot)
    }
}

/// Limit on controller ids shared by both sides of a board.
pub const MAX_DMA_CONTROLLERS: u32 = 12;

fn default_bridge_name() -> String {
    "byt".to_string()
}

fn default_queue_depth() -> usize {
    8
}

fn default_max_msg_size() -> usize {
    128
}

fn default_shm_root() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_name")]
    pub name: String,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,
    #[serde(default = "default_shm_root")]
    pub shm_root: PathBuf,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            queue_depth: default_queue_depth(),
            max_msg_size: default_max_msg_size(),
            shm_root: default_shm_root(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

fn default_mem_burst_bytes() -> u32 {
    32
}

fn default_mem_interval_us() -> u64 {
    200
}

fn default_periph_interval_us() -> u64 {
    6667
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DmaTiming {
    #[serde(default = "default_mem_burst_bytes")]
    pub mem_burst_bytes: u32,
    #[serde(default = "default_mem_interval_us")]
    pub mem_interval_us: u64,
    #[serde(default = "default_periph_interval_us")]
    pub periph_interval_us: u64,
    /// Directory for per-channel and per-port data dumps.
    #[serde(default)]
    pub capture_dir: Option<PathBuf>,
}

impl Default for DmaTiming {
    fn default() -> Self {
        Self {
            mem_burst_bytes: default_mem_burst_bytes(),
            mem_interval_us: default_mem_interval_us(),
            periph_interval_us: default_periph_interval_us(),
            capture_dir: None,
        }
    }
}

impl DmaTiming {
    pub fn mem_interval(&self) -> Duration {
        Duration::from_micros(self.mem_interval_us)
    }

    pub fn periph_interval(&self) -> Duration {
        Duration::from_micros(self.periph_interval_us)
    }
}

/// Runtime settings file, all sections optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub board: Option<String>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub dma: DmaTiming,
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("Failed to open run config {:?}", path.as_ref()))?;
        let cfg: Self = serde_yaml::from_reader(f).context("Failed to parse Run Config")?;
        cfg.validate()?;
        check_schema("run config", &cfg.schema_version);
        tracing::debug!("Loaded run config {:?}", path.as_ref());
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.bridge.max_msg_size < MAX_MSG_SIZE {
            return Err(ConfigError::MessageSizeTooSmall {
                size: self.bridge.max_msg_size,
                min: MAX_MSG_SIZE,
            });
        }
        if self.dma.mem_burst_bytes == 0 {
            return Err(ConfigError::ZeroBurst);
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            board: None,
            bridge: BridgeConfig::default(),
            dma: DmaTiming::default(),
        }
    }
}

/// Largest event record on the wire; queues must accept at least this.
pub const MAX_MSG_SIZE: usize = 56;

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("80KiB").unwrap(), 0x14000);
        assert_eq!(parse_size("2MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("256B").unwrap(), 0x100);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_all_builtin_boards_parse() {
        for name in BoardDescriptor::builtin_names() {
            let board = BoardDescriptor::builtin(name).unwrap();
            assert_eq!(board.name, name);
            assert!(!board.dsp.memories.is_empty());
        }
    }

    #[test]
    fn test_baytrail_layout() {
        let board = BoardDescriptor::builtin("byt").unwrap();
        assert_eq!(board.family, Family::Baytrail);
        let iram = board.dsp_memory(RegionSlot::Iram).unwrap();
        assert_eq!(iram.base, 0xFF2C_0000);
        assert_eq!(parse_size(&iram.size).unwrap(), 0x14000);
        let dram = board.dsp_memory(RegionSlot::Dram).unwrap();
        assert_eq!(parse_size(&dram.size).unwrap(), 0x28000);
        assert_eq!(board.dsp.shim.base, 0xFF34_0000);
        assert_eq!(board.dsp.dmacs.len(), 2);
        assert_eq!(board.dsp.dmacs[1].base, 0xFF29_C000);
        assert_eq!(board.dsp.ssps.len(), 3);
        assert_eq!(board.host.pci_base, 0xF120_0000);
    }

    #[test]
    fn test_unknown_board() {
        let err = BoardDescriptor::builtin("skl").unwrap_err();
        assert!(err.to_string().contains("byt"));
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownBoard { .. })
        ));
    }

    #[test]
    fn test_duplicate_dmac_ids_rejected() {
        let yaml = include_str!("../boards/byt.yaml").replace("id: 1,", "id: 0,");
        let err = BoardDescriptor::from_yaml_str(&yaml).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateDmac {
                board: "byt".to_string()
            })
        );
    }

    #[test]
    fn test_run_config_validation_errors() {
        let mut cfg = RunConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        cfg.bridge.max_msg_size = 16;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MessageSizeTooSmall {
                size: 16,
                min: MAX_MSG_SIZE
            })
        );
        cfg.bridge.queue_depth = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroQueueDepth));
    }

    #[test]
    fn test_run_config_defaults() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.schema_version, "1.0");
        assert_eq!(cfg.bridge.queue_depth, 8);
        assert_eq!(cfg.bridge.max_msg_size, 128);
        assert_eq!(cfg.dma.mem_burst_bytes, 32);
        assert_eq!(cfg.dma.mem_interval(), Duration::from_micros(200));
        assert_eq!(cfg.bridge.handshake_timeout(), Duration::from_secs(2));
    }
}
