use adsp_config::{BoardDescriptor, Family, RegionSlot, RunConfig};
use std::io::Write;

#[test]
fn test_board_file_round_trip_through_disk() {
    let yaml = r#"
name: "custom"
family: byt
dsp:
  memories:
    - { name: "iram", slot: iram, base: 0xFF2C0000, size: "80KiB" }
  shim: { name: "shim", base: 0xFF340000, size: "4KiB" }
  ipc_irq: 10
host:
  pci_base: 0xF1200000
  mmio_base: 0xF1400000
  ram: { base: 0x10000000, size: "64KiB" }
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let board = BoardDescriptor::from_file(file.path()).unwrap();
    assert_eq!(board.name, "custom");
    assert_eq!(board.family, Family::Baytrail);
    assert_eq!(board.schema_version, "1.0");
    assert!(board.dsp.mailbox.is_none());
    assert!(board.dsp.dmacs.is_empty());
    assert_eq!(board.dsp.memories[0].slot, RegionSlot::Iram);
    assert!(board.dsp.memories[0].fill.is_none());
}

#[test]
fn test_bad_size_is_reported() {
    let yaml = include_str!("../boards/byt.yaml").replace("\"80KiB\"", "\"eighty\"");
    let err = BoardDescriptor::from_yaml_str(&yaml).unwrap_err();
    assert!(format!("{:#}", err).contains("iram"));
}

#[test]
fn test_run_config_partial_file() {
    let yaml = r#"
board: "bxt"
bridge:
  name: "bxt"
  shm_root: "/tmp/adsp"
dma:
  mem_burst_bytes: 64
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let cfg = RunConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.board.as_deref(), Some("bxt"));
    assert_eq!(cfg.bridge.queue_depth, 8);
    assert_eq!(cfg.bridge.shm_root.to_str(), Some("/tmp/adsp"));
    assert_eq!(cfg.dma.mem_burst_bytes, 64);
    assert_eq!(cfg.dma.periph_interval_us, 6667);
}

#[test]
fn test_run_config_rejects_small_messages() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"bridge:\n  max_msg_size: 16\n").unwrap();
    assert!(RunConfig::from_file(file.path()).is_err());
}

#[test]
fn test_broxton_uses_l2_sram_slot() {
    let board = BoardDescriptor::builtin("bxt").unwrap();
    let sram = board.dsp_memory(RegionSlot::Dram).unwrap();
    assert_eq!(sram.name, "l2-sram");
    assert!(board.dsp_memory(RegionSlot::Iram).is_none());
    assert!(board.dsp_memory(RegionSlot::LpSram).is_some());
}
