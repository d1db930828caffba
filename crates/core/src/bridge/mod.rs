// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Inter-process hardware bridge.
//!
//! A [`Bridge`] is the explicit context object for one parent/child pairing:
//! it owns the role, the sequence counter, the two record channels and the
//! shared-memory registry. Several independent bridges can coexist in one
//! process.

pub mod message;
pub mod shm;
pub mod transport;

pub use message::{DecodeError, DmaDirection, DmaMessage, DmaOp, Event, Message, RegAccess, RegOp};
pub use shm::{SharedRegion, ShmRegistry};
pub use transport::{Channel, Endpoints, Link, LocalLink, PosixLink};

use adsp_config::BridgeConfig;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge role already set to {0:?}")]
    RoleConflict(Role),
    #[error("bridge has not been registered")]
    NotRegistered,
    #[error("region {id} is already in use")]
    AlreadyInUse { id: u32 },
    #[error("region {id} is out of range or not mapped")]
    InvalidRegion { id: u32 },
    #[error("failed to allocate region '{name}': {source}")]
    AllocationFailed { name: String, source: io::Error },
    #[error("access of {len} bytes at {offset:#x} is outside region '{name}'")]
    OutOfBounds {
        name: String,
        offset: usize,
        len: usize,
    },
    #[error("failed to sync region {id}: {source}")]
    SyncFailed { id: u32, source: io::Error },
    #[error("queue {0} is full")]
    QueueFull(String),
    #[error("queue {0} is closed")]
    Closed(String),
    #[error("transport error on {queue}: {source}")]
    Transport { queue: String, source: io::Error },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// x86 host side.
    Parent,
    /// DSP side.
    Child,
}

/// Receives every inbound record of a bridge, in order.
pub trait BridgeHandler: Send + Sync {
    fn handle(&self, bridge: &Bridge, event: Event);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
    pub dropped: u64,
    pub stale: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    stale: AtomicU64,
}

pub struct Bridge {
    config: BridgeConfig,
    link: Arc<dyn Link>,
    role: OnceLock<Role>,
    endpoints: OnceLock<Endpoints>,
    handler: OnceLock<Arc<dyn BridgeHandler>>,
    next_id: AtomicU32,
    regions: Arc<ShmRegistry>,
    counters: Counters,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.config.name)
            .field("role", &self.role.get())
            .finish()
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig, link: Arc<dyn Link>) -> Self {
        let regions = Arc::new(ShmRegistry::new(&config.shm_root, &config.name));
        Self {
            config,
            link,
            role: OnceLock::new(),
            endpoints: OnceLock::new(),
            handler: OnceLock::new(),
            next_id: AtomicU32::new(0),
            regions,
            counters: Counters::default(),
        }
    }

    /// Bridge over POSIX message queues sized from `config`.
    pub fn posix(config: BridgeConfig) -> Self {
        let link = PosixLink {
            depth: config.queue_depth,
            max_size: config.max_msg_size,
        };
        Self::new(config, Arc::new(link))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn role(&self) -> Option<Role> {
        self.role.get().copied()
    }

    pub fn regions(&self) -> &Arc<ShmRegistry> {
        &self.regions
    }

    /// Adopt `role`, open the channels and install the inbound handler.
    /// A bridge takes exactly one role for its lifetime.
    pub fn register(&self, role: Role, handler: Arc<dyn BridgeHandler>) -> BridgeResult<()> {
        if let Some(existing) = self.role() {
            return Err(BridgeError::RoleConflict(existing));
        }
        let endpoints = self.link.open(&self.config.name, role)?;
        if self.role.set(role).is_err() {
            return Err(BridgeError::RoleConflict(self.role().unwrap_or(role)));
        }
        let _ = self.endpoints.set(endpoints);
        let _ = self.handler.set(handler);
        info!("bridge {}: registered as {:?}", self.config.name, role);
        Ok(())
    }

    fn endpoints(&self) -> BridgeResult<&Endpoints> {
        self.endpoints.get().ok_or(BridgeError::NotRegistered)
    }

    /// Stamp `msg` with the next sequence id and queue it for the peer.
    /// There is no retry; the caller decides what a failure means.
    pub fn send(&self, msg: &Message) -> BridgeResult<u32> {
        let endpoints = self.endpoints()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = message::encode(id, msg);
        match endpoints.outbound.send(&record) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                trace!("bridge {}: tx id {} {:?}", self.config.name, id, msg);
                Ok(id)
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Discard whatever a previous session left in our inbound queue.
    pub fn flush_stale(&self) -> BridgeResult<usize> {
        let inbound = &self.endpoints()?.inbound;
        let mut buf = vec![0u8; self.config.max_msg_size];
        let mut flushed = 0;
        while inbound.pending()? > 0 {
            let n = inbound.recv(&mut buf)?;
            match message::decode(&buf[..n]) {
                Ok(ev) => warn!(
                    "bridge {}: flushing stale record id {} {:?}",
                    self.config.name, ev.id, ev.message
                ),
                Err(e) => warn!(
                    "bridge {}: flushing stale undecodable record ({} bytes): {}",
                    self.config.name, n, e
                ),
            }
            flushed += 1;
        }
        self.counters
            .stale
            .fetch_add(flushed as u64, Ordering::Relaxed);
        Ok(flushed)
    }

    /// Dispatch every record already queued, on the calling thread.
    pub fn pump(&self) -> BridgeResult<usize> {
        let inbound = self.endpoints()?.inbound.clone();
        let mut buf = vec![0u8; self.config.max_msg_size];
        let mut handled = 0;
        while inbound.pending()? > 0 {
            let n = inbound.recv(&mut buf)?;
            self.dispatch(&buf[..n]);
            handled += 1;
        }
        Ok(handled)
    }

    /// Flush stale records, then dispatch inbound records on a dedicated
    /// thread until the channel closes.
    pub fn start_reader(self: &Arc<Self>) -> BridgeResult<JoinHandle<()>> {
        let flushed = self.flush_stale()?;
        if flushed > 0 {
            info!("bridge {}: flushed {} stale records", self.config.name, flushed);
        }
        let inbound = self.endpoints()?.inbound.clone();
        let queue = inbound.name().to_string();
        let bridge = self.clone();
        std::thread::Builder::new()
            .name(format!("io-bridge-{}", self.config.name))
            .spawn(move || {
                let mut buf = vec![0u8; bridge.config.max_msg_size];
                loop {
                    match inbound.recv(&mut buf) {
                        Ok(n) => bridge.dispatch(&buf[..n]),
                        Err(BridgeError::Closed(_)) => {
                            debug!("bridge {}: reader closed", bridge.config.name);
                            break;
                        }
                        Err(e) => {
                            error!("bridge {}: receive failed: {}", bridge.config.name, e);
                            break;
                        }
                    }
                }
            })
            .map_err(|source| BridgeError::Transport { queue, source })
    }

    fn dispatch(&self, record: &[u8]) {
        let event = match message::decode(record) {
            Ok(ev) => ev,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("bridge {}: dropping record: {}", self.config.name, e);
                return;
            }
        };
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        trace!("bridge {}: rx id {} {:?}", self.config.name, event.id, event.message);
        match self.handler.get() {
            Some(handler) => handler.handle(self, event),
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("bridge {}: no handler for record {}", self.config.name, event.id);
            }
        }
    }

    /// Best-effort teardown: free every region and remove both queues.
    pub fn close(&self) {
        self.regions.free_all();
        if let Some(ep) = self.endpoints.get() {
            ep.inbound.close();
            ep.outbound.close();
            ep.inbound.unlink();
            ep.outbound.unlink();
        }
        info!("bridge {}: closed", self.config.name);
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl BridgeHandler for Recorder {
        fn handle(&self, _bridge: &Bridge, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn pair(dir: &tempfile::TempDir) -> (Bridge, Bridge, LocalLink) {
        let link = LocalLink::default();
        let config = BridgeConfig {
            name: "t".to_string(),
            shm_root: dir.path().to_path_buf(),
            ..BridgeConfig::default()
        };
        (
            Bridge::new(config.clone(), Arc::new(link.clone())),
            Bridge::new(config, Arc::new(link.clone())),
            link,
        )
    }

    #[test]
    fn test_role_set_once() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, _child, _) = pair(&dir);
        parent
            .register(Role::Parent, Arc::new(Recorder::default()))
            .unwrap();
        let err = parent
            .register(Role::Child, Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RoleConflict(Role::Parent)));
    }

    #[test]
    fn test_send_before_register_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, _, _) = pair(&dir);
        assert!(matches!(
            parent.send(&Message::Irq { irq: 0 }),
            Err(BridgeError::NotRegistered)
        ));
    }

    #[test]
    fn test_ids_increase_and_order_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, child, _) = pair(&dir);
        let rec = Arc::new(Recorder::default());
        parent.register(Role::Parent, rec.clone()).unwrap();
        child
            .register(Role::Child, Arc::new(Recorder::default()))
            .unwrap();

        for irq in 0..3 {
            child.send(&Message::Irq { irq }).unwrap();
        }
        assert_eq!(parent.pump().unwrap(), 3);

        let events = rec.events.lock().unwrap();
        let ids: Vec<u32> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(events[2].message, Message::Irq { irq: 2 });
    }

    #[test]
    fn test_full_queue_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (_parent, child, _) = pair(&dir);
        child
            .register(Role::Child, Arc::new(Recorder::default()))
            .unwrap();
        for _ in 0..8 {
            child.send(&Message::Pm { state: 1 }).unwrap();
        }
        assert!(matches!(
            child.send(&Message::Pm { state: 1 }),
            Err(BridgeError::QueueFull(_))
        ));
        assert_eq!(child.stats().sent, 8);
        assert_eq!(child.stats().send_failures, 1);
    }

    #[test]
    fn test_stale_records_are_flushed_not_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, _child, link) = pair(&dir);

        // left over from an earlier session
        let old = link.open("t", Role::Child).unwrap();
        old.outbound
            .send(&message::encode(99, &Message::Irq { irq: 0 }))
            .unwrap();
        old.outbound.send(&[0xFF; 8]).unwrap();

        let rec = Arc::new(Recorder::default());
        parent.register(Role::Parent, rec.clone()).unwrap();
        assert_eq!(parent.flush_stale().unwrap(), 2);
        assert_eq!(parent.pump().unwrap(), 0);
        assert!(rec.events.lock().unwrap().is_empty());
        assert_eq!(parent.stats().stale, 2);
    }

    #[test]
    fn test_undecodable_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, _child, link) = pair(&dir);
        let rec = Arc::new(Recorder::default());
        parent.register(Role::Parent, rec.clone()).unwrap();

        let mut bad = message::encode(1, &Message::Irq { irq: 0 });
        bad[4] = 0x42;
        let peer = link.open("t", Role::Child).unwrap();
        peer.outbound.send(&bad).unwrap();
        peer.outbound
            .send(&message::encode(2, &Message::Irq { irq: 1 }))
            .unwrap();

        assert_eq!(parent.pump().unwrap(), 2);
        assert_eq!(rec.events.lock().unwrap().len(), 1);
        assert_eq!(parent.stats().dropped, 1);
    }

    #[test]
    fn test_reader_thread_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, child, _) = pair(&dir);
        let parent = Arc::new(parent);
        let rec = Arc::new(Recorder::default());
        parent.register(Role::Parent, rec.clone()).unwrap();
        child
            .register(Role::Child, Arc::new(Recorder::default()))
            .unwrap();

        let reader = parent.start_reader().unwrap();
        child.send(&Message::Irq { irq: 4 }).unwrap();
        for _ in 0..200 {
            if !rec.events.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        parent.close();
        reader.join().unwrap();
        assert_eq!(rec.events.lock().unwrap()[0].message, Message::Irq { irq: 4 });
    }

    #[test]
    fn test_close_stops_posix_reader() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            name: format!("close-{}", std::process::id()),
            shm_root: dir.path().to_path_buf(),
            ..BridgeConfig::default()
        };
        let bridge = Arc::new(Bridge::posix(config));
        if let Err(e) = bridge.register(Role::Parent, Arc::new(Recorder::default())) {
            eprintln!("skipping, no POSIX queues: {}", e);
            return;
        }
        let reader = bridge.start_reader().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        bridge.close();
        reader.join().unwrap();
        assert_eq!(bridge.stats().received, 0);
    }
}
