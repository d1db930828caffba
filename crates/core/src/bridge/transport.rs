// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Unidirectional record channels.
//!
//! A bridge owns two of them: the inbound queue it reads and the outbound
//! queue that is the peer's inbound. Sends never block; a full queue is
//! reported to the caller.

use super::{BridgeError, BridgeResult, Role};
use crate::lock;
use nix::errno::Errno;
use nix::mqueue::{
    mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag, MqAttr, MqdT,
};
use nix::sys::stat::Mode;
use std::collections::{HashMap, VecDeque};
use std::ffi::CString;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, warn};

pub trait Channel: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, record: &[u8]) -> BridgeResult<()>;

    /// Block until a record arrives and copy it into `buf`.
    fn recv(&self, buf: &mut [u8]) -> BridgeResult<usize>;

    /// Number of records currently queued.
    fn pending(&self) -> BridgeResult<usize>;

    /// Wake blocked receivers; later operations fail with `Closed`.
    fn close(&self) {}

    /// Remove the queue name from the system.
    fn unlink(&self) {}
}

/// The pair of channels a bridge uses.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub inbound: Arc<dyn Channel>,
    pub outbound: Arc<dyn Channel>,
}

/// Factory for the channels of one bridge name.
pub trait Link: Debug + Send + Sync {
    fn open(&self, name: &str, role: Role) -> BridgeResult<Endpoints>;
}

/// `(parent inbound, child inbound)` queue names.
pub fn queue_names(name: &str) -> (String, String) {
    (format!("/adsp-parent-{}", name), format!("/adsp-child-{}", name))
}

#[derive(Debug, Default)]
struct LocalState {
    records: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Bounded in-process queue with the same limits as the POSIX one.
#[derive(Debug)]
pub struct LocalQueue {
    name: String,
    depth: usize,
    max_size: usize,
    state: Mutex<LocalState>,
    ready: Condvar,
}

impl LocalQueue {
    pub fn new(name: &str, depth: usize, max_size: usize) -> Self {
        Self {
            name: name.to_string(),
            depth,
            max_size,
            state: Mutex::new(LocalState::default()),
            ready: Condvar::new(),
        }
    }
}

impl Channel for LocalQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, record: &[u8]) -> BridgeResult<()> {
        if record.len() > self.max_size {
            return Err(BridgeError::Transport {
                queue: self.name.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "record too large"),
            });
        }
        let mut state = lock(&self.state);
        if state.closed {
            return Err(BridgeError::Closed(self.name.clone()));
        }
        if state.records.len() >= self.depth {
            return Err(BridgeError::QueueFull(self.name.clone()));
        }
        state.records.push_back(record.to_vec());
        self.ready.notify_one();
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        let mut state = lock(&self.state);
        loop {
            if let Some(record) = state.records.pop_front() {
                let n = record.len().min(buf.len());
                buf[..n].copy_from_slice(&record[..n]);
                return Ok(n);
            }
            if state.closed {
                return Err(BridgeError::Closed(self.name.clone()));
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn pending(&self) -> BridgeResult<usize> {
        Ok(lock(&self.state).records.len())
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }
}

/// In-process link, shared by cloning between the two bridges of a test.
#[derive(Debug, Clone)]
pub struct LocalLink {
    depth: usize,
    max_size: usize,
    queues: Arc<Mutex<HashMap<String, Arc<LocalQueue>>>>,
}

impl Default for LocalLink {
    fn default() -> Self {
        Self::new(8, 128)
    }
}

impl LocalLink {
    pub fn new(depth: usize, max_size: usize) -> Self {
        Self {
            depth,
            max_size,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn queue(&self, name: &str) -> Arc<LocalQueue> {
        lock(&self.queues)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalQueue::new(name, self.depth, self.max_size)))
            .clone()
    }
}

impl Link for LocalLink {
    fn open(&self, name: &str, role: Role) -> BridgeResult<Endpoints> {
        let (parent, child) = queue_names(name);
        let parent_q: Arc<dyn Channel> = self.queue(&parent);
        let child_q: Arc<dyn Channel> = self.queue(&child);
        Ok(match role {
            Role::Parent => Endpoints {
                inbound: parent_q,
                outbound: child_q,
            },
            Role::Child => Endpoints {
                inbound: child_q,
                outbound: parent_q,
            },
        })
    }
}

/// POSIX message queue endpoint.
#[derive(Debug)]
pub struct PosixQueue {
    name: String,
    cname: CString,
    mqd: Option<MqdT>,
    writer: bool,
    closed: AtomicBool,
}

fn transport_err(queue: &str, errno: Errno) -> BridgeError {
    BridgeError::Transport {
        queue: queue.to_string(),
        source: io::Error::from(errno),
    }
}

impl PosixQueue {
    /// Open (creating if needed) a queue. Writers are non-blocking.
    pub fn open(name: &str, depth: usize, max_size: usize, writer: bool) -> BridgeResult<Self> {
        let cname = CString::new(name).map_err(|e| BridgeError::Transport {
            queue: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        let flags = if writer {
            MQ_OFlag::O_CREAT | MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK
        } else {
            MQ_OFlag::O_CREAT | MQ_OFlag::O_RDONLY
        };
        let attr = MqAttr::new(0, depth as _, max_size as _, 0);
        let mqd = mq_open(
            cname.as_c_str(),
            flags,
            Mode::from_bits_truncate(0o664),
            Some(&attr),
        )
        .map_err(|e| transport_err(name, e))?;
        debug!("mq: opened {} ({})", name, if writer { "tx" } else { "rx" });
        Ok(Self {
            name: name.to_string(),
            cname,
            mqd: Some(mqd),
            writer,
            closed: AtomicBool::new(false),
        })
    }

    fn mqd(&self) -> BridgeResult<&MqdT> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed(self.name.clone()));
        }
        self.mqd
            .as_ref()
            .ok_or_else(|| BridgeError::Closed(self.name.clone()))
    }

    /// Queue an empty record so a reader blocked in `mq_receive` returns.
    fn wake_reader(&self) {
        let flags = MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK;
        let mqd = match mq_open(self.cname.as_c_str(), flags, Mode::empty(), None) {
            Ok(mqd) => mqd,
            Err(e) => {
                warn!("mq: can't wake reader of {}: {}", self.name, e);
                return;
            }
        };
        match mq_send(&mqd, &[], 0) {
            // a full queue wakes the reader anyway
            Ok(()) | Err(Errno::EAGAIN) => {}
            Err(e) => warn!("mq: can't wake reader of {}: {}", self.name, e),
        }
        if let Err(e) = mq_close(mqd) {
            warn!("mq: failed to close waker of {}: {}", self.name, e);
        }
    }
}

impl Channel for PosixQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, record: &[u8]) -> BridgeResult<()> {
        match mq_send(self.mqd()?, record, 0) {
            Ok(()) => Ok(()),
            Err(Errno::EAGAIN) => Err(BridgeError::QueueFull(self.name.clone())),
            Err(e) => Err(transport_err(&self.name, e)),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        let mut prio = 0u32;
        loop {
            match mq_receive(self.mqd()?, buf, &mut prio) {
                Ok(_) if self.closed.load(Ordering::SeqCst) => {
                    return Err(BridgeError::Closed(self.name.clone()))
                }
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(Errno::EBADF) => return Err(BridgeError::Closed(self.name.clone())),
                Err(e) => return Err(transport_err(&self.name, e)),
            }
        }
    }

    fn pending(&self) -> BridgeResult<usize> {
        let attr = mq_getattr(self.mqd()?).map_err(|e| transport_err(&self.name, e))?;
        Ok(attr.curmsgs().max(0) as usize)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // the outbound queue belongs to the peer's reader
        if !self.writer {
            self.wake_reader();
        }
        debug!("mq: closed {}", self.name);
    }

    fn unlink(&self) {
        match mq_unlink(self.cname.as_c_str()) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => warn!("mq: failed to unlink {}: {}", self.name, e),
        }
    }
}

impl Drop for PosixQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            if let Err(e) = mq_close(mqd) {
                warn!("mq: failed to close {}: {}", self.name, e);
            }
        }
    }
}

/// Link backed by POSIX message queues.
#[derive(Debug, Clone, Copy)]
pub struct PosixLink {
    pub depth: usize,
    pub max_size: usize,
}

impl Link for PosixLink {
    fn open(&self, name: &str, role: Role) -> BridgeResult<Endpoints> {
        let (parent, child) = queue_names(name);
        let (rx, tx) = match role {
            Role::Parent => (parent, child),
            Role::Child => (child, parent),
        };
        Ok(Endpoints {
            inbound: Arc::new(PosixQueue::open(&rx, self.depth, self.max_size, false)?),
            outbound: Arc::new(PosixQueue::open(&tx, self.depth, self.max_size, true)?),
        })
    }
}
