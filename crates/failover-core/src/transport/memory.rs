//! In-process group transport.
//!
//! A `MemoryHub` behaves like one multicast segment: every datagram sent by
//! any member (including the sender) is delivered to every member.

use super::{Result, Transport, TransportError};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

const HUB_CAPACITY: usize = 1024;

/// Shared segment that [`MemoryTransport`]s join.
#[derive(Clone)]
pub struct MemoryHub {
    tx: broadcast::Sender<Vec<u8>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the segment. Only datagrams sent after joining are delivered.
    pub fn join(&self, receive_timeout: Duration) -> MemoryTransport {
        MemoryTransport {
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
            receive_timeout,
            failed: AtomicBool::new(false),
        }
    }

    /// Put raw bytes on the segment, bypassing any codec.
    pub fn inject(&self, data: &[u8]) {
        let _ = self.tx.send(data.to_vec());
    }
}

/// One member of a [`MemoryHub`].
pub struct MemoryTransport {
    tx: broadcast::Sender<Vec<u8>>,
    rx: Mutex<broadcast::Receiver<Vec<u8>>>,
    receive_timeout: Duration,
    failed: AtomicBool,
}

impl MemoryTransport {
    /// Make every later `receive` fail, as a dead socket would.
    pub fn fail_receives(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.tx
            .send(data.to_vec())
            .map(|_| ())
            .map_err(|_| TransportError::Send(io::Error::other("no members on hub")))
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(TransportError::Receive(io::Error::other("transport failed")));
        }

        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(self.receive_timeout, rx.recv()).await {
            Ok(Ok(data)) => Ok(Some(data)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                // Same as datagram loss on a real segment
                debug!("Memory transport lagged, {} datagrams lost", skipped);
                Ok(None)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(TransportError::Receive(
                io::Error::new(io::ErrorKind::BrokenPipe, "hub closed"),
            )),
            Err(_) => Ok(None),
        }
    }
}
