// ABOUTME: Per-task host port allocation
// ABOUTME: Asks the OS for a free port and records it as leased until the owning task stops

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Attempts before giving up when the OS keeps handing back leased ports.
const MAX_ALLOCATION_ATTEMPTS: usize = 32;

/// Process-wide record of ports currently handed to live tasks.
#[derive(Debug, Clone, Default)]
pub struct PortArena {
    leased: Arc<Mutex<HashSet<u16>>>,
}

/// A leased port. Returned to the arena on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    arena: PortArena,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.arena.release(self.port);
    }
}

impl PortArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `127.0.0.1:0`, read the assigned port, close the listener and
    /// lease the port. Ports already leased to another task are skipped.
    pub fn lease(&self) -> std::io::Result<PortLease> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let port = {
                let listener = TcpListener::bind(("127.0.0.1", 0))?;
                listener.local_addr()?.port()
            };

            let mut leased = self
                .leased
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if leased.insert(port) {
                debug!("Leased port {}", port);
                return Ok(PortLease {
                    port,
                    arena: self.clone(),
                });
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "could not obtain an unleased port from the OS",
        ))
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.leased
            .lock()
            .map(|leased| leased.contains(&port))
            .unwrap_or(false)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.lock().map(|leased| leased.len()).unwrap_or(0)
    }

    fn release(&self, port: u16) {
        let mut leased = self
            .leased
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if leased.remove(&port) {
            debug!("Released port {}", port);
        }
    }
}
