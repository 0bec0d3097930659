// ABOUTME: Host port allocation for sandbox containers
// ABOUTME: Picks unused ports with portpicker and avoids handing out the same port twice

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, SandboxError};

/// Attempts before giving up when portpicker keeps returning ports we already issued
const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Hands out free host ports, one per sandbox
///
/// The port is only known to be free at the instant of the call; nothing
/// holds it until the container binds it.
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a port not previously issued by this allocator
    pub fn allocate(&self) -> Result<u16> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let Some(port) = portpicker::pick_unused_port() else {
                continue;
            };

            let mut issued = self
                .issued
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if issued.insert(port) {
                debug!("Allocated host port {}", port);
                return Ok(port);
            }
            debug!("Port {} is already issued, retrying", port);
        }

        Err(SandboxError::PortExhausted(format!(
            "no unused port after {} attempts",
            MAX_ALLOCATION_ATTEMPTS
        )))
    }

    /// Make a port available for reuse after its sandbox is torn down
    pub fn release(&self, port: u16) {
        let mut issued = self
            .issued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        issued.remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_sequential_allocations_are_distinct() {
        let allocator = PortAllocator::new();
        let mut seen = HashSet::new();

        for _ in 0..32 {
            let port = allocator.allocate().unwrap();
            assert_ne!(port, 0);
            assert!(seen.insert(port), "port {} was handed out twice", port);
        }
    }

    #[test]
    fn test_allocated_port_is_bindable() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate().unwrap();
        assert!(TcpListener::bind(("0.0.0.0", port)).is_ok());
    }

    #[test]
    fn test_release_forgets_port() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate().unwrap();
        allocator.release(port);
        assert!(!allocator.issued.lock().unwrap().contains(&port));
    }
}
