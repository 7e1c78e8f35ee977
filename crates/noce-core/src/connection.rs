//! Connection manager: mount, retrying on a fixed delay until it works.

use std::sync::Arc;
use std::time::Duration;

use crate::remote::Mount;
use crate::shutdown::Shutdown;

/// One per consumer loop; each loop owns the connections it acquires.
pub struct ConnectionManager<M: Mount> {
    mount: Arc<M>,
    retry_delay: Duration,
    shutdown: Shutdown,
}

impl<M: Mount> ConnectionManager<M> {
    pub fn new(mount: Arc<M>, retry_delay: Duration, shutdown: Shutdown) -> Self {
        Self {
            mount,
            retry_delay,
            shutdown,
        }
    }

    /// Block until a mount succeeds. Every failure is logged and followed by
    /// the fixed retry delay. Returns `None` only once shutdown is triggered.
    pub fn acquire(&self) -> Option<M::Conn> {
        let mut attempt = 1u64;
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            match self.mount.mount() {
                Ok(conn) => {
                    tracing::debug!(attempt, "mounted");
                    return Some(conn);
                }
                Err(e) => {
                    tracing::warn!(attempt, "cannot mount: {}", e);
                    if !self.shutdown.sleep(self.retry_delay) {
                        return None;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
