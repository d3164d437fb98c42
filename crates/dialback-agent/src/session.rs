//! PTY-backed shell sessions
//!
//! Each session owns a pseudo-terminal master, the child shell attached to
//! its slave side, and a one-shot done latch. Teardown is idempotent: the
//! latch's compare-and-swap elects exactly one closer, which kills the
//! child and drops the PTY handles. Dropping the master unblocks any
//! reader thread parked in the kernel.

use std::io::Write;
use std::sync::Mutex;

use portable_pty::{Child, MasterPty, PtySize};

use dialback_core::{DoneLatch, SessionError, SessionId};

/// An active shell session on the agent host
pub struct PtySession {
    /// Session ID
    pub id: SessionId,
    /// Process ID of the spawned shell, when known
    pub pid: Option<u32>,
    /// PTY master; kept for resize, dropped on close
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// Writer to the PTY; writes are serialized by this mutex
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Child shell process
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    /// One-shot teardown signal
    pub done: DoneLatch,
}

impl PtySession {
    /// Create a session around freshly spawned PTY handles
    pub fn new(
        id: SessionId,
        master: Box<dyn MasterPty + Send>,
        writer: Box<dyn Write + Send>,
        child: Box<dyn Child + Send + Sync>,
    ) -> Self {
        let pid = child.process_id();
        Self {
            id,
            pid,
            master: Mutex::new(Some(master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            done: DoneLatch::new(),
        }
    }

    /// Write one chunk to the PTY. Writes on the same session are mutually
    /// exclusive; callers on the async side should run this through
    /// `spawn_blocking`.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().expect("writer mutex poisoned");
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::Closed(self.id.to_string()))?;

        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| SessionError::Closed(format!("{}: {}", self.id, e)))
    }

    /// Set the PTY window size
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        let guard = self.master.lock().expect("master mutex poisoned");
        let master = guard
            .as_ref()
            .ok_or_else(|| SessionError::Closed(self.id.to_string()))?;

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))
    }

    /// Current PTY window size as (rows, cols)
    pub fn size(&self) -> Result<(u16, u16), SessionError> {
        let guard = self.master.lock().expect("master mutex poisoned");
        let master = guard
            .as_ref()
            .ok_or_else(|| SessionError::Closed(self.id.to_string()))?;

        let size = master
            .get_size()
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;
        Ok((size.rows, size.cols))
    }

    /// Tear the session down: close the latch, kill and reap the child,
    /// drop the PTY handles. Safe to call from any number of paths; only
    /// the first does the work.
    pub fn close(&self) {
        if !self.done.close() {
            return;
        }

        if let Some(mut child) = self.child.lock().expect("child mutex poisoned").take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        // Dropping the master closes the PTY and wakes a blocked reader.
        self.writer.lock().expect("writer mutex poisoned").take();
        self.master.lock().expect("master mutex poisoned").take();
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.done.is_closed()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}
