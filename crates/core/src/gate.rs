//! Single-slot rendezvous between a server thread and the emulator main
//! thread for operations that must execute there.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Save,
    Load,
    Screenshot,
    Pause,
    Resume,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Idle,
    Pending,
    Complete,
}

struct Slot {
    status: Status,
    kind: Option<RequestKind>,
    argument: Option<String>,
    error_message: String,
}

/// The Async Request Gate. IDLE or COMPLETE whenever no command is in
/// flight; PENDING → COMPLETE is the only transition the consumer makes,
/// never PENDING → IDLE directly.
pub struct AsyncRequestGate {
    slot: Mutex<Slot>,
    condvar: Condvar,
}

impl Default for AsyncRequestGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRequestGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                status: Status::Idle,
                kind: None,
                argument: None,
                error_message: String::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Submit a request. Fails if another request is already PENDING — the
    /// spec requires at most one concurrent heavy operation.
    pub fn submit(&self, kind: RequestKind, argument: Option<String>) -> bool {
        let mut slot = self.slot.lock();
        if slot.status == Status::Pending {
            return false;
        }
        slot.status = Status::Pending;
        slot.kind = Some(kind);
        slot.argument = argument;
        slot.error_message.clear();
        true
    }

    /// Called by the emulator main thread at a safe point: take the
    /// pending request, if any, to execute it.
    pub fn take_pending(&self) -> Option<(RequestKind, Option<String>)> {
        let slot = self.slot.lock();
        if slot.status == Status::Pending {
            Some((slot.kind.unwrap(), slot.argument.clone()))
        } else {
            None
        }
    }

    /// Called by the emulator main thread once it has executed the request
    /// taken via `take_pending`: records the result and transitions
    /// PENDING → COMPLETE.
    pub fn complete(&self, error_message: Option<String>) {
        let mut slot = self.slot.lock();
        slot.status = Status::Complete;
        slot.error_message = error_message.unwrap_or_default();
        drop(slot);
        self.condvar.notify_all();
    }

    /// Producer-side wait: block (with timeout) until COMPLETE, then
    /// transition COMPLETE → IDLE and return the result. On timeout,
    /// returns `Err` describing the timeout without touching the slot (the
    /// underlying request may still complete later; when it does, the next
    /// `await_result` call for a different request will simply find a
    /// stale COMPLETE and reset it, and the abandoned result is ignored).
    pub fn await_result(&self, timeout: Duration) -> Result<(), String> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            match slot.status {
                Status::Complete => {
                    slot.status = Status::Idle;
                    let err = std::mem::take(&mut slot.error_message);
                    return if err.is_empty() { Ok(()) } else { Err(err) };
                }
                Status::Idle => return Err("no request in flight".to_string()),
                Status::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(format!("timed out after {}s", timeout.as_secs()));
                    }
                    let remaining = deadline - now;
                    let result = self.condvar.wait_for(&mut slot, remaining);
                    if result.timed_out() && slot.status == Status::Pending {
                        return Err(format!("timed out after {}s", timeout.as_secs()));
                    }
                }
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.slot.lock().status, Status::Idle)
    }

    /// Force the slot back to IDLE, abandoning any in-flight request. Used
    /// on server `stop`.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.status = Status::Idle;
        slot.kind = None;
        slot.argument = None;
        slot.error_message.clear();
        drop(slot);
        self.condvar.notify_all();
    }
}
