//! Debug Poll Loop: the emulator-thread hook, called between instruction
//! ticks, that drains the GDB endpoint, dispatches frames, and surfaces
//! pending step/continue requests back to the caller. Also services the
//! Async Request Gate at the same safe point, since both are "things the
//! emulator main thread does between instructions" — the natural single
//! place to put them.

use crate::facade::{Completion, EmulatorFacade};
use crate::framer::{encode_frame, PacketFramer, ParseEvent};
use crate::gate::{AsyncRequestGate, RequestKind};
use crate::gdb::{DispatchOutcome, GdbSession, InterruptOutcome, PendingAction};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Action the Debug Poll Loop hands back to the embedding emulator: "now
/// advance execution this way."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingExecution {
    Step,
    Continue,
}

/// The non-blocking GDB endpoint: listener plus at most one accepted client,
/// its framer, and its session.
pub struct DebugPollLoop {
    listener: TcpListener,
    client: Option<TcpStream>,
    framer: PacketFramer,
    session: GdbSession,
}

impl DebugPollLoop {
    /// Wrap an already-bound listener (callers construct it via
    /// [`crate::server`]'s socket2 helper and pass it in here) and switch it
    /// to non-blocking mode.
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client: None,
            framer: PacketFramer::new(),
            session: GdbSession::new(),
        })
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// One poll iteration: accept a client if there isn't one, drain the
    /// socket, dispatch any complete frames, and surface a pending
    /// step/continue request if dispatch produced one.
    pub fn poll_once(&mut self, facade: &dyn EmulatorFacade) -> Option<PendingExecution> {
        if self.client.is_none() {
            self.try_accept(facade);
        }

        self.drain_socket()?;
        self.process_frames(facade);

        self.session.take_pending_action().map(|action| match action {
            PendingAction::Step => PendingExecution::Step,
            PendingAction::Continue => PendingExecution::Continue,
        })
    }

    /// Called by the embedding emulator once a [`PendingExecution`] it
    /// received from `poll_once` has finished running (step completed,
    /// breakpoint hit, or interrupt honored). Emits exactly one stop reply.
    pub fn report_stop(&mut self) {
        let reply = self.session.report_stop();
        self.send_frame(&reply);
    }

    fn try_accept(&mut self, facade: &dyn EmulatorFacade) {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                if facade.is_interactive_debugger_active() {
                    reject_with_interactive_conflict(stream);
                    return;
                }
                if stream.set_nonblocking(true).is_err() {
                    return;
                }
                debug!("gdb client connected");
                self.client = Some(stream);
                self.framer = PacketFramer::new();
                self.session = GdbSession::new();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "gdb accept failed"),
        }
    }

    /// Drain all currently-available bytes into the framer. Returns `None`
    /// (propagated by `?` in `poll_once`) if the client was torn down.
    fn drain_socket(&mut self) -> Option<()> {
        let Some(stream) = self.client.as_mut() else {
            return Some(());
        };
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.teardown();
                    return None;
                }
                Ok(n) => self.framer.feed(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.teardown();
                    return None;
                }
            }
        }
        Some(())
    }

    fn process_frames(&mut self, facade: &dyn EmulatorFacade) {
        loop {
            if self.client.is_none() {
                return;
            }
            match self.framer.try_parse() {
                ParseEvent::Incomplete => return,
                ParseEvent::Interrupt => match self.session.handle_interrupt() {
                    InterruptOutcome::AlreadyStopped(reply) => self.send_frame(&reply),
                    InterruptOutcome::HaltRequested => {}
                },
                ParseEvent::BadChecksum => {
                    if !self.session.no_ack_mode() {
                        self.send_ack(false);
                    }
                }
                ParseEvent::Frame(payload) => {
                    if !self.session.no_ack_mode() {
                        self.send_ack(true);
                    }
                    match self.session.dispatch(&payload, facade) {
                        DispatchOutcome::Reply(reply) => self.send_frame(&reply),
                        DispatchOutcome::NoReply => {}
                        DispatchOutcome::Detach(reply) => {
                            self.send_frame(&reply);
                            self.teardown();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn send_ack(&mut self, ok: bool) {
        if let Some(stream) = self.client.as_mut() {
            let byte = if ok { b"+" } else { b"-" };
            if stream.write_all(byte).is_err() {
                self.teardown();
            }
        }
    }

    fn send_frame(&mut self, payload: &[u8]) {
        if let Some(stream) = self.client.as_mut() {
            if stream.write_all(&encode_frame(payload)).is_err() {
                self.teardown();
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(stream) = self.client.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.session.reset_on_disconnect();
        self.framer = PacketFramer::new();
    }
}

fn reject_with_interactive_conflict(mut stream: TcpStream) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.write_all(&encode_frame(crate::gdb::INTERACTIVE_DEBUGGER_CONFLICT_REPLY));
    let _ = stream.shutdown(Shutdown::Both);
}

/// Service at most one pending Async Request Gate entry: the "emulator main
/// thread, at a safe point" consumer side. `SimFacade`'s
/// operations complete synchronously, so this executes the request and
/// marks it COMPLETE in one call; a real emulator embedding this crate
/// would instead do the heavy lifting (actually writing the save file,
/// actually rendering the screenshot) before calling back.
pub fn service_async_requests(gate: &AsyncRequestGate, facade: &dyn EmulatorFacade) {
    let Some((kind, argument)) = gate.take_pending() else {
        return;
    };
    let error = match kind {
        RequestKind::Save => {
            facade.request_save(argument.as_deref().unwrap_or(""));
            wait_until(Duration::from_secs(30), || !facade.is_pending());
            completion_error(facade.is_complete())
        }
        RequestKind::Load => {
            facade.request_load(argument.as_deref().unwrap_or(""));
            wait_until(Duration::from_secs(30), || !facade.is_pending());
            completion_error(facade.is_complete())
        }
        RequestKind::Screenshot => {
            facade.take_screenshot();
            wait_until(Duration::from_secs(5), || !facade.is_screenshot_pending());
            None
        }
        RequestKind::Pause => {
            facade.request_pause();
            wait_until(Duration::from_secs(1), || facade.is_paused());
            None
        }
        RequestKind::Resume => {
            facade.request_resume();
            wait_until(Duration::from_secs(1), || !facade.is_paused());
            None
        }
        RequestKind::Reset => {
            facade.request_reset(argument.as_deref() == Some("dos_only"));
            None
        }
    };
    gate.complete(error);
}

fn completion_error(completion: Completion) -> Option<String> {
    match completion {
        Completion::Pending | Completion::Success => None,
        Completion::Error(message) => Some(message),
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::SimFacade;
    use crate::framer::checksum_of;
    use std::net::TcpStream;

    fn local_listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn accept_then_halt_query_round_trip() {
        let listener = local_listener();
        let addr = listener.local_addr().unwrap();
        let mut poll = DebugPollLoop::new(listener).unwrap();
        let facade = SimFacade::new(0x10);

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();

        // Drive a few iterations for the non-blocking accept to land.
        for _ in 0..50 {
            poll.poll_once(&facade);
            if poll.has_client() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(poll.has_client());

        client.write_all(b"$?#3f").unwrap();
        let mut reply = Vec::new();
        for _ in 0..50 {
            poll.poll_once(&facade);
            let mut buf = [0u8; 64];
            match client.read(&mut buf) {
                Ok(n) if n > 0 => {
                    reply.extend_from_slice(&buf[..n]);
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert_eq!(reply, b"+$S05#b8");
    }

    #[test]
    fn interactive_debugger_conflict_rejects_client() {
        let listener = local_listener();
        let addr = listener.local_addr().unwrap();
        let mut poll = DebugPollLoop::new(listener).unwrap();
        let facade = SimFacade::new(0x10);
        facade.set_interactive_debugger_active(true);

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        for _ in 0..50 {
            poll.poll_once(&facade);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!poll.has_client());

        let mut buf = [0u8; 64];
        let mut reply = Vec::new();
        for _ in 0..20 {
            match client.read(&mut buf) {
                Ok(n) if n > 0 => {
                    reply.extend_from_slice(&buf[..n]);
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        let expected_cksum = checksum_of(b"E99");
        assert_eq!(reply, format!("$E99#{expected_cksum:02x}").into_bytes());
    }

    #[test]
    fn gate_screenshot_request_completes_via_poll() {
        let gate = AsyncRequestGate::new();
        let facade = SimFacade::new(0x10);
        gate.submit(RequestKind::Screenshot, None);

        let render = {
            let facade = facade.clone();
            std::thread::spawn(move || {
                while !facade.is_screenshot_pending() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                facade.complete_screenshot("/tmp/shot.png");
            })
        };
        service_async_requests(&gate, &facade);
        render.join().unwrap();
        assert!(gate.await_result(Duration::from_millis(100)).is_ok());
    }
}
