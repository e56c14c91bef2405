//! GDB Session state machine: handshake, command dispatch, register/memory
//! handlers, breakpoint table, step/continue interlock.

use crate::facade::EmulatorFacade;
use crate::gdb::registers::{decode_all, encode_all, encode_register};
use std::collections::HashSet;

/// Reply payload for the halt-reason / stop-notification frame. `05` is
/// SIGTRAP, the only signal this stub ever reports.
const SIGTRAP_REPLY: &[u8] = b"S05";

/// Reply sent (then the connection closed) when a GDB client attempts to
/// attach while the interactive on-screen debugger holds the floor. The
/// code itself is not meaningful protocol-wise; it is preserved verbatim
/// for compatibility with whatever clients expect.
pub const INTERACTIVE_DEBUGGER_CONFLICT_REPLY: &[u8] = b"E99";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    StoppedPendingReply,
    StoppedIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    None,
    Step,
    Continue,
}

/// Outcome of dispatching one complete frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Send this payload back immediately.
    Reply(Vec<u8>),
    /// No reply yet — a step/continue was set as `pending_action`; the stop
    /// reply will come later from [`GdbSession::report_stop`].
    NoReply,
    /// Send this payload, then close the client connection (`D`etach).
    Detach(Vec<u8>),
}

/// Outcome of an out-of-band `0x03` interrupt byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// The CPU was already stopped (GDB has the floor); reply immediately.
    AlreadyStopped(Vec<u8>),
    /// The CPU is running; a halt was requested and the stop reply will
    /// arrive once the emulator honors it and calls `report_stop`.
    HaltRequested,
}

/// Per-connection GDB RSP session. One instance per accepted client; dropped
/// on disconnect (breakpoints are the emulator's to keep, the session
/// itself never persists across reconnects).
pub struct GdbSession {
    no_ack_mode: bool,
    execution_state: ExecutionState,
    pending_action: PendingAction,
    breakpoints: HashSet<u32>,
    interrupt_requested: bool,
}

impl Default for GdbSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbSession {
    pub fn new() -> Self {
        Self {
            no_ack_mode: false,
            execution_state: ExecutionState::StoppedIdle,
            pending_action: PendingAction::None,
            breakpoints: HashSet::new(),
            interrupt_requested: false,
        }
    }

    pub fn no_ack_mode(&self) -> bool {
        self.no_ack_mode
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution_state
    }

    pub fn breakpoints(&self) -> &HashSet<u32> {
        &self.breakpoints
    }

    /// Dispatch one complete frame payload per the RSP command table. The
    /// CPU is assumed paused for the duration of this call
    /// (true whenever `execution_state != Running`, which is the only time
    /// a frame other than the interrupt token is legal to process).
    pub fn dispatch(&mut self, payload: &[u8], facade: &dyn EmulatorFacade) -> DispatchOutcome {
        let text = String::from_utf8_lossy(payload);
        let text = text.as_ref();

        if text == "?" {
            return DispatchOutcome::Reply(SIGTRAP_REPLY.to_vec());
        }
        if text.starts_with("qSupported") {
            return DispatchOutcome::Reply(
                b"PacketSize=3fff;swbreak+;hwbreak+;vContSupported+;QStartNoAckMode+".to_vec(),
            );
        }
        if text == "QStartNoAckMode" {
            self.no_ack_mode = true;
            return DispatchOutcome::Reply(b"OK".to_vec());
        }
        if text == "qfThreadInfo" {
            return DispatchOutcome::Reply(b"m1".to_vec());
        }
        if text == "qsThreadInfo" {
            return DispatchOutcome::Reply(b"l".to_vec());
        }
        if text == "qAttached" {
            return DispatchOutcome::Reply(b"1".to_vec());
        }
        if text == "qC" {
            return DispatchOutcome::Reply(b"QC0".to_vec());
        }
        if text == "qOffsets" {
            return DispatchOutcome::Reply(b"Text=0;Data=0;Bss=0".to_vec());
        }
        if text.starts_with("qRcmd,") {
            return DispatchOutcome::Reply(Vec::new());
        }
        if text.starts_with('H') {
            return DispatchOutcome::Reply(b"OK".to_vec());
        }
        if text == "g" {
            return DispatchOutcome::Reply(encode_all(facade).into_bytes());
        }
        if let Some(hex_payload) = text.strip_prefix('G') {
            return if decode_all(facade, hex_payload) {
                DispatchOutcome::Reply(b"OK".to_vec())
            } else {
                DispatchOutcome::Reply(b"E01".to_vec())
            };
        }
        if let Some(n) = text.strip_prefix('p') {
            return match u8::from_str_radix(n, 16).ok().and_then(|i| {
                if (i as usize) < crate::facade::REGISTER_COUNT {
                    Some(i)
                } else {
                    None
                }
            }) {
                Some(index) => {
                    DispatchOutcome::Reply(encode_register(facade.get_register(index)).into_bytes())
                }
                None => DispatchOutcome::Reply(b"E01".to_vec()),
            };
        }
        if let Some(rest) = text.strip_prefix('m') {
            return match parse_addr_len(rest) {
                Some((addr, len)) => {
                    let mut out = String::with_capacity(len as usize * 2);
                    for offset in 0..len {
                        out.push_str(&format!("{:02x}", facade.read_byte(addr + offset)));
                    }
                    DispatchOutcome::Reply(out.into_bytes())
                }
                None => DispatchOutcome::Reply(b"E01".to_vec()),
            };
        }
        if let Some(rest) = text.strip_prefix('M') {
            return match parse_write_memory(rest) {
                Some((addr, data)) => {
                    for (i, byte) in data.iter().enumerate() {
                        facade.write_byte(addr + i as u32, *byte);
                    }
                    DispatchOutcome::Reply(b"OK".to_vec())
                }
                None => DispatchOutcome::Reply(b"E01".to_vec()),
            };
        }
        if let Some(rest) = text.strip_prefix("Z0,") {
            return match parse_addr_kind(rest) {
                Some(addr) => {
                    // set_breakpoint's bool distinguishes new-vs-already-set;
                    // either way the breakpoint now exists, so both succeed.
                    facade.set_breakpoint(addr);
                    self.breakpoints.insert(addr);
                    DispatchOutcome::Reply(b"OK".to_vec())
                }
                None => DispatchOutcome::Reply(b"E01".to_vec()),
            };
        }
        if text.starts_with('Z') {
            // Hardware breakpoint/watchpoint kinds (Z1..Z4): out of scope, unsupported.
            return DispatchOutcome::Reply(Vec::new());
        }
        if let Some(rest) = text.strip_prefix("z0,") {
            return match parse_addr_kind(rest) {
                Some(addr) => {
                    facade.remove_breakpoint(addr);
                    self.breakpoints.remove(&addr);
                    DispatchOutcome::Reply(b"OK".to_vec())
                }
                None => DispatchOutcome::Reply(b"E01".to_vec()),
            };
        }
        if text.starts_with('z') {
            return DispatchOutcome::Reply(Vec::new());
        }
        if text == "s" || text == "vCont;s" {
            self.pending_action = PendingAction::Step;
            return DispatchOutcome::NoReply;
        }
        if text == "c" || text == "vCont;c" {
            self.pending_action = PendingAction::Continue;
            return DispatchOutcome::NoReply;
        }
        if text == "vCont?" {
            return DispatchOutcome::Reply(b"vCont;c;s;t".to_vec());
        }
        if text == "D" || text.starts_with("D;") {
            return DispatchOutcome::Detach(b"OK".to_vec());
        }

        DispatchOutcome::Reply(Vec::new())
    }

    /// Handle the out-of-band `0x03` interrupt byte.
    pub fn handle_interrupt(&mut self) -> InterruptOutcome {
        if self.execution_state == ExecutionState::Running {
            self.interrupt_requested = true;
            InterruptOutcome::HaltRequested
        } else {
            InterruptOutcome::AlreadyStopped(SIGTRAP_REPLY.to_vec())
        }
    }

    pub fn interrupt_requested(&self) -> bool {
        self.interrupt_requested
    }

    /// Called by the Debug Poll Loop: if a step/continue is pending, clear
    /// it and transition to RUNNING (invariant 2), returning the action the
    /// emulator must now perform.
    pub fn take_pending_action(&mut self) -> Option<PendingAction> {
        if self.pending_action == PendingAction::None {
            return None;
        }
        let action = self.pending_action;
        self.pending_action = PendingAction::None;
        self.execution_state = ExecutionState::Running;
        Some(action)
    }

    /// Called once the emulator has halted (step completed, breakpoint hit,
    /// or interrupt honored): emits exactly one stop reply and transitions
    /// RUNNING → STOPPED_IDLE (invariant 3).
    pub fn report_stop(&mut self) -> Vec<u8> {
        self.execution_state = ExecutionState::StoppedIdle;
        self.interrupt_requested = false;
        SIGTRAP_REPLY.to_vec()
    }

    /// A client disconnected: cancel any in-flight step/continue and reset
    /// to idle. Breakpoints are left untouched — they live in the
    /// emulator, not the session.
    pub fn reset_on_disconnect(&mut self) {
        self.pending_action = PendingAction::None;
        self.execution_state = ExecutionState::StoppedIdle;
        self.interrupt_requested = false;
    }
}

fn parse_hex_u32(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

fn parse_addr_len(rest: &str) -> Option<(u32, u32)> {
    let (addr, len) = rest.split_once(',')?;
    Some((parse_hex_u32(addr)?, parse_hex_u32(len)?))
}

fn parse_addr_kind(rest: &str) -> Option<u32> {
    let (addr, _kind) = rest.split_once(',')?;
    parse_hex_u32(addr)
}

fn parse_write_memory(rest: &str) -> Option<(u32, Vec<u8>)> {
    let (head, hex_data) = rest.split_once(':')?;
    let (addr, len) = parse_addr_len(head)?;
    let data = hex::decode(hex_data).ok()?;
    if data.len() as u32 != len {
        return None;
    }
    Some((addr, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{SimFacade, REG_CS, REG_EIP};

    #[test]
    fn halt_query_replies_sigtrap() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert_eq!(
            session.dispatch(b"?", &facade),
            DispatchOutcome::Reply(b"S05".to_vec())
        );
    }

    #[test]
    fn no_ack_mode_negotiation() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert!(!session.no_ack_mode());
        assert_eq!(
            session.dispatch(b"QStartNoAckMode", &facade),
            DispatchOutcome::Reply(b"OK".to_vec())
        );
        assert!(session.no_ack_mode());
    }

    #[test]
    fn memory_read_then_write_round_trips() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x1000);
        facade.write_byte(0x400, 0xDE);
        facade.write_byte(0x401, 0xAD);
        facade.write_byte(0x402, 0xBE);
        facade.write_byte(0x403, 0xEF);
        assert_eq!(
            session.dispatch(b"m400,4", &facade),
            DispatchOutcome::Reply(b"efbeadde".to_vec())
        );
        assert_eq!(
            session.dispatch(b"M400,4:00112233", &facade),
            DispatchOutcome::Reply(b"OK".to_vec())
        );
        assert_eq!(
            session.dispatch(b"m400,4", &facade),
            DispatchOutcome::Reply(b"00112233".to_vec())
        );
    }

    #[test]
    fn breakpoint_set_then_remove() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert_eq!(
            session.dispatch(b"Z0,1234,0", &facade),
            DispatchOutcome::Reply(b"OK".to_vec())
        );
        assert!(session.breakpoints().contains(&0x1234));
        assert_eq!(
            session.dispatch(b"z0,1234,0", &facade),
            DispatchOutcome::Reply(b"OK".to_vec())
        );
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn step_sets_pending_action_with_no_immediate_reply() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert_eq!(session.dispatch(b"s", &facade), DispatchOutcome::NoReply);
        assert_eq!(session.take_pending_action(), Some(PendingAction::Step));
        assert_eq!(session.execution_state(), ExecutionState::Running);
        assert_eq!(session.take_pending_action(), None);
    }

    #[test]
    fn step_continue_interlock_emits_exactly_one_stop_reply() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        session.dispatch(b"s", &facade);
        session.take_pending_action();
        assert_eq!(session.report_stop(), b"S05".to_vec());
        assert_eq!(session.execution_state(), ExecutionState::StoppedIdle);

        session.dispatch(b"c", &facade);
        facade.set_register(REG_EIP, 0x1234);
        session.take_pending_action();
        assert_eq!(session.report_stop(), b"S05".to_vec());
        assert_eq!(facade.get_register(REG_EIP), 0x1234);
        assert_eq!(session.execution_state(), ExecutionState::StoppedIdle);
    }

    #[test]
    fn interrupt_while_stopped_replies_immediately() {
        let mut session = GdbSession::new();
        match session.handle_interrupt() {
            InterruptOutcome::AlreadyStopped(reply) => assert_eq!(reply, b"S05".to_vec()),
            InterruptOutcome::HaltRequested => panic!("expected immediate reply"),
        }
    }

    #[test]
    fn interrupt_while_running_requests_halt() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        session.dispatch(b"c", &facade);
        session.take_pending_action();
        assert_eq!(session.handle_interrupt(), InterruptOutcome::HaltRequested);
        assert!(session.interrupt_requested());
        session.report_stop();
        assert!(!session.interrupt_requested());
    }

    #[test]
    fn register_round_trip_via_g_and_capital_g() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        facade.set_register(REG_CS, 0xF000);
        let g = match session.dispatch(b"g", &facade) {
            DispatchOutcome::Reply(bytes) => bytes,
            other => panic!("unexpected {other:?}"),
        };
        let mut payload = Vec::new();
        payload.push(b'G');
        payload.extend_from_slice(&g);
        let other = SimFacade::new(0x10);
        assert_eq!(
            session.dispatch(&payload, &other),
            DispatchOutcome::Reply(b"OK".to_vec())
        );
        assert_eq!(other.get_register(REG_CS), 0xF000);
    }

    #[test]
    fn detach_closes_after_ok() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert_eq!(
            session.dispatch(b"D", &facade),
            DispatchOutcome::Detach(b"OK".to_vec())
        );
    }

    #[test]
    fn unrecognized_command_gets_empty_reply() {
        let mut session = GdbSession::new();
        let facade = SimFacade::new(0x10);
        assert_eq!(
            session.dispatch(b"qSomethingUnknown", &facade),
            DispatchOutcome::Reply(Vec::new())
        );
    }
}
