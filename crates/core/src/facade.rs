//! The Emulator Facade: the narrow interface the two servers use to reach
//! the CPU, memory, devices, and control surfaces of the host emulator. The
//! real implementation (CPU interpreter, VGA/keyboard/mouse devices,
//! screenshot subsystem, save-state machinery) is an external collaborator
//! outside this crate's scope; this module defines only the trait boundary
//! plus a [`SimFacade`] test double used by the standalone binary, the CLI,
//! and the integration tests.

use emudbg_common::keycodes::KeyId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Register order matching GDB's `i386` target description.
pub const REGISTER_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "eflags",
    "cs", "ss", "ds", "es", "fs", "gs",
];

pub const REG_EAX: u8 = 0;
pub const REG_ECX: u8 = 1;
pub const REG_EDX: u8 = 2;
pub const REG_EBX: u8 = 3;
pub const REG_ESP: u8 = 4;
pub const REG_EBP: u8 = 5;
pub const REG_ESI: u8 = 6;
pub const REG_EDI: u8 = 7;
pub const REG_EIP: u8 = 8;
pub const REG_EFLAGS: u8 = 9;
pub const REG_CS: u8 = 10;
pub const REG_SS: u8 = 11;
pub const REG_DS: u8 = 12;
pub const REG_ES: u8 = 13;
pub const REG_FS: u8 = 14;
pub const REG_GS: u8 = 15;

/// Number of general/segment registers the `g`/`G` bulk commands transfer.
pub const REGISTER_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Result of polling an in-flight save/load request.
pub enum Completion {
    Pending,
    Success,
    Error(String),
}

/// Narrow interface the GDB and QMP sessions use to reach the emulator.
///
/// All calls are marshalled to the emulator thread where the real
/// implementation requires it; from the trait's point of view every method
/// is safe to call from any thread.
pub trait EmulatorFacade: Send + Sync {
    // -- registers --
    fn get_register(&self, index: u8) -> u32;
    fn set_register(&self, index: u8, value: u32);

    // -- memory --
    fn read_byte(&self, linear: u32) -> u8;
    fn write_byte(&self, linear: u32, value: u8);
    /// Write `size` bytes starting at `addr` directly to `path`. Returns
    /// `false` on failure.
    fn save_memory_bin(&self, path: &str, addr: u32, size: u32) -> bool;

    // -- breakpoints --
    fn set_breakpoint(&self, linear: u32) -> bool;
    fn remove_breakpoint(&self, linear: u32) -> bool;

    // -- keyboard --
    fn add_key(&self, key: KeyId, down: bool);

    // -- mouse --
    fn button_pressed(&self, button: MouseButton);
    fn button_released(&self, button: MouseButton);
    fn cursor_moved(&self, dx: i32, dy: i32, rel: bool);

    // -- screenshot --
    fn take_screenshot(&self);
    fn is_screenshot_pending(&self) -> bool;
    fn get_last_screenshot_path(&self) -> String;
    fn clear_last_screenshot_path(&self);

    // -- save/load --
    fn request_save(&self, path: &str);
    fn request_load(&self, path: &str);
    fn is_pending(&self) -> bool;
    /// `Pending` until the emulator thread finishes the request, then
    /// `Success` or `Error(message)` exactly once.
    fn is_complete(&self) -> Completion;

    // -- emulator control --
    fn is_paused(&self) -> bool;
    fn request_pause(&self);
    fn request_resume(&self);
    fn request_reset(&self, dos_only: bool);

    // -- diagnostic --
    fn is_interactive_debugger_active(&self) -> bool;
}

/// In-memory stand-in for the emulator, used by the standalone binary, the
/// CLI's manual testing flows, and the integration tests. Mirrors the shape
/// of `infrasim-daemon::state::StateManager`: an owned, `Clone`-able handle
/// around `Arc`-wrapped shared state rather than a global.
#[derive(Clone)]
pub struct SimFacade {
    inner: Arc<SimState>,
}

struct SimState {
    registers: [AtomicU32; REGISTER_COUNT],
    memory: Mutex<Vec<u8>>,
    breakpoints: Mutex<HashSet<u32>>,
    paused: AtomicBool,
    interactive_debugger_active: AtomicBool,
    screenshot_pending: AtomicBool,
    last_screenshot_path: Mutex<String>,
    save_load: Mutex<SaveLoadState>,
    keyboard_log: Mutex<Vec<(KeyId, bool)>>,
    mouse_log: Mutex<Vec<MouseEvent>>,
    reset_count: AtomicU32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MouseEvent {
    Button(MouseButton, bool),
    Move { dx: i32, dy: i32, rel: bool },
}

#[derive(Default)]
struct SaveLoadState {
    pending: bool,
    result: Option<Result<(), String>>,
}

impl SimFacade {
    /// Create a facade with `memory_size` bytes of zeroed linear memory,
    /// all registers zeroed, and the CPU paused (matches the emulator's
    /// state at the moment a GDB client attaches).
    pub fn new(memory_size: usize) -> Self {
        let registers: [AtomicU32; REGISTER_COUNT] = Default::default();
        Self {
            inner: Arc::new(SimState {
                registers,
                memory: Mutex::new(vec![0u8; memory_size]),
                breakpoints: Mutex::new(HashSet::new()),
                paused: AtomicBool::new(true),
                interactive_debugger_active: AtomicBool::new(false),
                screenshot_pending: AtomicBool::new(false),
                last_screenshot_path: Mutex::new(String::new()),
                save_load: Mutex::new(SaveLoadState::default()),
                keyboard_log: Mutex::new(Vec::new()),
                mouse_log: Mutex::new(Vec::new()),
                reset_count: AtomicU32::new(0),
            }),
        }
    }

    /// Set the value a real machine has right after reset: `CS:IP =
    /// F000:FFF0`.
    pub fn reset_to_power_on(&self) {
        for i in 0..REGISTER_COUNT {
            self.inner.registers[i].store(0, Ordering::SeqCst);
        }
        self.set_register(REG_EIP, 0xFFF0);
        self.set_register(REG_CS, 0xF000);
    }

    pub fn set_interactive_debugger_active(&self, active: bool) {
        self.inner
            .interactive_debugger_active
            .store(active, Ordering::SeqCst);
    }

    /// Simulate the emulator thread completing a pending screenshot.
    pub fn complete_screenshot(&self, path: impl Into<String>) {
        *self.inner.last_screenshot_path.lock() = path.into();
        self.inner.screenshot_pending.store(false, Ordering::SeqCst);
    }

    /// Simulate the emulator thread finishing the pending save/load request.
    pub fn complete_save_load(&self, result: Result<(), String>) {
        let mut state = self.inner.save_load.lock();
        state.pending = false;
        state.result = Some(result);
    }

    pub fn keyboard_log(&self) -> Vec<(KeyId, bool)> {
        self.inner.keyboard_log.lock().clone()
    }

    pub fn mouse_log(&self) -> Vec<MouseEvent> {
        self.inner.mouse_log.lock().clone()
    }

    pub fn reset_count(&self) -> u32 {
        self.inner.reset_count.load(Ordering::SeqCst)
    }
}

impl EmulatorFacade for SimFacade {
    fn get_register(&self, index: u8) -> u32 {
        self.inner
            .registers
            .get(index as usize)
            .map(|r| r.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn set_register(&self, index: u8, value: u32) {
        if let Some(r) = self.inner.registers.get(index as usize) {
            r.store(value, Ordering::SeqCst);
        }
    }

    fn read_byte(&self, linear: u32) -> u8 {
        let mem = self.inner.memory.lock();
        mem.get(linear as usize).copied().unwrap_or(0)
    }

    fn write_byte(&self, linear: u32, value: u8) {
        let mut mem = self.inner.memory.lock();
        if let Some(slot) = mem.get_mut(linear as usize) {
            *slot = value;
        }
    }

    fn save_memory_bin(&self, path: &str, addr: u32, size: u32) -> bool {
        let mem = self.inner.memory.lock();
        let start = addr as usize;
        let end = start.saturating_add(size as usize).min(mem.len());
        if start >= mem.len() {
            return false;
        }
        std::fs::write(path, &mem[start..end]).is_ok()
    }

    fn set_breakpoint(&self, linear: u32) -> bool {
        self.inner.breakpoints.lock().insert(linear)
    }

    fn remove_breakpoint(&self, linear: u32) -> bool {
        self.inner.breakpoints.lock().remove(&linear)
    }

    fn add_key(&self, key: KeyId, down: bool) {
        self.inner.keyboard_log.lock().push((key, down));
    }

    fn button_pressed(&self, button: MouseButton) {
        self.inner
            .mouse_log
            .lock()
            .push(MouseEvent::Button(button, true));
    }

    fn button_released(&self, button: MouseButton) {
        self.inner
            .mouse_log
            .lock()
            .push(MouseEvent::Button(button, false));
    }

    fn cursor_moved(&self, dx: i32, dy: i32, rel: bool) {
        self.inner.mouse_log.lock().push(MouseEvent::Move { dx, dy, rel });
    }

    fn take_screenshot(&self) {
        self.inner.screenshot_pending.store(true, Ordering::SeqCst);
    }

    fn is_screenshot_pending(&self) -> bool {
        self.inner.screenshot_pending.load(Ordering::SeqCst)
    }

    fn get_last_screenshot_path(&self) -> String {
        self.inner.last_screenshot_path.lock().clone()
    }

    fn clear_last_screenshot_path(&self) {
        self.inner.last_screenshot_path.lock().clear();
    }

    fn request_save(&self, _path: &str) {
        let mut state = self.inner.save_load.lock();
        state.pending = true;
        state.result = None;
    }

    fn request_load(&self, _path: &str) {
        let mut state = self.inner.save_load.lock();
        state.pending = true;
        state.result = None;
    }

    fn is_pending(&self) -> bool {
        self.inner.save_load.lock().pending
    }

    fn is_complete(&self) -> Completion {
        let mut state = self.inner.save_load.lock();
        if state.pending {
            return Completion::Pending;
        }
        match state.result.take() {
            Some(Ok(())) => Completion::Success,
            Some(Err(e)) => Completion::Error(e),
            None => Completion::Pending,
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    fn request_pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    fn request_resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    fn request_reset(&self, _dos_only: bool) {
        self.inner.reset_count.fetch_add(1, Ordering::SeqCst);
        self.reset_to_power_on();
    }

    fn is_interactive_debugger_active(&self) -> bool {
        self.inner.interactive_debugger_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_write_then_read_round_trips() {
        let facade = SimFacade::new(0x1000);
        for (i, b) in [0xDE, 0xAD, 0xBE, 0xEF].iter().enumerate() {
            facade.write_byte(0x400 + i as u32, *b);
        }
        for (i, b) in [0xDE, 0xAD, 0xBE, 0xEF].iter().enumerate() {
            assert_eq!(facade.read_byte(0x400 + i as u32), *b);
        }
    }

    #[test]
    fn register_round_trip() {
        let facade = SimFacade::new(0x10);
        facade.set_register(REG_EAX, 0x1234_5678);
        assert_eq!(facade.get_register(REG_EAX), 0x1234_5678);
    }

    #[test]
    fn breakpoint_set_then_remove_is_empty() {
        let facade = SimFacade::new(0x10);
        assert!(facade.set_breakpoint(0x400));
        assert!(facade.remove_breakpoint(0x400));
        assert!(!facade.remove_breakpoint(0x400));
    }

    #[test]
    fn power_on_state_matches_scenario_2() {
        let facade = SimFacade::new(0x10);
        facade.reset_to_power_on();
        assert_eq!(facade.get_register(REG_EIP), 0xFFF0);
        assert_eq!(facade.get_register(REG_CS), 0xF000);
        assert_eq!(facade.get_register(REG_EAX), 0);
    }
}
