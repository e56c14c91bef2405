//! `emudbg-core`: the remote-debugging server core for a DOS-era x86
//! emulator — a GDB Remote Serial Protocol stub and a QEMU Monitor Protocol
//! endpoint, embedded as a library through the narrow [`facade::EmulatorFacade`]
//! trait boundary.

pub mod facade;
pub mod framer;
pub mod gate;
pub mod gdb;
pub mod json;
pub mod poll;
pub mod qmp;
pub mod server;

pub use facade::{Completion, EmulatorFacade, MouseButton, SimFacade};
pub use gate::{AsyncRequestGate, RequestKind};
pub use server::DebugServer;
