//! GDB Remote Serial Protocol session.

pub mod registers;
pub mod session;

pub use session::{
    DispatchOutcome, ExecutionState, GdbSession, InterruptOutcome, PendingAction,
    INTERACTIVE_DEBUGGER_CONFLICT_REPLY,
};
