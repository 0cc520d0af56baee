use serde::{Deserialize, Serialize};
use std::fmt;

use crate::thread::ThreadId;

/// Reason a call to [`Scheduler::enter`](crate::Scheduler::enter) returned.
///
/// The scheduler never interprets these; they belong to the host loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// A video frame has been completed.
    Frame,
    /// A debugger single-step has been completed.
    Step,
    /// A thread reached its checkpoint while the scheduler was settling.
    Synchronize,
    /// The emulated machine asked to be switched off.
    PowerOff,
    /// A thread body returned. The session is no longer well-defined.
    Terminated(ThreadId),
    /// Host-defined reason.
    Custom(u32),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Frame => write!(f, "frame"),
            Event::Step => write!(f, "step"),
            Event::Synchronize => write!(f, "synchronize"),
            Event::PowerOff => write!(f, "power-off"),
            Event::Terminated(id) => write!(f, "terminated({id})"),
            Event::Custom(code) => write!(f, "custom({code})"),
        }
    }
}
