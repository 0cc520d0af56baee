//! Cooperative multi-clock scheduler for cycle-accurate emulation.
//!
//! Every chip of an emulated machine (CPU, video, audio, coprocessors) runs
//! as a [`Thread`]: an `async` body plus a private clock. Bodies advance their
//! own clock with [`Thread::step`] and call [`Thread::synchronize`] before
//! touching state owned by another chip, which runs that chip forward until
//! it has caught up. Everything happens on one OS thread, in an order that is
//! a pure function of the bodies and their clocks.
//!
//! The host drives the machine with [`Scheduler::enter`], which returns when
//! a thread raises an [`Event`] (a finished frame, a debugger step, ...).

/// Clock domains and the conversion from Hz to common time units.
pub mod clock;

/// Scheduler limits.
pub mod config;

/// Error type shared by every operation.
pub mod error;

/// Exit reasons handed to the host loop.
pub mod event;

/// Thread registry, run loop and lifecycle.
pub mod scheduler;

/// Save-state capture and restore of thread clocks.
pub mod serialization;

/// Futures a thread body awaits on.
pub mod sync;

/// Handle through which a body drives its own clock.
pub mod thread;

pub use clock::{ClockDomain, UNITS_PER_SECOND};
pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use event::Event;
pub use scheduler::Scheduler;
pub use serialization::{SAVE_STATE_VERSION, SaveState, ThreadState};
pub use thread::{Thread, ThreadId};
