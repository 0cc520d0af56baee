use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::clock::ClockDomain;
use crate::error::Result;
use crate::scheduler::State;
use crate::sync::{Checkpoint, Exit, Synchronize};
use crate::Event;

/// Identity of a thread within one scheduler.
///
/// The generation changes every time a slot is reused, so an id kept past
/// `destroy` or `reset` never refers to a newer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ThreadId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Handle given to a thread body.
///
/// This is how a chip advances its own time and waits for the others. It
/// keeps only a weak reference to the scheduler, so bodies holding it do not
/// keep a dropped session alive.
#[derive(Clone)]
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) name: Rc<str>,
    pub(crate) domain: Rc<ClockDomain>,
    pub(crate) state: Weak<RefCell<State>>,
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current clock in common units.
    #[inline]
    pub fn clock(&self) -> i64 {
        self.domain.clock()
    }

    pub fn frequency(&self) -> u64 {
        self.domain.frequency()
    }

    /// Common units per native cycle.
    pub fn scalar(&self) -> i64 {
        self.domain.scalar()
    }

    /// Advance this thread's clock by `units` common units. Never suspends.
    #[inline]
    pub fn step(&self, units: u64) {
        self.domain.step(units);
    }

    /// Advance this thread's clock by `cycles` cycles of its own frequency.
    #[inline]
    pub fn step_cycles(&self, cycles: u64) {
        self.domain.step_cycles(cycles);
    }

    /// Switch to a new native rate, e.g. a CPU entering double-speed mode.
    pub fn set_frequency(&self, frequency: u64) -> Result<()> {
        self.domain.set_frequency(frequency)
    }

    /// Wait until `target` is not behind this thread, running it if needed.
    ///
    /// Completes immediately when `target` is already at or past this
    /// thread's clock. Otherwise `target` is resumed until it catches up.
    /// While the scheduler is settling for a save state the call completes
    /// without running `target`.
    ///
    /// This is also the point where a thread that has caught up with the
    /// thread driving it hands control back.
    pub fn synchronize(&self, target: ThreadId) -> Synchronize<'_> {
        Synchronize::new(self, Some(target))
    }

    /// [`synchronize`](Self::synchronize) with the scheduler's primary thread.
    pub fn synchronize_primary(&self) -> Synchronize<'_> {
        Synchronize::new(self, None)
    }

    /// Synchronize with each of `targets` in order.
    pub async fn synchronize_all(&self, targets: &[ThreadId]) -> Result<()> {
        for &target in targets {
            self.synchronize(target).await?;
        }
        Ok(())
    }

    /// Suspend the whole scheduler and hand `event` to the `enter()` caller.
    ///
    /// Completes when the host enters the scheduler again.
    pub fn exit(&self, event: Event) -> Exit<'_> {
        Exit::new(self, event)
    }

    /// Mark a point where this thread's private state can be serialized.
    ///
    /// A no-op during normal execution. While the scheduler is settling it
    /// suspends the thread with [`Event::Synchronize`].
    ///
    /// Every body that can be resumed by
    /// [`Scheduler::synchronize`](crate::Scheduler::synchronize) needs one in
    /// its main loop, since settling only stops a thread here.
    pub fn checkpoint(&self) -> Checkpoint<'_> {
        Checkpoint::new(self)
    }

    /// Whether the scheduler is settling threads for a save state.
    pub fn synchronizing(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.borrow().synchronizing())
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("clock", &self.domain.clock())
            .field("frequency", &self.domain.frequency())
            .finish()
    }
}
