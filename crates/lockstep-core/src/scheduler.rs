use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use log::{debug, info, warn};

use crate::clock::ClockDomain;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::thread::{Thread, ThreadId};
use crate::Event;

#[cfg(feature = "sched-trace")]
macro_rules! sched_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "sched-trace"))]
macro_rules! sched_trace {
    ($($arg:tt)*) => {};
}

pub(crate) type Body = Pin<Box<dyn Future<Output = Result<()>>>>;

enum BodyState {
    Parked(Body),
    Running,
    Returned,
}

struct Entry {
    name: Rc<str>,
    domain: Rc<ClockDomain>,
    body: BodyState,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Run,
    /// Running the primary up to its checkpoint.
    SynchronizePrimary,
    /// Running each other thread up to its checkpoint.
    SynchronizeAux,
}

pub(crate) struct State {
    config: SchedulerConfig,
    slots: Vec<Slot>,
    /// Live threads in registration order.
    order: Vec<ThreadId>,
    pub(crate) primary: Option<ThreadId>,
    /// Exit reason register.
    event: Option<Event>,
    /// Set when a driven thread caught up and hands control back.
    hand_back: Option<ThreadId>,
    /// `None` while idle.
    mode: Option<Mode>,
    /// Bodies currently being polled, innermost last.
    stack: Vec<ThreadId>,
}

impl State {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            order: Vec::new(),
            primary: None,
            event: None,
            hand_back: None,
            mode: None,
            stack: Vec::new(),
        }
    }

    fn entry(&self, id: ThreadId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: ThreadId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub(crate) fn clock_of(&self, id: ThreadId) -> Option<i64> {
        self.entry(id).map(|entry| entry.domain.clock())
    }

    /// The thread that resumed `id`, if `id` is the one being polled.
    pub(crate) fn driver_of(&self, id: ThreadId) -> Option<ThreadId> {
        match self.stack.as_slice() {
            [.., driver, top] if *top == id => Some(*driver),
            _ => None,
        }
    }

    pub(crate) fn synchronizing(&self) -> bool {
        matches!(
            self.mode,
            Some(Mode::SynchronizePrimary | Mode::SynchronizeAux)
        )
    }

    pub(crate) fn latch(&mut self, from: ThreadId, event: Event) {
        match self.event {
            None => {
                debug!("thread {from} raised {event}");
                self.event = Some(event);
            }
            Some(pending) => warn!("thread {from} raised {event} while {pending} is pending"),
        }
    }

    pub(crate) fn hand_back(&mut self, to: ThreadId) {
        self.hand_back = Some(to);
    }

    pub(crate) fn take_hand_back(&mut self, to: ThreadId) -> bool {
        if self.hand_back == Some(to) {
            self.hand_back = None;
            true
        } else {
            false
        }
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        if self.mode.is_some() {
            return Err(Error::Busy(operation));
        }
        Ok(())
    }

    fn ensure_live(&self, id: ThreadId) -> Result<&Entry> {
        self.entry(id).ok_or(Error::InvalidThread(id))
    }

    fn next_id(&self) -> ThreadId {
        match self.slots.iter().position(|slot| slot.entry.is_none()) {
            Some(index) => ThreadId {
                index: index as u32,
                generation: self.slots[index].generation,
            },
            None => ThreadId {
                index: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    fn insert(&mut self, id: ThreadId, entry: Entry) {
        let index = id.index as usize;
        if index == self.slots.len() {
            self.slots.push(Slot::default());
        }
        self.slots[index].entry = Some(entry);
        self.order.push(id);
    }

    fn remove(&mut self, id: ThreadId) -> Option<Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.order.retain(|&live| live != id);
        if self.primary == Some(id) {
            self.primary = None;
        }
        Some(entry)
    }

    pub(crate) fn live(&self) -> impl Iterator<Item = (ThreadId, &str, &ClockDomain)> + '_ {
        self.order.iter().filter_map(|&id| {
            self.entry(id)
                .map(|entry| (id, &*entry.name, &*entry.domain))
        })
    }
}

/// Poll the body of `id` on behalf of `caller` until it next suspends.
///
/// Returns `Poll::Ready` if the body returned normally; that is latched as
/// [`Event::Terminated`]. An error returned by the body is passed through.
pub(crate) fn resume(
    state: &Rc<RefCell<State>>,
    caller: Option<ThreadId>,
    id: ThreadId,
) -> Result<Poll<()>> {
    let mut body = {
        let mut st = state.borrow_mut();
        let entry = st.entry_mut(id).ok_or(Error::InvalidThread(id))?;
        let body = match std::mem::replace(&mut entry.body, BodyState::Running) {
            BodyState::Parked(body) => body,
            BodyState::Running => {
                return Err(Error::CircularSynchronization {
                    caller: caller.unwrap_or(id),
                    target: id,
                });
            }
            BodyState::Returned => {
                entry.body = BodyState::Returned;
                return Err(Error::Terminated(id));
            }
        };
        st.stack.push(id);
        sched_trace!("resume {id} at depth {}", st.stack.len());
        body
    };

    let mut cx = Context::from_waker(Waker::noop());
    let poll = body.as_mut().poll(&mut cx);

    let mut st = state.borrow_mut();
    st.stack.pop();
    // Threads cannot be destroyed while the scheduler runs, so the slot is
    // still ours.
    let Some(entry) = st.entry_mut(id) else {
        return Err(Error::InvalidThread(id));
    };
    match poll {
        Poll::Pending => {
            entry.body = BodyState::Parked(body);
            Ok(Poll::Pending)
        }
        Poll::Ready(Ok(())) => {
            entry.body = BodyState::Returned;
            warn!("thread {id} ({}) returned from its body", entry.name);
            st.latch(id, Event::Terminated(id));
            Ok(Poll::Ready(()))
        }
        Poll::Ready(Err(err)) => {
            entry.body = BodyState::Returned;
            debug!("thread {id} ({}) failed: {err}", entry.name);
            Err(err)
        }
    }
}

/// Puts the scheduler back to idle when a run ends, including by a panic in a
/// body. Bodies that were being polled when the panic hit are gone, so their
/// threads are marked as returned.
struct IdleOnDrop<'a>(&'a Rc<RefCell<State>>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let Ok(mut st) = self.0.try_borrow_mut() else {
            return;
        };
        st.mode = None;
        st.hand_back = None;
        for id in std::mem::take(&mut st.stack) {
            if let Some(entry) = st.entry_mut(id)
                && matches!(entry.body, BodyState::Running)
            {
                warn!("thread {id} ({}) lost its body while running", entry.name);
                entry.body = BodyState::Returned;
            }
        }
    }
}

/// Cooperative scheduler for one emulated machine.
///
/// Owns every thread of the session. The host powers it on with a primary
/// thread and then calls [`enter`](Self::enter) once per event it cares
/// about (usually once per video frame).
pub struct Scheduler {
    state: Rc<RefCell<State>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new(config))),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.state.borrow().config.clone()
    }

    /// Register a new thread running `body` at `frequency` Hz, starting at
    /// clock 0.
    pub fn create<F, Fut>(&self, name: impl Into<String>, frequency: u64, body: F) -> Result<ThreadId>
    where
        F: FnOnce(Thread) -> Fut,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.create_with_baseline(name, frequency, 0, body)
    }

    /// Like [`create`](Self::create) but starting the clock at `baseline`.
    ///
    /// A small negative baseline makes a chip run slightly ahead of its peers
    /// that were powered on at the same instant.
    pub fn create_with_baseline<F, Fut>(
        &self,
        name: impl Into<String>,
        frequency: u64,
        baseline: i64,
        body: F,
    ) -> Result<ThreadId>
    where
        F: FnOnce(Thread) -> Fut,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let id = {
            let st = self.state.borrow();
            st.ensure_idle("create")?;
            if st.order.len() >= st.config.max_threads {
                return Err(Error::Exhausted {
                    limit: st.config.max_threads,
                });
            }
            st.next_id()
        };

        let name: Rc<str> = Rc::from(name.into());
        let domain = Rc::new(ClockDomain::new(frequency, baseline)?);
        let thread = Thread {
            id,
            name: Rc::clone(&name),
            domain: Rc::clone(&domain),
            state: Rc::downgrade(&self.state),
        };
        let body: Body = Box::pin(body(thread));

        let mut st = self.state.borrow_mut();
        // `body` ran user code; make sure it did not change the picture.
        st.ensure_idle("create")?;
        if st.next_id() != id {
            return Err(Error::Busy("create"));
        }
        info!("create thread {id} ({name}) at {frequency} Hz");
        st.insert(
            id,
            Entry {
                name,
                domain,
                body: BodyState::Parked(body),
            },
        );
        Ok(id)
    }

    /// Remove a thread and drop its body.
    pub fn destroy(&self, id: ThreadId) -> Result<()> {
        let entry = {
            let mut st = self.state.borrow_mut();
            st.ensure_idle("destroy")?;
            st.remove(id).ok_or(Error::InvalidThread(id))?
        };
        info!("destroy thread {id} ({})", entry.name);
        // Dropped outside the borrow: the body may own arbitrary state.
        drop(entry);
        Ok(())
    }

    /// Replace the body of a live thread, keeping its identity and clock.
    pub fn restart<F, Fut>(&self, id: ThreadId, body: F) -> Result<()>
    where
        F: FnOnce(Thread) -> Fut,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let thread = {
            let st = self.state.borrow();
            st.ensure_idle("restart")?;
            let entry = st.ensure_live(id)?;
            Thread {
                id,
                name: Rc::clone(&entry.name),
                domain: Rc::clone(&entry.domain),
                state: Rc::downgrade(&self.state),
            }
        };
        let body: Body = Box::pin(body(thread));

        let old = {
            let mut st = self.state.borrow_mut();
            st.ensure_idle("restart")?;
            let entry = st.entry_mut(id).ok_or(Error::InvalidThread(id))?;
            info!("restart thread {id} ({})", entry.name);
            std::mem::replace(&mut entry.body, BodyState::Parked(body))
        };
        drop(old);
        Ok(())
    }

    /// Drop every thread and forget the primary. Ids handed out before the
    /// reset stay invalid.
    pub fn reset(&self) -> Result<()> {
        let entries: Vec<Entry> = {
            let mut st = self.state.borrow_mut();
            st.ensure_idle("reset")?;
            st.order.clear();
            st.primary = None;
            st.event = None;
            st.hand_back = None;
            st.slots
                .iter_mut()
                .filter_map(|slot| {
                    let entry = slot.entry.take()?;
                    slot.generation = slot.generation.wrapping_add(1);
                    Some(entry)
                })
                .collect()
        };
        info!("scheduler reset ({} threads dropped)", entries.len());
        drop(entries);
        Ok(())
    }

    /// Choose the thread [`enter`](Self::enter) resumes.
    pub fn power(&self, primary: ThreadId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.ensure_idle("power")?;
        let name = Rc::clone(&st.ensure_live(primary)?.name);
        info!("power on with primary thread {primary} ({name})");
        st.primary = Some(primary);
        Ok(())
    }

    /// Run the machine until some thread exits, and return why.
    ///
    /// The primary is resumed from wherever it last suspended. On return
    /// every thread is suspended at a `step`, `synchronize`, `exit` or
    /// `checkpoint` boundary.
    pub fn enter(&self) -> Result<Event> {
        let primary = self.state.borrow().primary.ok_or(Error::NoPrimary)?;
        self.run(primary, Mode::Run, "enter")
    }

    /// Bring every thread to a checkpoint so the machine can be serialized.
    ///
    /// The primary runs first, then every other thread in registration
    /// order. Threads do not wait for each other while this is in progress.
    /// Exit events raised on the way are returned in the order they occurred.
    ///
    /// Every thread body must reach [`Thread::checkpoint`] on its own: while
    /// settling, `synchronize` on a [`Thread`] no longer waits, so a body
    /// without a checkpoint in its loop never stops.
    pub fn synchronize(&self) -> Result<Vec<Event>> {
        let primary = self.state.borrow().primary.ok_or(Error::NoPrimary)?;
        let mut events = Vec::new();
        self.run_to_checkpoint(primary, Mode::SynchronizePrimary, &mut events)?;
        let others: Vec<ThreadId> = self
            .state
            .borrow()
            .order
            .iter()
            .copied()
            .filter(|&id| id != primary)
            .collect();
        for id in others {
            self.run_to_checkpoint(id, Mode::SynchronizeAux, &mut events)?;
        }
        debug!("scheduler synchronized ({} events raised)", events.len());
        Ok(events)
    }

    fn run_to_checkpoint(&self, id: ThreadId, mode: Mode, events: &mut Vec<Event>) -> Result<()> {
        loop {
            match self.run(id, mode, "synchronize")? {
                Event::Synchronize => return Ok(()),
                Event::Terminated(id) => return Err(Error::Terminated(id)),
                event => events.push(event),
            }
        }
    }

    fn run(&self, id: ThreadId, mode: Mode, operation: &'static str) -> Result<Event> {
        {
            let mut st = self.state.borrow_mut();
            st.ensure_idle(operation)?;
            st.mode = Some(mode);
            st.event = None;
            st.hand_back = None;
        }

        let result = {
            let _idle = IdleOnDrop(&self.state);
            resume(&self.state, None, id)
        };

        let event = self.state.borrow_mut().event.take();
        result?;
        event.ok_or(Error::Stalled)
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().mode.is_some()
    }

    /// Whether [`synchronize`](Self::synchronize) is in progress.
    pub fn synchronizing(&self) -> bool {
        self.state.borrow().synchronizing()
    }

    pub fn primary(&self) -> Option<ThreadId> {
        self.state.borrow().primary
    }

    /// Number of live threads.
    pub fn threads(&self) -> usize {
        self.state.borrow().order.len()
    }

    /// Live thread ids in registration order.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.state.borrow().order.clone()
    }

    pub fn is_alive(&self, id: ThreadId) -> bool {
        self.state.borrow().entry(id).is_some()
    }

    pub fn clock(&self, id: ThreadId) -> Result<i64> {
        self.state
            .borrow()
            .clock_of(id)
            .ok_or(Error::InvalidThread(id))
    }

    pub fn name(&self, id: ThreadId) -> Result<String> {
        Ok(self.state.borrow().ensure_live(id)?.name.to_string())
    }

    pub fn frequency(&self, id: ThreadId) -> Result<u64> {
        Ok(self.state.borrow().ensure_live(id)?.domain.frequency())
    }

    /// Smallest clock among live threads.
    pub fn minimum(&self) -> Option<i64> {
        self.state.borrow().live().map(|(_, _, domain)| domain.clock()).min()
    }

    /// Largest clock among live threads.
    pub fn maximum(&self) -> Option<i64> {
        self.state.borrow().live().map(|(_, _, domain)| domain.clock()).max()
    }

    pub(crate) fn state(&self) -> &Rc<RefCell<State>> {
        &self.state
    }

    pub(crate) fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        self.state.borrow().ensure_idle(operation)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
