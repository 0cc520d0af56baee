//! Suspension points of a thread body.
//!
//! A body only ever loses control inside one of these futures. Each of them
//! returns `Poll::Pending` to unwind the nested resumptions; the scheduler
//! tells the levels apart by what was latched in its state (an exit event or
//! a hand-back to the driving thread).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{Error, Result};
use crate::scheduler::resume;
use crate::thread::{Thread, ThreadId};
use crate::Event;

/// Future returned by [`Thread::synchronize`].
#[must_use = "synchronize does nothing unless awaited"]
pub struct Synchronize<'a> {
    thread: &'a Thread,
    /// `None` means the primary thread, resolved on every poll.
    target: Option<ThreadId>,
}

impl<'a> Synchronize<'a> {
    pub(crate) fn new(thread: &'a Thread, target: Option<ThreadId>) -> Self {
        Self { thread, target }
    }
}

enum Next {
    Done,
    HandBack(ThreadId),
    Resume(ThreadId),
}

impl Future for Synchronize<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        let me = this.thread.id;
        let Some(state) = this.thread.state.upgrade() else {
            return Poll::Ready(Err(Error::Detached));
        };

        loop {
            let next = {
                let st = state.borrow();
                if st.synchronizing() {
                    Next::Done
                } else {
                    let clock = this.thread.clock();
                    let driver = st.driver_of(me);
                    let driver_clock = driver.and_then(|id| st.clock_of(id));
                    match (driver, driver_clock) {
                        // Caught up with whoever resumed us: let it continue.
                        (Some(driver), Some(driver_clock)) if clock >= driver_clock => {
                            Next::HandBack(driver)
                        }
                        _ => {
                            let target = match this.target.or(st.primary) {
                                Some(target) => target,
                                None => return Poll::Ready(Err(Error::NoPrimary)),
                            };
                            match st.clock_of(target) {
                                None => return Poll::Ready(Err(Error::InvalidThread(target))),
                                Some(target_clock) if target_clock >= clock => Next::Done,
                                Some(_) => Next::Resume(target),
                            }
                        }
                    }
                }
            };

            match next {
                Next::Done => return Poll::Ready(Ok(())),
                Next::HandBack(driver) => {
                    state.borrow_mut().hand_back(driver);
                    return Poll::Pending;
                }
                Next::Resume(target) => {
                    if let Err(err) = resume(&state, Some(me), target) {
                        return Poll::Ready(Err(err));
                    }
                    // The target has suspended. Unless it handed control
                    // back to us, keep unwinding towards `enter`.
                    if !state.borrow_mut().take_hand_back(me) {
                        return Poll::Pending;
                    }
                }
            }
        }
    }
}

/// Future returned by [`Thread::exit`].
#[must_use = "exit does nothing unless awaited"]
pub struct Exit<'a> {
    thread: &'a Thread,
    event: Option<Event>,
}

impl<'a> Exit<'a> {
    pub(crate) fn new(thread: &'a Thread, event: Event) -> Self {
        Self {
            thread,
            event: Some(event),
        }
    }
}

impl Future for Exit<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.event.take() {
            Some(event) => {
                if let Some(state) = this.thread.state.upgrade() {
                    state.borrow_mut().latch(this.thread.id, event);
                }
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Future returned by [`Thread::checkpoint`].
#[must_use = "checkpoint does nothing unless awaited"]
pub struct Checkpoint<'a> {
    thread: &'a Thread,
    suspended: bool,
}

impl<'a> Checkpoint<'a> {
    pub(crate) fn new(thread: &'a Thread) -> Self {
        Self {
            thread,
            suspended: false,
        }
    }
}

impl Future for Checkpoint<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.suspended {
            return Poll::Ready(());
        }
        let Some(state) = this.thread.state.upgrade() else {
            return Poll::Ready(());
        };
        let mut st = state.borrow_mut();
        if !st.synchronizing() {
            return Poll::Ready(());
        }
        st.latch(this.thread.id, Event::Synchronize);
        this.suspended = true;
        Poll::Pending
    }
}
