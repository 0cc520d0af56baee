//! Save-state support for thread clocks.
//!
//! Only the clock of each thread is persisted here; chips serialize their own
//! registers alongside it. A state can only be restored into a scheduler
//! whose threads match the ones it was captured from.

use serde::{Deserialize, Serialize};

use crate::clock::scalar_for;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

/// Current save state format version.
pub const SAVE_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    pub name: String,
    pub frequency: u64,
    pub clock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    pub version: u32,
    /// One entry per live thread, in registration order.
    pub threads: Vec<ThreadState>,
}

impl Scheduler {
    /// Capture the clock of every live thread.
    ///
    /// Call [`synchronize`](Scheduler::synchronize) first if the chips'
    /// private registers are being saved too.
    pub fn save(&self) -> Result<SaveState> {
        self.ensure_idle("save")?;
        let st = self.state().borrow();
        let threads = st
            .live()
            .map(|(_, name, domain)| ThreadState {
                name: name.to_string(),
                frequency: domain.frequency(),
                clock: domain.clock(),
            })
            .collect();
        Ok(SaveState {
            version: SAVE_STATE_VERSION,
            threads,
        })
    }

    /// Put every thread's clock and frequency back to the captured values.
    ///
    /// Fails without touching anything if the live threads differ from the
    /// captured ones in number or name.
    pub fn restore(&self, save: &SaveState) -> Result<()> {
        self.ensure_idle("restore")?;
        if save.version != SAVE_STATE_VERSION {
            return Err(Error::UnsupportedVersion(save.version));
        }

        let st = self.state().borrow();
        let live: Vec<_> = st.live().collect();
        if live.len() != save.threads.len() {
            return Err(Error::SaveStateMismatch(format!(
                "{} threads saved, {} loaded",
                save.threads.len(),
                live.len()
            )));
        }
        for ((_, name, _), saved) in live.iter().zip(&save.threads) {
            if *name != saved.name {
                return Err(Error::SaveStateMismatch(format!(
                    "expected thread {}, found {name}",
                    saved.name
                )));
            }
            scalar_for(saved.frequency)?;
        }

        for ((_, _, domain), saved) in live.iter().zip(&save.threads) {
            domain.set_frequency(saved.frequency)?;
            domain.set_clock(saved.clock);
        }
        log::info!("restored clocks of {} threads", live.len());
        Ok(())
    }
}
