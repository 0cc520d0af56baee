use std::cell::Cell;

use crate::error::{Error, Result};

/// Common virtual-time units per emulated second.
///
/// Every clock domain counts in these units so that chips with unrelated
/// crystals can be compared directly. A domain running at `hz` advances by
/// `UNITS_PER_SECOND / hz` units per native cycle.
pub const UNITS_PER_SECOND: i64 = 1 << 40;

/// Units per native cycle for a chip running at `frequency` Hz.
pub fn scalar_for(frequency: u64) -> Result<i64> {
    match i64::try_from(frequency) {
        Ok(hz) if hz > 0 && hz <= UNITS_PER_SECOND => Ok(UNITS_PER_SECOND / hz),
        _ => Err(Error::InvalidFrequency(frequency)),
    }
}

/// The private time counter of one participant.
///
/// Only the owning thread advances it. The scheduler reads it to decide
/// whether a synchronization has converged, and writes it only while idle
/// (save-state restore).
#[derive(Debug)]
pub struct ClockDomain {
    clock: Cell<i64>,
    frequency: Cell<u64>,
    scalar: Cell<i64>,
}

impl ClockDomain {
    pub fn new(frequency: u64, baseline: i64) -> Result<Self> {
        let scalar = scalar_for(frequency)?;
        Ok(Self {
            clock: Cell::new(baseline),
            frequency: Cell::new(frequency),
            scalar: Cell::new(scalar),
        })
    }

    #[inline]
    pub fn clock(&self) -> i64 {
        self.clock.get()
    }

    #[inline]
    pub fn frequency(&self) -> u64 {
        self.frequency.get()
    }

    #[inline]
    pub fn scalar(&self) -> i64 {
        self.scalar.get()
    }

    /// Advance by `units` common units. Saturates at `i64::MAX`.
    pub fn step(&self, units: u64) {
        let units = i64::try_from(units).unwrap_or(i64::MAX);
        let now = self.clock.get();
        let next = now.saturating_add(units);
        if next == i64::MAX && now != i64::MAX {
            log::warn!("clock domain saturated at {next}");
        }
        self.clock.set(next);
    }

    /// Advance by `cycles` native cycles of this domain.
    pub fn step_cycles(&self, cycles: u64) {
        let cycles = i64::try_from(cycles).unwrap_or(i64::MAX);
        let units = cycles.saturating_mul(self.scalar.get());
        self.step(units as u64);
    }

    /// Change the native rate. The current clock value is kept.
    pub fn set_frequency(&self, frequency: u64) -> Result<()> {
        let scalar = scalar_for(frequency)?;
        self.frequency.set(frequency);
        self.scalar.set(scalar);
        Ok(())
    }

    pub(crate) fn set_clock(&self, clock: i64) {
        self.clock.set(clock);
    }
}
