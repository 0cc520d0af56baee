#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use lockstep_core::{Event, Result, Scheduler, Thread, ThreadId};

pub const CPU_HZ: u64 = 1 << 22;
pub const PPU_HZ: u64 = 1 << 22;
pub const APU_HZ: u64 = 1 << 20;

/// Common units per emulated scanline.
pub const LINE_UNITS: i64 = 456 * (lockstep_core::UNITS_PER_SECOND / PPU_HZ as i64);
/// Common units per emulated frame.
pub const FRAME_UNITS: i64 = 154 * LINE_UNITS;

/// Steps by one unit forever, handing control back whenever it catches up.
pub async fn follower(thread: Thread, steps: Rc<Cell<u32>>) -> Result<()> {
    loop {
        thread.step(1);
        steps.set(steps.get() + 1);
        thread.synchronize_primary().await?;
    }
}

/// Steps by `units` and then synchronizes with `target`, forever.
pub async fn leader(thread: Thread, units: u64, target: ThreadId) -> Result<()> {
    loop {
        thread.step(units);
        thread.synchronize(target).await?;
        thread.exit(Event::Frame).await;
    }
}

/// CPU of a small machine: runs instructions and keeps the video chip in
/// step. Its only state is its clock.
pub async fn cpu(thread: Thread, ppu: ThreadId, apu: ThreadId) -> Result<()> {
    loop {
        thread.step_cycles(4);
        thread.synchronize_all(&[ppu, apu]).await?;
        thread.checkpoint().await;
    }
}

/// Video chip: raises a frame every `FRAME_UNITS` without private counters.
pub async fn ppu(thread: Thread) -> Result<()> {
    loop {
        let before = thread.clock();
        thread.step(LINE_UNITS as u64);
        if thread.clock().div_euclid(FRAME_UNITS) != before.div_euclid(FRAME_UNITS) {
            thread.exit(Event::Frame).await;
        }
        thread.synchronize_primary().await?;
        thread.checkpoint().await;
    }
}

/// Audio chip: produces one sample every 32 cycles.
pub async fn apu(thread: Thread) -> Result<()> {
    loop {
        thread.step_cycles(32);
        thread.synchronize_primary().await?;
        thread.checkpoint().await;
    }
}

pub struct Machine {
    pub scheduler: Scheduler,
    pub cpu: ThreadId,
    pub ppu: ThreadId,
    pub apu: ThreadId,
}

impl Machine {
    pub fn new() -> Self {
        let scheduler = Scheduler::new();
        let ppu_id = scheduler.create("ppu", PPU_HZ, ppu).unwrap();
        let apu_id = scheduler.create("apu", APU_HZ, apu).unwrap();
        let cpu_id = scheduler
            .create("cpu", CPU_HZ, move |t| cpu(t, ppu_id, apu_id))
            .unwrap();
        scheduler.power(cpu_id).unwrap();
        Self {
            scheduler,
            cpu: cpu_id,
            ppu: ppu_id,
            apu: apu_id,
        }
    }

    pub fn clocks(&self) -> Vec<i64> {
        self.scheduler
            .thread_ids()
            .into_iter()
            .map(|id| self.scheduler.clock(id).unwrap())
            .collect()
    }

    /// Enter `frames` times, recording each event with the clocks after it.
    pub fn run(&self, frames: usize) -> Vec<(Event, Vec<i64>)> {
        (0..frames)
            .map(|_| {
                let event = self.scheduler.enter().unwrap();
                (event, self.clocks())
            })
            .collect()
    }
}
