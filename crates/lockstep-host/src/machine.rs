//! Small machine used to drive the scheduler from the command line.
//!
//! A CPU, a video chip and an audio chip share a register bus. An optional
//! real-time clock can be plugged in and out between frames. Every chip
//! keeps its state on the bus, so restarting the bodies and restoring the
//! bus and clocks is enough to load a save state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, info};
use lockstep_core::{Event, Result, Scheduler, Thread, ThreadId};
use serde::{Deserialize, Serialize};

use crate::config::{HostConfig, MachineConfig};
use crate::error::HostError;

pub const CPU: &str = "cpu";
pub const VIDEO: &str = "video";
pub const AUDIO: &str = "audio";
pub const RTC: &str = "rtc";

/// Registers shared by the chips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registers {
    pub instructions: u64,
    /// Vblank interrupts serviced by the CPU.
    pub interrupts: u64,
    /// Current scanline.
    pub ly: u32,
    /// Vblank interrupt request.
    pub vblank: bool,
    pub frames: u64,
    /// Master volume written by the CPU, 0-15.
    pub volume: u8,
    pub samples: u64,
    /// Running sum of the volume at each sample.
    pub mix: u64,
    pub rtc_ticks: u64,
    pub rtc_seconds: u64,
}

pub type Bus = Rc<RefCell<Registers>>;

struct Cpu {
    bus: Bus,
    video: ThreadId,
    audio: ThreadId,
    rtc: Rc<Cell<Option<ThreadId>>>,
}

impl Cpu {
    async fn run(self, thread: Thread) -> Result<()> {
        loop {
            thread.step_cycles(4);
            thread.synchronize_all(&[self.video, self.audio]).await?;
            if let Some(rtc) = self.rtc.get() {
                thread.synchronize(rtc).await?;
            }
            {
                let mut regs = self.bus.borrow_mut();
                regs.instructions += 1;
                if regs.vblank {
                    regs.vblank = false;
                    regs.interrupts += 1;
                }
                if regs.instructions.is_multiple_of(256) {
                    regs.volume = ((regs.instructions >> 8) & 0x0f) as u8;
                }
            }
            thread.checkpoint().await;
        }
    }
}

struct Video {
    bus: Bus,
    timing: MachineConfig,
}

impl Video {
    async fn run(self, thread: Thread) -> Result<()> {
        loop {
            thread.step_cycles(self.timing.dots_per_line);
            let entered_vblank = {
                let mut regs = self.bus.borrow_mut();
                regs.ly = (regs.ly + 1) % self.timing.lines_per_frame;
                let entered = regs.ly == self.timing.visible_lines;
                if entered {
                    regs.vblank = true;
                    regs.frames += 1;
                }
                entered
            };
            if entered_vblank {
                thread.exit(Event::Frame).await;
            }
            thread.synchronize_primary().await?;
            thread.checkpoint().await;
        }
    }
}

struct Audio {
    bus: Bus,
    timing: MachineConfig,
}

impl Audio {
    async fn run(self, thread: Thread) -> Result<()> {
        let period = self.timing.cycles_per_sample();
        loop {
            thread.step_cycles(period);
            {
                let mut regs = self.bus.borrow_mut();
                regs.samples += 1;
                regs.mix = regs.mix.wrapping_add(u64::from(regs.volume));
            }
            thread.synchronize_primary().await?;
            thread.checkpoint().await;
        }
    }
}

struct Rtc {
    bus: Bus,
    timing: MachineConfig,
}

impl Rtc {
    async fn run(self, thread: Thread) -> Result<()> {
        loop {
            thread.step_cycles(1);
            {
                let mut regs = self.bus.borrow_mut();
                regs.rtc_ticks += 1;
                if regs.rtc_ticks >= self.timing.rtc_hz {
                    regs.rtc_ticks = 0;
                    regs.rtc_seconds += 1;
                }
            }
            thread.synchronize_primary().await?;
            thread.checkpoint().await;
        }
    }
}

pub struct Machine {
    scheduler: Scheduler,
    bus: Bus,
    timing: MachineConfig,
    cpu: ThreadId,
    video: ThreadId,
    audio: ThreadId,
    rtc: Rc<Cell<Option<ThreadId>>>,
}

impl Machine {
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        let timing = config.machine;
        if timing.visible_lines >= timing.lines_per_frame {
            return Err(HostError::Config(format!(
                "{} visible lines do not fit in a {}-line frame",
                timing.visible_lines, timing.lines_per_frame
            )));
        }
        if timing.dots_per_line == 0 {
            return Err(HostError::Config("dots_per_line must be at least 1".into()));
        }

        let scheduler = Scheduler::with_config(config.scheduler.clone());
        let bus = Bus::default();
        let rtc = Rc::new(Cell::new(None));

        let chip = Video {
            bus: Rc::clone(&bus),
            timing,
        };
        let video = scheduler.create(VIDEO, timing.video_hz, move |t| chip.run(t))?;
        let chip = Audio {
            bus: Rc::clone(&bus),
            timing,
        };
        let audio = scheduler.create(AUDIO, timing.audio_hz, move |t| chip.run(t))?;
        let chip = Cpu {
            bus: Rc::clone(&bus),
            video,
            audio,
            rtc: Rc::clone(&rtc),
        };
        let cpu = scheduler.create(CPU, timing.cpu_hz, move |t| chip.run(t))?;
        scheduler.power(cpu)?;

        let machine = Self {
            scheduler,
            bus,
            timing,
            cpu,
            video,
            audio,
            rtc,
        };
        if timing.rtc {
            machine.attach_rtc()?;
        }
        info!(
            "Machine powered on ({} threads, CPU at {} Hz)",
            machine.scheduler.threads(),
            timing.cpu_hz
        );
        Ok(machine)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registers(&self) -> Registers {
        self.bus.borrow().clone()
    }

    pub fn set_registers(&self, registers: Registers) {
        *self.bus.borrow_mut() = registers;
    }

    pub fn has_rtc(&self) -> bool {
        self.rtc.get().is_some()
    }

    /// Plug in the real-time clock. It starts counting from the CPU's
    /// current time rather than from zero.
    pub fn attach_rtc(&self) -> Result<ThreadId, HostError> {
        if let Some(id) = self.rtc.get() {
            return Ok(id);
        }
        let now = self.scheduler.clock(self.cpu)?;
        let chip = self.rtc_chip();
        let id = self
            .scheduler
            .create_with_baseline(RTC, self.timing.rtc_hz, now, move |t| chip.run(t))?;
        self.rtc.set(Some(id));
        Ok(id)
    }

    /// Unplug the real-time clock. Returns whether one was attached.
    pub fn detach_rtc(&self) -> Result<bool, HostError> {
        let Some(id) = self.rtc.get() else {
            return Ok(false);
        };
        self.scheduler.destroy(id)?;
        self.rtc.set(None);
        Ok(true)
    }

    /// Run until the video chip finishes a frame.
    pub fn run_frame(&self) -> Result<(), HostError> {
        loop {
            match self.scheduler.enter()? {
                Event::Frame => return Ok(()),
                event @ (Event::Terminated(_) | Event::PowerOff) => {
                    return Err(HostError::Stopped(event));
                }
                event => debug!("Ignoring {event} during frame"),
            }
        }
    }

    /// Restart every chip from the top of its loop, keeping the clocks.
    pub fn rewind(&self) -> Result<(), HostError> {
        let video = self.video_chip();
        self.scheduler.restart(self.video, move |t| video.run(t))?;
        let audio = self.audio_chip();
        self.scheduler.restart(self.audio, move |t| audio.run(t))?;
        let cpu = self.cpu_chip();
        self.scheduler.restart(self.cpu, move |t| cpu.run(t))?;
        if let Some(id) = self.rtc.get() {
            let rtc = self.rtc_chip();
            self.scheduler.restart(id, move |t| rtc.run(t))?;
        }
        Ok(())
    }

    /// Name and clock of every thread in registration order.
    pub fn clocks(&self) -> Vec<(String, i64)> {
        self.scheduler
            .thread_ids()
            .into_iter()
            .filter_map(|id| {
                let name = self.scheduler.name(id).ok()?;
                let clock = self.scheduler.clock(id).ok()?;
                Some((name, clock))
            })
            .collect()
    }

    fn cpu_chip(&self) -> Cpu {
        Cpu {
            bus: Rc::clone(&self.bus),
            video: self.video,
            audio: self.audio,
            rtc: Rc::clone(&self.rtc),
        }
    }

    fn video_chip(&self) -> Video {
        Video {
            bus: Rc::clone(&self.bus),
            timing: self.timing,
        }
    }

    fn audio_chip(&self) -> Audio {
        Audio {
            bus: Rc::clone(&self.bus),
            timing: self.timing,
        }
    }

    fn rtc_chip(&self) -> Rtc {
        Rtc {
            bus: Rc::clone(&self.bus),
            timing: self.timing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(rtc: bool) -> HostConfig {
        let mut cfg = HostConfig::default();
        cfg.machine.rtc = rtc;
        cfg.machine.lines_per_frame = 20;
        cfg.machine.visible_lines = 16;
        cfg
    }

    #[test]
    fn frames_raise_vblank_interrupts() {
        let machine = Machine::new(&small_config(false)).unwrap();
        for _ in 0..3 {
            machine.run_frame().unwrap();
        }
        let regs = machine.registers();
        assert_eq!(regs.frames, 3);
        assert_eq!(regs.ly, 16);
        assert!(regs.interrupts >= 2);
        assert!(regs.samples > 0);
        assert!(regs.instructions > 0);
    }

    #[test]
    fn rtc_is_attached_from_config() {
        let machine = Machine::new(&small_config(true)).unwrap();
        assert!(machine.has_rtc());
        let names: Vec<_> = machine.clocks().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, [VIDEO, AUDIO, CPU, RTC]);

        machine.run_frame().unwrap();
        assert!(machine.registers().rtc_ticks > 0);
    }

    #[test]
    fn rtc_can_be_plugged_between_frames() {
        let machine = Machine::new(&small_config(false)).unwrap();
        machine.run_frame().unwrap();

        let id = machine.attach_rtc().unwrap();
        let cpu_clock = machine.scheduler().clock(machine.cpu).unwrap();
        assert_eq!(machine.scheduler().clock(id).unwrap(), cpu_clock);
        machine.run_frame().unwrap();
        let ticks = machine.registers().rtc_ticks;
        assert!(ticks > 0);

        assert!(machine.detach_rtc().unwrap());
        assert!(!machine.detach_rtc().unwrap());
        machine.run_frame().unwrap();
        assert_eq!(machine.registers().rtc_ticks, ticks);
        assert_eq!(machine.scheduler().threads(), 3);
    }

    #[test]
    fn frame_must_fit_visible_lines() {
        let mut cfg = small_config(false);
        cfg.machine.visible_lines = cfg.machine.lines_per_frame;
        assert!(matches!(Machine::new(&cfg), Err(HostError::Config(_))));
    }

    #[test]
    fn invalid_frequency_is_reported() {
        let mut cfg = small_config(false);
        cfg.machine.audio_hz = 0;
        assert!(matches!(
            Machine::new(&cfg),
            Err(HostError::Scheduler(lockstep_core::Error::InvalidFrequency(0)))
        ));
    }

    #[test]
    fn identical_machines_stay_identical() {
        let a = Machine::new(&small_config(true)).unwrap();
        let b = Machine::new(&small_config(true)).unwrap();
        for _ in 0..4 {
            a.run_frame().unwrap();
            b.run_frame().unwrap();
            assert_eq!(a.registers(), b.registers());
            assert_eq!(a.clocks(), b.clocks());
        }
    }
}
