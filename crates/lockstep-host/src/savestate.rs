use log::{debug, info};
use lockstep_core::clock::scalar_for;
use lockstep_core::{Error, SAVE_STATE_VERSION, SaveState};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::HostError;
use crate::machine::{Machine, RTC, Registers};

/// Contents of a save file: thread clocks plus the machine's registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFile {
    pub scheduler: SaveState,
    pub registers: Registers,
}

impl Machine {
    /// Settle every chip and capture the machine.
    pub fn snapshot(&self) -> Result<SaveFile, HostError> {
        let events = self.scheduler().synchronize()?;
        if !events.is_empty() {
            debug!("{} events raised while settling", events.len());
        }
        Ok(SaveFile {
            scheduler: self.scheduler().save()?,
            registers: self.registers(),
        })
    }

    /// Load a snapshot, plugging the real-time clock in or out to match it.
    ///
    /// The snapshot is checked against the machine before anything is
    /// touched, so a failed load leaves the machine as it was.
    pub fn load_snapshot(&self, file: &SaveFile) -> Result<(), HostError> {
        let wants_rtc = file.scheduler.threads.iter().any(|t| t.name == RTC);
        self.check_snapshot(file, wants_rtc)?;

        if wants_rtc && !self.has_rtc() {
            info!("Save state expects a real-time clock; attaching one");
            self.attach_rtc()?;
        } else if !wants_rtc && self.has_rtc() {
            info!("Save state has no real-time clock; detaching it");
            self.detach_rtc()?;
        }

        self.scheduler().restore(&file.scheduler)?;
        self.rewind()?;
        self.set_registers(file.registers.clone());
        Ok(())
    }

    /// Threads the machine will have once its RTC matches `wants_rtc` must
    /// be exactly the saved ones, with usable frequencies.
    fn check_snapshot(&self, file: &SaveFile, wants_rtc: bool) -> Result<(), HostError> {
        let state = &file.scheduler;
        if state.version != SAVE_STATE_VERSION {
            return Err(Error::UnsupportedVersion(state.version).into());
        }

        let mut expected: Vec<String> = self
            .clocks()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name != RTC)
            .collect();
        if wants_rtc {
            expected.push(RTC.to_string());
        }
        let saved: Vec<&str> = state.threads.iter().map(|t| t.name.as_str()).collect();
        if expected != saved {
            return Err(Error::SaveStateMismatch(format!(
                "machine has [{}], save has [{}]",
                expected.join(", "),
                saved.join(", ")
            ))
            .into());
        }

        for thread in &state.threads {
            scalar_for(thread.frequency)?;
        }
        Ok(())
    }
}

pub fn write(path: &Path, file: &SaveFile) -> Result<(), HostError> {
    let text = toml::to_string_pretty(file)?;
    let io_err = |source| HostError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, text).map_err(io_err)
}

pub fn read(path: &Path) -> Result<SaveFile, HostError> {
    let text = std::fs::read_to_string(path).map_err(|source| HostError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| HostError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use tempfile::tempdir;

    fn config(rtc: bool) -> HostConfig {
        let mut cfg = HostConfig::default();
        cfg.machine.rtc = rtc;
        cfg.machine.lines_per_frame = 24;
        cfg.machine.visible_lines = 18;
        cfg
    }

    fn run(machine: &Machine, frames: usize) {
        for _ in 0..frames {
            machine.run_frame().unwrap();
        }
    }

    #[test]
    fn loaded_machine_continues_like_the_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slot1.toml");

        let original = Machine::new(&config(true)).unwrap();
        run(&original, 3);
        write(&path, &original.snapshot().unwrap()).unwrap();
        run(&original, 3);

        let loaded = Machine::new(&config(true)).unwrap();
        loaded.load_snapshot(&read(&path).unwrap()).unwrap();
        run(&loaded, 3);

        assert_eq!(loaded.registers(), original.registers());
        assert_eq!(loaded.clocks(), original.clocks());
    }

    #[test]
    fn loading_over_a_running_machine_rewinds_it() {
        let source = Machine::new(&config(false)).unwrap();
        run(&source, 2);
        let file = source.snapshot().unwrap();
        run(&source, 2);

        let target = Machine::new(&config(false)).unwrap();
        run(&target, 5);
        target.load_snapshot(&file).unwrap();
        assert_eq!(target.registers(), file.registers);
        run(&target, 2);

        assert_eq!(target.registers(), source.registers());
        assert_eq!(target.clocks(), source.clocks());
    }

    #[test]
    fn rtc_follows_the_save_file() {
        let with_rtc = Machine::new(&config(true)).unwrap();
        run(&with_rtc, 1);
        let file = with_rtc.snapshot().unwrap();

        let without = Machine::new(&config(false)).unwrap();
        without.load_snapshot(&file).unwrap();
        assert!(without.has_rtc());

        let plain = Machine::new(&config(false)).unwrap().snapshot().unwrap();
        with_rtc.load_snapshot(&plain).unwrap();
        assert!(!with_rtc.has_rtc());
        assert_eq!(with_rtc.scheduler().threads(), 3);
    }

    #[test]
    fn rejected_snapshot_leaves_the_rtc_alone() {
        let with_rtc = Machine::new(&config(true)).unwrap();
        run(&with_rtc, 1);
        let mut file = with_rtc.snapshot().unwrap();
        file.scheduler.version += 1;

        let without = Machine::new(&config(false)).unwrap();
        run(&without, 1);
        let clocks = without.clocks();
        assert!(matches!(
            without.load_snapshot(&file),
            Err(HostError::Scheduler(Error::UnsupportedVersion(_)))
        ));
        assert!(!without.has_rtc());
        assert_eq!(without.scheduler().threads(), 3);
        assert_eq!(without.clocks(), clocks);

        // The other direction: a mismatching save must not unplug the RTC.
        let mut file = Machine::new(&config(false)).unwrap().snapshot().unwrap();
        file.scheduler.threads[0].name = "lcd".into();
        let rtc_clock = with_rtc.clocks().pop();
        assert!(matches!(
            with_rtc.load_snapshot(&file),
            Err(HostError::Scheduler(Error::SaveStateMismatch(_)))
        ));
        assert!(with_rtc.has_rtc());
        assert_eq!(with_rtc.clocks().pop(), rtc_clock);

        let mut file = with_rtc.snapshot().unwrap();
        file.scheduler.threads[3].frequency = 0;
        assert!(matches!(
            without.load_snapshot(&file),
            Err(HostError::Scheduler(Error::InvalidFrequency(0)))
        ));
        assert!(!without.has_rtc());
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = read(&path).unwrap_err();
        assert!(matches!(err, HostError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scheduler]\nversion = \"one\"\n").unwrap();
        assert!(matches!(read(&path), Err(HostError::Parse { .. })));
    }
}
