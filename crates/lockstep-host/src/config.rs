use log::warn;
use lockstep_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Timing of the demo machine's chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub cpu_hz: u64,
    pub video_hz: u64,
    pub audio_hz: u64,
    pub rtc_hz: u64,
    /// Video clocks per scanline.
    pub dots_per_line: u64,
    pub visible_lines: u32,
    pub lines_per_frame: u32,
    /// Output samples per second.
    pub sample_rate: u32,
    /// Attach the real-time clock coprocessor at power-on.
    pub rtc: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_hz: 4_194_304,
            video_hz: 4_194_304,
            audio_hz: 1_048_576,
            rtc_hz: 32_768,
            dots_per_line: 456,
            visible_lines: 144,
            lines_per_frame: 154,
            sample_rate: 48_000,
            rtc: true,
        }
    }
}

impl MachineConfig {
    /// Audio clocks between two output samples, never zero.
    pub fn cycles_per_sample(&self) -> u64 {
        (self.audio_hz / u64::from(self.sample_rate.max(1))).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HostConfig {
    pub scheduler: SchedulerConfig,
    pub machine: MachineConfig,
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("lockstep").join("host.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("lockstep").join("host.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("lockstep")
            .join("host.toml");
    }

    PathBuf::from("host.toml")
}

pub fn load_from_file(path: &Path) -> HostConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return HostConfig::default(),
    };

    match toml::from_str::<HostConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse host config {}: {e}; using defaults",
                path.display()
            );
            HostConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &HostConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_from_file(&dir.path().join("absent.toml"));
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[machine]\nrtc = false\ncpu_hz = 8388608\n").unwrap();

        let cfg = load_from_file(&path);
        assert!(!cfg.machine.rtc);
        assert_eq!(cfg.machine.cpu_hz, 8_388_608);
        assert_eq!(cfg.machine.video_hz, 4_194_304);
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "machine = [").unwrap();
        assert_eq!(load_from_file(&path), HostConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("host.toml");
        let mut cfg = HostConfig::default();
        cfg.scheduler.max_threads = 8;
        cfg.machine.sample_rate = 44_100;

        save_to_file(&path, &cfg).unwrap();
        assert_eq!(load_from_file(&path), cfg);
    }

    #[test]
    fn sample_period_is_never_zero() {
        let cfg = MachineConfig {
            audio_hz: 1_000,
            sample_rate: 48_000,
            ..MachineConfig::default()
        };
        assert_eq!(cfg.cycles_per_sample(), 1);
        assert_eq!(MachineConfig::default().cycles_per_sample(), 21);
    }
}
