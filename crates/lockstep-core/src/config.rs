use serde::{Deserialize, Serialize};

/// Default upper bound on concurrently live threads.
pub const DEFAULT_MAX_THREADS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `create` fails with `Exhausted` once this many threads are live.
    pub max_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, SchedulerConfig::default());
    }

    #[test]
    fn max_threads_is_read() {
        let cfg: SchedulerConfig = toml::from_str("max_threads = 3").unwrap();
        assert_eq!(cfg.max_threads, 3);
    }
}
