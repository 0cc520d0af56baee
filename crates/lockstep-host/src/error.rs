use lockstep_core::Event;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Scheduler(#[from] lockstep_core::Error),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse save file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to encode save file: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid machine config: {0}")]
    Config(String),

    #[error("machine stopped: {0}")]
    Stopped(Event),
}
