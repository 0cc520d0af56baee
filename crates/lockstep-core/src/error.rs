use thiserror::Error;

use crate::thread::ThreadId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("thread {0} does not exist or was destroyed")]
    InvalidThread(ThreadId),

    #[error("{0} requires an idle scheduler")]
    Busy(&'static str),

    #[error("thread limit reached ({limit} live threads)")]
    Exhausted { limit: usize },

    #[error("invalid frequency: {0} Hz")]
    InvalidFrequency(u64),

    #[error("no primary thread; call power() first")]
    NoPrimary,

    #[error("circular synchronization: {caller} waited on {target}, which is already running")]
    CircularSynchronization { caller: ThreadId, target: ThreadId },

    #[error("thread {0} has terminated")]
    Terminated(ThreadId),

    #[error("a thread suspended without raising an exit event")]
    Stalled,

    #[error("scheduler no longer exists")]
    Detached,

    #[error("save state does not match the loaded threads: {0}")]
    SaveStateMismatch(String),

    #[error("unsupported save state version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
