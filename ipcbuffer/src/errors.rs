use thiserror::Error;

pub type Result<T, E = IpcBufferError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum IpcBufferError {
    #[error("{what} out of bounds: {value} (length {length})")]
    OutOfBounds {
        what: &'static str,
        value: usize,
        length: usize,
    },

    #[error("Unknown encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Argument {position} needs to be {expected}")]
    InvalidArgument {
        position: usize,
        expected: &'static str,
    },

    #[error("end {end} < start {start}")]
    InvalidRange { start: usize, end: usize },

    #[error("Shared segment is {actual} bytes but {requested} were requested")]
    SegmentTooSmall { requested: usize, actual: usize },

    #[error("Could not allocate {requested} bytes")]
    AllocationFailed { requested: usize },

    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] shared_memory::ShmemError),

    // raw_sync hands back a non-Send Box<dyn Error>, only its message is kept.
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Mutex was poisoned")]
    PoisonedLock,

    #[error("The default pool is already in use and can no longer be configured")]
    AlreadyConfigured,
}

impl IpcBufferError {
    pub(crate) fn out_of_bounds(what: &'static str, value: usize, length: usize) -> Self {
        IpcBufferError::OutOfBounds {
            what,
            value,
            length,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for IpcBufferError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        IpcBufferError::PoisonedLock
    }
}
