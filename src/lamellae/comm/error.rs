#[derive(Debug, Clone, thiserror::Error)]
pub enum AllocError {
    #[error("not enough memory for to allocate {0} bytes")]
    OutOfMemoryError(usize),
    #[error("Allocation not found locally for given address {0:x}")]
    LocalNotFound(usize),
    #[error("unable to attach shared memory segment {0}: {1}")]
    ShmemAttach(String, String),
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

pub(crate) type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum RdmaError {
    #[error("pe {0} is not part of this job ({1} pes)")]
    InvalidPe(usize, usize),
    #[error("remote address {addr:x} (+{len} bytes) on pe {pe} is not in a registered allocation")]
    RemoteNotFound { pe: usize, addr: usize, len: usize },
    #[error("remote address {0:x} is not aligned for an atomic access")]
    Misaligned(usize),
    #[error("transfer of {len} bytes at offset {offset} exceeds registration of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

pub(crate) type RdmaResult<T = ()> = Result<T, RdmaError>;
