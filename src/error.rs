use crate::lamellae::{AllocError, RdmaError};

/// Status reported for an operation attempted after this image has finalized
pub const STAT_STOPPED_IMAGE: i32 = 6000;

/// Status reported for every other recoverable failure
pub const STAT_FAILED: i32 = 1;

/// The coarray operations that can report a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CafOp {
    Register,
    Deregister,
    SyncAll,
    SyncImages,
    SyncMemory,
    Send,
    Get,
}

impl std::fmt::Display for CafOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CafOp::Register => write!(f, "Failed to allocate coarray"),
            CafOp::Deregister => write!(f, "Failed to deallocate coarray"),
            CafOp::SyncAll => write!(f, "SYNC ALL failed"),
            CafOp::SyncImages => write!(f, "SYNC IMAGES failed"),
            CafOp::SyncMemory => write!(f, "SYNC MEMORY failed"),
            CafOp::Send => write!(f, "Coarray send failed"),
            CafOp::Get => write!(f, "Coarray get failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CafError {
    #[error("{0} - there are stopped images")]
    StoppedImage(CafOp),

    #[error("Failed to allocate coarray")]
    AllocationFailed(#[source] AllocError),

    #[error("{op} - invalid image index {image}, expected 1..={num_images}")]
    InvalidImage {
        op: CafOp,
        image: usize,
        num_images: usize,
    },

    #[error("Failed to deallocate coarray - token {0} is not registered on this image")]
    UnknownToken(usize),

    #[error("{0}: {1}")]
    Transport(CafOp, #[source] RdmaError),

    #[error("Coarray memory freeing failed: {0}")]
    FreeFailed(#[source] AllocError),

    #[error("Failure when initializing the transport: {0}")]
    Init(#[source] AllocError),
}

impl CafError {
    /// The status code handed back to the caller through a status sink
    pub fn stat(&self) -> i32 {
        match self {
            CafError::StoppedImage(_) => STAT_STOPPED_IMAGE,
            _ => STAT_FAILED,
        }
    }

    /// Fatal errors abort every image even when the caller supplied a status sink
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CafError::Transport(..)
                | CafError::FreeFailed(_)
                | CafError::Init(_)
                | CafError::InvalidImage {
                    op: CafOp::Send | CafOp::Get,
                    ..
                }
        )
    }
}

pub type CafResult<T> = Result<T, CafError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_image_messages() {
        assert_eq!(
            CafError::StoppedImage(CafOp::Register).to_string(),
            "Failed to allocate coarray - there are stopped images"
        );
        assert_eq!(
            CafError::StoppedImage(CafOp::Deregister).to_string(),
            "Failed to deallocate coarray - there are stopped images"
        );
        assert_eq!(
            CafError::StoppedImage(CafOp::SyncAll).to_string(),
            "SYNC ALL failed - there are stopped images"
        );
        assert_eq!(
            CafError::StoppedImage(CafOp::SyncImages).to_string(),
            "SYNC IMAGES failed - there are stopped images"
        );
        assert_eq!(CafError::StoppedImage(CafOp::SyncAll).stat(), 6000);
    }

    #[test]
    fn stat_and_fatality() {
        let alloc = CafError::AllocationFailed(AllocError::OutOfMemoryError(8));
        assert_eq!(alloc.to_string(), "Failed to allocate coarray");
        assert_eq!(alloc.stat(), STAT_FAILED);
        assert!(!alloc.is_fatal());
        assert!(!CafError::StoppedImage(CafOp::SyncImages).is_fatal());

        let transport = CafError::Transport(CafOp::Send, RdmaError::InvalidPe(4, 2));
        assert!(transport.is_fatal());
        assert_eq!(
            transport.to_string(),
            "Coarray send failed: pe 4 is not part of this job (2 pes)"
        );
        assert!(CafError::Init(AllocError::Config("x".to_owned())).is_fatal());

        let bad_sync = CafError::InvalidImage {
            op: CafOp::SyncImages,
            image: 9,
            num_images: 2,
        };
        assert!(!bad_sync.is_fatal());
        assert_eq!(bad_sync.stat(), STAT_FAILED);
        assert!(CafError::InvalidImage {
            op: CafOp::Get,
            image: 0,
            num_images: 2
        }
        .is_fatal());
    }
}
