use std::sync::Arc;

/// The kinds of registration a caller can request.
///
/// `*Static` registrations live for the whole program: they are appended to the
/// static registration list and released, newest first, by
/// [finalize][crate::CafRuntime::finalize].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationKind {
    CoarrayStatic,
    CoarrayAlloc,
    LockStatic,
    LockAlloc,
}

impl RegistrationKind {
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            RegistrationKind::CoarrayStatic | RegistrationKind::LockStatic
        )
    }
}

/// Addressing handle for one symmetric registration.
///
/// Holds the base address of every image's share, each in the owning image's
/// address space, so any image can name any other image's share. Cloning a
/// token copies the handle; the memory itself is released only through
/// [deregister][crate::CafRuntime::deregister] or, for static kinds,
/// [finalize][crate::CafRuntime::finalize].
#[derive(Debug, Clone)]
pub struct CoarrayToken {
    id: usize,
    this_image: usize,
    size: usize,
    addrs: Arc<[usize]>,
}

impl CoarrayToken {
    pub(crate) fn new(id: usize, this_image: usize, size: usize, addrs: Vec<usize>) -> CoarrayToken {
        CoarrayToken {
            id,
            this_image,
            size,
            addrs: addrs.into(),
        }
    }

    /// Identifier of the registration, unique within this image
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of bytes registered on every image
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of images the registration spans, always `num_images()`
    pub fn num_images(&self) -> usize {
        self.addrs.len()
    }

    /// Base address of `image`'s share (1-based `image`), as seen by that image
    pub fn remote_addr(&self, image: usize) -> Option<usize> {
        if image == 0 {
            return None;
        }
        self.addrs.get(image - 1).copied()
    }

    /// This image's share, usable directly by this image
    pub fn local_ptr(&self) -> *mut u8 {
        self.addrs[self.this_image - 1] as *mut u8
    }

    /// View this image's share as bytes
    ///
    /// # Safety
    /// The registration must still be live, and no other image may be writing
    /// into this share concurrently (separate the accesses with a sync).
    pub unsafe fn local_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.local_ptr(), self.size)
    }

    /// Mutable view of this image's share
    ///
    /// # Safety
    /// Same as [local_slice][CoarrayToken::local_slice], and the caller must not
    /// hold any other view of the share while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn local_slice_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.local_ptr(), self.size)
    }
}
