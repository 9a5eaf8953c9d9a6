pub(crate) mod error;

pub use error::{AllocError, RdmaError};
pub(crate) use error::{AllocResult, RdmaResult};

use crate::lamellae::{local_lamellae::LocalSegment, shmem_lamellae::fabric::ShmemAlloc};

use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

/// Every share of a symmetric allocation is padded to this many bytes so
/// that the atomic counters living inside it are always naturally aligned.
pub(crate) const SHARE_ALIGN: usize = std::mem::size_of::<usize>();

pub(crate) fn share_size(size: usize) -> usize {
    let size = size.max(1);
    (size + SHARE_ALIGN - 1) / SHARE_ALIGN * SHARE_ALIGN
}

/// Keeps the backing memory of a symmetric allocation alive until it is freed.
#[derive(Clone)]
pub(crate) enum CommAllocInner {
    Local(Arc<LocalSegment>),
    Shmem(Arc<ShmemAlloc>),
}

/// A collectively created allocation.
///
/// `addrs[pe]` is the start of `pe`'s share expressed in `pe`'s own address
/// space, which is the form every remote operation expects.
#[derive(Clone)]
pub(crate) struct CommAlloc {
    pub(crate) addrs: Vec<usize>,
    pub(crate) size: usize,
    pub(crate) my_pe: usize,
    pub(crate) inner_alloc: CommAllocInner,
}

impl std::fmt::Debug for CommAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.inner_alloc {
            CommAllocInner::Local(_) => "local",
            CommAllocInner::Shmem(_) => "shmem",
        };
        f.debug_struct("CommAlloc")
            .field("addrs", &self.addrs)
            .field("size", &self.size)
            .field("my_pe", &self.my_pe)
            .field("backend", &backend)
            .finish()
    }
}

impl CommAlloc {
    pub(crate) fn local_addr(&self) -> usize {
        self.addrs[self.my_pe]
    }

    pub(crate) fn is_same(&self, other: &CommAlloc) -> bool {
        match (&self.inner_alloc, &other.inner_alloc) {
            (CommAllocInner::Local(a), CommAllocInner::Local(b)) => Arc::ptr_eq(a, b),
            (CommAllocInner::Shmem(a), CommAllocInner::Shmem(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub(crate) fn check_remote_range(
    pe: usize,
    addr: usize,
    len: usize,
    start: usize,
    size: usize,
) -> RdmaResult<usize> {
    if start <= addr && addr + len <= start + size {
        Ok(addr - start)
    } else {
        Err(RdmaError::RemoteNotFound { pe, addr, len })
    }
}

/// # Safety
/// `ptr` must point into a live mapping that is at least 4 bytes long.
pub(crate) unsafe fn atomic_i32_at<'a>(ptr: *mut u8) -> RdmaResult<&'a AtomicI32> {
    if (ptr as usize) % std::mem::align_of::<AtomicI32>() != 0 {
        return Err(RdmaError::Misaligned(ptr as usize));
    }
    Ok(&*(ptr as *const AtomicI32))
}

/// Spin until the lock word flips from 0 to 1.
///
/// `progress` runs between attempts, which is where transports notice a
/// collective abort raised by another pe.
pub(crate) fn spin_lock(slot: &AtomicIsize, mut progress: impl FnMut()) {
    while slot
        .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        progress();
        std::thread::yield_now();
    }
}

pub(crate) fn spin_unlock(slot: &AtomicIsize) {
    slot.store(0, Ordering::Release);
}

/// Central counting barrier: the last pe to arrive resets the counter and
/// bumps the generation everyone else is waiting on.
pub(crate) fn generation_barrier(
    count: &AtomicUsize,
    generation: &AtomicUsize,
    num_pes: usize,
    mut progress: impl FnMut(),
) {
    let gen = generation.load(Ordering::SeqCst);
    if count.fetch_add(1, Ordering::SeqCst) + 1 == num_pes {
        count.store(0, Ordering::SeqCst);
        generation.fetch_add(1, Ordering::SeqCst);
    } else {
        while generation.load(Ordering::SeqCst) == gen {
            progress();
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_size_rounds_to_alignment() {
        assert_eq!(share_size(0), SHARE_ALIGN);
        assert_eq!(share_size(1), SHARE_ALIGN);
        assert_eq!(share_size(SHARE_ALIGN), SHARE_ALIGN);
        assert_eq!(share_size(SHARE_ALIGN + 1), 2 * SHARE_ALIGN);
    }

    #[test]
    fn remote_range() {
        assert_eq!(check_remote_range(1, 0x1008, 4, 0x1000, 16).unwrap(), 8);
        assert!(check_remote_range(1, 0x100e, 4, 0x1000, 16).is_err());
        assert!(check_remote_range(1, 0x0ff8, 4, 0x1000, 16).is_err());
    }

    #[test]
    fn barrier_releases_all_threads() {
        let count = Arc::new(AtomicUsize::new(0));
        let generation = Arc::new(AtomicUsize::new(0));
        let num_pes = 4;
        let handles = (0..num_pes)
            .map(|_| {
                let count = count.clone();
                let generation = generation.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        generation_barrier(&count, &generation, num_pes, || {});
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(generation.load(Ordering::SeqCst), 10);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn spin_lock_serializes_increments() {
        let lock = Arc::new(AtomicIsize::new(0));
        let value = Arc::new(AtomicUsize::new(0));
        let handles = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let value = value.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        spin_lock(&lock, || {});
                        let v = value.load(Ordering::Relaxed);
                        value.store(v + 1, Ordering::Relaxed);
                        spin_unlock(&lock);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(value.load(Ordering::SeqCst), 4000);
    }
}
