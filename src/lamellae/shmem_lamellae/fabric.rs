use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use shared_memory::*;
use tracing::trace;

use crate::lamellae::comm::{
    check_remote_range, generation_barrier, share_size, AllocError, AllocResult, CommAlloc,
    CommAllocInner, RdmaError, RdmaResult,
};

pub(crate) struct ShmemHandle {
    base_addr: *mut u8,
    num_bytes: usize,
    _shmem: Shmem,
}

unsafe impl Sync for ShmemHandle {}
unsafe impl Send for ShmemHandle {}

impl ShmemHandle {
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base_addr
    }
    pub(crate) fn num_bytes(&self) -> usize {
        self.num_bytes
    }
}

#[tracing::instrument(skip_all, level = "debug")]
fn attach_to_shmem(
    job_id: usize,
    size: usize,
    id: &str,
    header: usize,
    create: bool,
) -> AllocResult<ShmemHandle> {
    let header_len = std::mem::size_of::<usize>();
    let shmem_size = header_len + size;

    let shmem_id =
        "lamellar_caf_".to_owned() + &job_id.to_string() + "_" + &shmem_size.to_string() + "_" + id;
    let mut retry = 0;
    let m = loop {
        match ShmemConf::new()
            .size(shmem_size)
            .os_id(shmem_id.clone())
            .create()
        {
            Ok(m) => break Ok(m),
            Err(ShmemError::LinkExists)
            | Err(ShmemError::MappingIdExists)
            | Err(ShmemError::MapOpenFailed(_)) => {
                match ShmemConf::new().os_id(shmem_id.clone()).open() {
                    Ok(m) => break Ok(m),
                    Err(ShmemError::MapOpenFailed(_)) if retry < 5 => {
                        retry += 1;
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                    Err(e) => break Err(e),
                }
            }
            Err(e) => break Err(e),
        }
    };
    let m = m.map_err(|e| AllocError::ShmemAttach(shmem_id.clone(), e.to_string()))?;

    let header_word = unsafe { &*(m.as_ptr() as *const AtomicUsize) };
    if create {
        header_word.store(header, Ordering::SeqCst);
    }
    while header_word.load(Ordering::SeqCst) != header {
        std::thread::yield_now()
    }
    trace!("shmem attached {:?} header {:?}", shmem_id, header);

    Ok(ShmemHandle {
        base_addr: unsafe { m.as_ptr().add(header_len) },
        num_bytes: size,
        _shmem: m,
    })
}

/// One symmetric allocation: `num_pes` consecutive shares inside a single segment.
pub(crate) struct ShmemAlloc {
    share: usize,
    handle: ShmemHandle,
}

impl ShmemAlloc {
    pub(crate) fn share_ptr(&self, pe: usize) -> *mut u8 {
        unsafe { self.handle.base_ptr().add(pe * self.share) }
    }
}

impl std::fmt::Debug for ShmemAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemAlloc")
            .field("base", &self.handle.base_ptr())
            .field("num_bytes", &self.handle.num_bytes())
            .field("share", &self.share)
            .finish()
    }
}

// words at the front of the job-wide header segment, followed by the
// per-pe lock words and the per-pe address exchange slots
#[repr(C)]
struct ShmemHeader {
    aborted: AtomicUsize,
    abort_code: AtomicIsize,
    barrier_cnt: AtomicUsize,
    barrier_gen: AtomicUsize,
}

pub(crate) struct ShmemFabric {
    header: ShmemHandle,
    my_pe: usize,
    num_pes: usize,
    job_id: usize,
    heap_size: Option<usize>,
    next_id: AtomicUsize,
    occupied: AtomicUsize,
    allocs: RwLock<Vec<CommAlloc>>,
}

impl std::fmt::Debug for ShmemFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemFabric")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("job_id", &self.job_id)
            .finish()
    }
}

impl ShmemFabric {
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn new(
        num_pes: usize,
        pe: usize,
        job_id: usize,
        heap_size: Option<usize>,
    ) -> AllocResult<ShmemFabric> {
        let size = std::mem::size_of::<ShmemHeader>()
            + std::mem::size_of::<AtomicIsize>() * num_pes
            + std::mem::size_of::<AtomicUsize>() * num_pes;
        let header = attach_to_shmem(job_id, size, "header", job_id + 1, pe == 0)?;
        trace!("new shmem fabric! base_pointer {:?}", header.base_ptr());
        Ok(ShmemFabric {
            header,
            my_pe: pe,
            num_pes,
            job_id,
            heap_size,
            next_id: AtomicUsize::new(0),
            occupied: AtomicUsize::new(0),
            allocs: RwLock::new(vec![]),
        })
    }

    fn header(&self) -> &ShmemHeader {
        unsafe { &*(self.header.base_ptr() as *const ShmemHeader) }
    }

    fn locks(&self) -> &[AtomicIsize] {
        unsafe {
            let ptr = self
                .header
                .base_ptr()
                .add(std::mem::size_of::<ShmemHeader>());
            std::slice::from_raw_parts(ptr as *const AtomicIsize, self.num_pes)
        }
    }

    fn addr_slots(&self) -> &[AtomicUsize] {
        unsafe {
            let ptr = self.header.base_ptr().add(
                std::mem::size_of::<ShmemHeader>()
                    + std::mem::size_of::<AtomicIsize>() * self.num_pes,
            );
            std::slice::from_raw_parts(ptr as *const AtomicUsize, self.num_pes)
        }
    }

    pub(crate) fn lock_word(&self, pe: usize) -> &AtomicIsize {
        &self.locks()[pe]
    }

    pub(crate) fn abort_code(&self) -> Option<i32> {
        let header = self.header();
        if header.aborted.load(Ordering::SeqCst) != 0 {
            Some(header.abort_code.load(Ordering::SeqCst) as i32)
        } else {
            None
        }
    }

    pub(crate) fn raise_abort(&self, code: i32) {
        let header = self.header();
        if header
            .aborted
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            header.abort_code.store(code as isize, Ordering::SeqCst);
        }
    }

    pub(crate) fn barrier(&self, progress: impl FnMut()) {
        let header = self.header();
        generation_barrier(
            &header.barrier_cnt,
            &header.barrier_gen,
            self.num_pes,
            progress,
        );
    }

    /// Collective: every pe attaches the same segment, then the pes swap the
    /// address their own share is mapped at.
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn alloc(&self, size: usize, mut progress: impl FnMut()) -> AllocResult<CommAlloc> {
        let share = share_size(size);
        if let Some(limit) = self.heap_size {
            if self.occupied.load(Ordering::SeqCst) + share > limit {
                return Err(AllocError::OutOfMemoryError(size));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = attach_to_shmem(
            self.job_id,
            share * self.num_pes,
            &id.to_string(),
            id + 1,
            self.my_pe == 0,
        )?;
        let alloc = Arc::new(ShmemAlloc { share, handle });

        let slots = self.addr_slots();
        slots[self.my_pe].store(alloc.share_ptr(self.my_pe) as usize, Ordering::SeqCst);
        self.barrier(&mut progress);
        let addrs = slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .collect::<Vec<_>>();
        // nobody may overwrite the slots before everyone has read them
        self.barrier(&mut progress);

        trace!(
            "attached {:?} {:?} my share: {:?}",
            self.my_pe,
            alloc,
            alloc.share_ptr(self.my_pe)
        );
        let comm_alloc = CommAlloc {
            addrs,
            size: share,
            my_pe: self.my_pe,
            inner_alloc: CommAllocInner::Shmem(alloc),
        };
        self.occupied.fetch_add(share, Ordering::SeqCst);
        self.allocs.write().push(comm_alloc.clone());
        Ok(comm_alloc)
    }

    pub(crate) fn free(&self, alloc: &CommAlloc) -> AllocResult<()> {
        let mut allocs = self.allocs.write();
        match allocs.iter().position(|a| a.is_same(alloc)) {
            Some(i) => {
                let removed = allocs.remove(i);
                self.occupied.fetch_sub(removed.size, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AllocError::LocalNotFound(alloc.local_addr())),
        }
    }

    /// Map an address published by `pe` onto this pe's mapping of the same segment.
    pub(crate) fn local_ptr(&self, pe: usize, remote_addr: usize, len: usize) -> RdmaResult<*mut u8> {
        if pe >= self.num_pes {
            return Err(RdmaError::InvalidPe(pe, self.num_pes));
        }
        let allocs = self.allocs.read();
        for alloc in allocs.iter() {
            if let Ok(offset) = check_remote_range(pe, remote_addr, len, alloc.addrs[pe], alloc.size)
            {
                if let CommAllocInner::Shmem(shmem_alloc) = &alloc.inner_alloc {
                    return Ok(unsafe { shmem_alloc.share_ptr(pe).add(offset) });
                }
            }
        }
        Err(RdmaError::RemoteNotFound {
            pe,
            addr: remote_addr,
            len,
        })
    }

    pub(crate) fn occupied(&self) -> usize {
        self.occupied.load(Ordering::SeqCst)
    }
}
