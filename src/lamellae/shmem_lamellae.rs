pub(crate) mod fabric;

use crate::config;
use crate::lamellae::comm::{
    atomic_i32_at, spin_lock, spin_unlock, AllocError, AllocResult, CommAlloc, RdmaResult,
};
use crate::lamellae::{Backend, Lamellae, LamellaeComm, LamellaeInit, LamellaeRDMA};
use fabric::ShmemFabric;

use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct ShmemBuilder {
    my_pe: usize,
    num_pes: usize,
    job_id: usize,
    heap_size: Option<usize>,
}

impl ShmemBuilder {
    pub(crate) fn new() -> ShmemBuilder {
        ShmemBuilder {
            my_pe: config().pe_id,
            num_pes: config().num_pes,
            job_id: config().job_id,
            heap_size: config().heap_size,
        }
    }
}

impl LamellaeInit for ShmemBuilder {
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)> {
        if self.num_pes == 0 || self.my_pe >= self.num_pes {
            return Err(AllocError::Config(format!(
                "LAMELLAR_PE_ID={} is not within LAMELLAR_NUM_PES={}",
                self.my_pe, self.num_pes
            )));
        }
        Ok((self.my_pe, self.num_pes))
    }
    fn init_lamellae(&mut self) -> AllocResult<Arc<Lamellae>> {
        let (my_pe, num_pes) = self.init_fabric()?;
        let fabric = ShmemFabric::new(num_pes, my_pe, self.job_id, self.heap_size)?;
        let shmem = Shmem {
            my_pe,
            num_pes,
            fabric,
        };
        // every pe must be attached to the header before anyone relies on it
        shmem.barrier();
        Ok(Arc::new(Lamellae::Shmem(shmem)))
    }
}

pub(crate) struct Shmem {
    my_pe: usize,
    num_pes: usize,
    fabric: ShmemFabric,
}

impl std::fmt::Debug for Shmem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Shmem {{ my_pe: {}, num_pes: {}, fabric: {:?} }}",
            self.my_pe, self.num_pes, self.fabric,
        )
    }
}

impl LamellaeComm for Shmem {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Shmem
    }
    fn barrier(&self) {
        self.fabric.barrier(|| self.progress());
    }
    fn fence(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }
    fn progress(&self) {
        if let Some(code) = self.fabric.abort_code() {
            std::process::exit(code);
        }
    }
    fn shutdown(&self) {
        // the header segment is unlinked when its creator drops it
        self.barrier();
    }
    fn abort(&self, code: i32) {
        self.fabric.raise_abort(code);
        std::process::exit(code);
    }
}

impl LamellaeRDMA for Shmem {
    fn alloc(&self, size: usize) -> AllocResult<CommAlloc> {
        self.fabric.alloc(size, || self.progress())
    }
    fn free(&self, alloc: CommAlloc) -> AllocResult<()> {
        self.fabric.free(&alloc)
    }
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        let dst = self.fabric.local_ptr(pe, dst, src.len())?;
        unsafe { std::ptr::copy(src.as_ptr(), dst, src.len()) };
        Ok(())
    }
    // stores into the mapping are complete when the copy returns
    fn iput(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        self.put(pe, src, dst)
    }
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult {
        let src = self.fabric.local_ptr(pe, src, dst.len())?;
        unsafe { std::ptr::copy(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
    fn atomic_load(&self, pe: usize, remote: usize) -> RdmaResult<i32> {
        let ptr = self
            .fabric
            .local_ptr(pe, remote, std::mem::size_of::<i32>())?;
        Ok(unsafe { atomic_i32_at(ptr)? }.load(Ordering::SeqCst))
    }
    fn atomic_store(&self, pe: usize, val: i32, remote: usize) -> RdmaResult {
        let ptr = self
            .fabric
            .local_ptr(pe, remote, std::mem::size_of::<i32>())?;
        unsafe { atomic_i32_at(ptr)? }.store(val, Ordering::SeqCst);
        Ok(())
    }
    fn lock(&self, pe: usize) {
        spin_lock(self.fabric.lock_word(pe), || self.progress());
    }
    fn unlock(&self, pe: usize) {
        spin_unlock(self.fabric.lock_word(pe));
    }
    fn mem_occupied(&self) -> usize {
        self.fabric.occupied()
    }
}
