use crate::config;
use crate::lamellae::comm::{
    atomic_i32_at, check_remote_range, generation_barrier, share_size, spin_lock, spin_unlock,
    AllocError, AllocResult, CommAlloc, CommAllocInner, RdmaError, RdmaResult, SHARE_ALIGN,
};
use crate::lamellae::{Backend, Lamellae, LamellaeComm, LamellaeInit, LamellaeRDMA};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

struct MyPtr {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}
unsafe impl Send for MyPtr {}
unsafe impl Sync for MyPtr {}

impl Drop for MyPtr {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

/// One symmetric allocation of the in-process fabric: a zeroed share per pe.
pub(crate) struct LocalSegment {
    shares: Vec<MyPtr>,
}

impl LocalSegment {
    fn new(num_pes: usize, share: usize) -> AllocResult<LocalSegment> {
        let layout = std::alloc::Layout::from_size_align(share, SHARE_ALIGN)
            .map_err(|_| AllocError::OutOfMemoryError(share))?;
        let mut shares = Vec::with_capacity(num_pes);
        for _ in 0..num_pes {
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(AllocError::OutOfMemoryError(share));
            }
            shares.push(MyPtr { ptr, layout });
        }
        Ok(LocalSegment { shares })
    }
}

struct PendingSegment {
    segment: Arc<LocalSegment>,
    attached: usize,
}

struct LocalFabricInner {
    num_pes: usize,
    heap_size: Option<usize>,
    locks: Vec<AtomicIsize>,
    barrier_cnt: AtomicUsize,
    barrier_gen: AtomicUsize,
    aborted: AtomicBool,
    abort_code: AtomicI32,
    // allocations some, but not yet all, pes have attached to; keyed by allocation sequence number
    pending: Mutex<HashMap<usize, PendingSegment>>,
}

/// An in-process fabric hosting `num_pes` images that share one address space.
///
/// Each image is driven by its own thread and its own runtime handle, built with
/// [CafRuntimeBuilder::with_local_fabric][crate::CafRuntimeBuilder::with_local_fabric].
/// Cloning the fabric yields another handle to the same set of images.
///
/// # Examples
///```
/// use lamellar_caf::{CafRuntimeBuilder, LocalFabric};
///
/// let fabric = LocalFabric::new(2);
/// let handles: Vec<_> = (0..2)
///     .map(|pe| {
///         let fabric = fabric.clone();
///         std::thread::spawn(move || {
///             let caf = CafRuntimeBuilder::new().with_local_fabric(fabric, pe).build();
///             caf.sync_all().expect("sync all");
///             caf.finalize();
///         })
///     })
///     .collect();
/// for h in handles {
///     h.join().unwrap();
/// }
///```
#[derive(Clone)]
pub struct LocalFabric {
    inner: Arc<LocalFabricInner>,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFabric")
            .field("num_pes", &self.inner.num_pes)
            .field("heap_size", &self.inner.heap_size)
            .finish()
    }
}

impl LocalFabric {
    /// Create a fabric for `num_pes` images, capping registered memory per image at `LAMELLAR_HEAP_SIZE` if set
    pub fn new(num_pes: usize) -> LocalFabric {
        LocalFabric::build(num_pes, config().heap_size)
    }

    /// Create a fabric whose images may each register at most `heap_size` bytes
    pub fn with_heap_size(num_pes: usize, heap_size: usize) -> LocalFabric {
        LocalFabric::build(num_pes, Some(heap_size))
    }

    fn build(num_pes: usize, heap_size: Option<usize>) -> LocalFabric {
        let num_pes = num_pes.max(1);
        LocalFabric {
            inner: Arc::new(LocalFabricInner {
                num_pes,
                heap_size,
                locks: (0..num_pes).map(|_| AtomicIsize::new(0)).collect(),
                barrier_cnt: AtomicUsize::new(0),
                barrier_gen: AtomicUsize::new(0),
                aborted: AtomicBool::new(false),
                abort_code: AtomicI32::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of images hosted by this fabric
    pub fn num_pes(&self) -> usize {
        self.inner.num_pes
    }
}

pub(crate) struct LocalBuilder {
    fabric: LocalFabric,
    my_pe: usize,
}

impl LocalBuilder {
    pub(crate) fn new(fabric: LocalFabric, my_pe: usize) -> LocalBuilder {
        LocalBuilder { fabric, my_pe }
    }
}

impl LamellaeInit for LocalBuilder {
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)> {
        if self.my_pe >= self.fabric.num_pes() {
            return Err(AllocError::Config(format!(
                "pe {} requested from a local fabric of {} pes",
                self.my_pe,
                self.fabric.num_pes()
            )));
        }
        Ok((self.my_pe, self.fabric.num_pes()))
    }
    fn init_lamellae(&mut self) -> AllocResult<Arc<Lamellae>> {
        let (my_pe, num_pes) = self.init_fabric()?;
        Ok(Arc::new(Lamellae::Local(Local {
            my_pe,
            num_pes,
            fabric: self.fabric.inner.clone(),
            next_alloc: AtomicUsize::new(0),
            occupied: AtomicUsize::new(0),
            allocs: RwLock::new(Vec::new()),
        })))
    }
}

pub(crate) struct Local {
    my_pe: usize,
    num_pes: usize,
    fabric: Arc<LocalFabricInner>,
    next_alloc: AtomicUsize,
    occupied: AtomicUsize,
    allocs: RwLock<Vec<CommAlloc>>,
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Local {{ my_pe: {}, num_pes: {}, occupied: {} }}",
            self.my_pe,
            self.num_pes,
            self.occupied.load(Ordering::Relaxed)
        )
    }
}

impl Local {
    // both pes share one address space, so a remote address is directly usable once validated
    fn translate(&self, pe: usize, addr: usize, len: usize) -> RdmaResult<*mut u8> {
        if pe >= self.num_pes {
            return Err(RdmaError::InvalidPe(pe, self.num_pes));
        }
        let allocs = self.allocs.read();
        for alloc in allocs.iter() {
            if check_remote_range(pe, addr, len, alloc.addrs[pe], alloc.size).is_ok() {
                return Ok(addr as *mut u8);
            }
        }
        Err(RdmaError::RemoteNotFound { pe, addr, len })
    }

    fn attach(&self, id: usize, share: usize) -> AllocResult<Arc<LocalSegment>> {
        let mut pending = self.fabric.pending.lock();
        let segment = match pending.get_mut(&id) {
            Some(entry) => {
                entry.attached += 1;
                entry.segment.clone()
            }
            None => {
                let segment = Arc::new(LocalSegment::new(self.num_pes, share)?);
                pending.insert(
                    id,
                    PendingSegment {
                        segment: segment.clone(),
                        attached: 1,
                    },
                );
                segment
            }
        };
        if pending.get(&id).map_or(false, |e| e.attached == self.num_pes) {
            pending.remove(&id);
        }
        Ok(segment)
    }
}

impl LamellaeComm for Local {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn barrier(&self) {
        generation_barrier(
            &self.fabric.barrier_cnt,
            &self.fabric.barrier_gen,
            self.num_pes,
            || self.progress(),
        );
    }
    fn fence(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }
    fn progress(&self) {
        if self.fabric.aborted.load(Ordering::SeqCst) {
            std::process::exit(self.fabric.abort_code.load(Ordering::SeqCst));
        }
    }
    fn shutdown(&self) {
        self.barrier();
    }
    fn abort(&self, code: i32) {
        if self
            .fabric
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.fabric.abort_code.store(code, Ordering::SeqCst);
        }
        // every image of the fabric lives in this process
        std::process::exit(code);
    }
}

impl LamellaeRDMA for Local {
    #[tracing::instrument(skip_all, level = "debug")]
    fn alloc(&self, size: usize) -> AllocResult<CommAlloc> {
        let share = share_size(size);
        if let Some(limit) = self.fabric.heap_size {
            if self.occupied.load(Ordering::SeqCst) + share > limit {
                return Err(AllocError::OutOfMemoryError(size));
            }
        }
        let id = self.next_alloc.fetch_add(1, Ordering::SeqCst);
        let segment = self.attach(id, share)?;
        let alloc = CommAlloc {
            addrs: segment.shares.iter().map(|s| s.ptr as usize).collect(),
            size: share,
            my_pe: self.my_pe,
            inner_alloc: CommAllocInner::Local(segment),
        };
        self.occupied.fetch_add(share, Ordering::SeqCst);
        self.allocs.write().push(alloc.clone());
        trace!(
            "pe {} attached local alloc {} of {} bytes at {:x}",
            self.my_pe,
            id,
            share,
            alloc.local_addr()
        );
        Ok(alloc)
    }

    fn free(&self, alloc: CommAlloc) -> AllocResult<()> {
        let mut allocs = self.allocs.write();
        match allocs.iter().position(|a| a.is_same(&alloc)) {
            Some(i) => {
                let removed = allocs.remove(i);
                self.occupied.fetch_sub(removed.size, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AllocError::LocalNotFound(alloc.local_addr())),
        }
    }

    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        let dst = self.translate(pe, dst, src.len())?;
        unsafe { std::ptr::copy(src.as_ptr(), dst, src.len()) };
        Ok(())
    }

    // puts complete before returning, so the non-blocking variant is the same operation
    fn iput(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        self.put(pe, src, dst)
    }

    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult {
        let src = self.translate(pe, src, dst.len())?;
        unsafe { std::ptr::copy(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    fn atomic_load(&self, pe: usize, remote: usize) -> RdmaResult<i32> {
        let ptr = self.translate(pe, remote, std::mem::size_of::<i32>())?;
        Ok(unsafe { atomic_i32_at(ptr)? }.load(Ordering::SeqCst))
    }

    fn atomic_store(&self, pe: usize, val: i32, remote: usize) -> RdmaResult {
        let ptr = self.translate(pe, remote, std::mem::size_of::<i32>())?;
        unsafe { atomic_i32_at(ptr)? }.store(val, Ordering::SeqCst);
        Ok(())
    }

    fn lock(&self, pe: usize) {
        spin_lock(&self.fabric.locks[pe], || self.progress());
    }

    fn unlock(&self, pe: usize) {
        spin_unlock(&self.fabric.locks[pe]);
    }

    fn mem_occupied(&self) -> usize {
        self.occupied.load(Ordering::SeqCst)
    }
}
