use crate::config;
use std::sync::Arc;

use enum_dispatch::enum_dispatch;

pub(crate) mod comm;
pub use comm::{AllocError, RdmaError};
pub(crate) use comm::{AllocResult, CommAlloc, RdmaResult};

pub(crate) mod local_lamellae;
pub use local_lamellae::LocalFabric;
use local_lamellae::{Local, LocalBuilder};

pub(crate) mod shmem_lamellae;
use shmem_lamellae::{Shmem, ShmemBuilder};

/// The list of available lamellae backends, used to specify how data is transfered between images
#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
pub enum Backend {
    /// The Local backend -- every image lives inside this process
    Local,
    /// The Shmem backend -- intended for multi process single node environments
    Shmem,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "shmem" => Backend::Shmem,
            _ => Backend::Local,
        }
    }
}

#[enum_dispatch(LamellaeInit)]
pub(crate) enum LamellaeBuilder {
    ShmemBuilder,
    LocalBuilder,
}

#[enum_dispatch]
pub(crate) trait LamellaeInit {
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)>; //(my_pe,num_pes)
    fn init_lamellae(&mut self) -> AllocResult<Arc<Lamellae>>;
}

#[enum_dispatch(LamellaeComm, LamellaeRDMA)]
#[derive(Debug)]
pub(crate) enum Lamellae {
    Shmem,
    Local,
}

#[enum_dispatch]
pub(crate) trait LamellaeComm {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    // this is a global barrier over every pe of the job
    fn barrier(&self);
    fn fence(&self);
    /// Drive the transport between spins; a raised collective abort terminates this pe here.
    fn progress(&self);
    fn shutdown(&self);
    /// Raise the collective abort flag and terminate this pe.
    fn abort(&self, code: i32);
}

#[enum_dispatch]
pub(crate) trait LamellaeRDMA {
    /// Collective: every pe must call alloc with the same size in the same order.
    fn alloc(&self, size: usize) -> AllocResult<CommAlloc>;
    fn free(&self, alloc: CommAlloc) -> AllocResult<()>;
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult;
    fn iput(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult;
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult;
    fn atomic_load(&self, pe: usize, remote: usize) -> RdmaResult<i32>;
    fn atomic_store(&self, pe: usize, val: i32, remote: usize) -> RdmaResult;
    /// Acquire the mutex owned by `pe`.
    fn lock(&self, pe: usize);
    fn unlock(&self, pe: usize);
    fn mem_occupied(&self) -> usize;
}

pub(crate) fn create_lamellae(backend: Backend) -> LamellaeBuilder {
    match backend {
        Backend::Shmem => LamellaeBuilder::ShmemBuilder(ShmemBuilder::new()),
        Backend::Local => LamellaeBuilder::LocalBuilder(LocalBuilder::new(LocalFabric::new(1), 0)),
    }
}

/// Holds the mutex of `pe` until dropped.
pub(crate) struct RemoteLockGuard<'a> {
    lamellae: &'a Lamellae,
    pe: usize,
}

impl<'a> RemoteLockGuard<'a> {
    pub(crate) fn new(lamellae: &'a Lamellae, pe: usize) -> RemoteLockGuard<'a> {
        lamellae.lock(pe);
        RemoteLockGuard { lamellae, pe }
    }
}

impl Drop for RemoteLockGuard<'_> {
    fn drop(&mut self) {
        self.lamellae.unlock(self.pe);
    }
}
