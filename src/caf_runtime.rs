use crate::abort;
use crate::image::ImageRegistry;
use crate::lamellae::local_lamellae::LocalBuilder;
use crate::lamellae::{
    create_lamellae, Backend, Lamellae, LamellaeBuilder, LamellaeComm, LamellaeRDMA, LocalFabric,
};
use crate::registration::RegistrationTable;
use crate::status::StatusSink;
use crate::sync::{self, Images, SyncState};
use crate::token::{CoarrayToken, RegistrationKind};
use crate::transfer;
use crate::warnings::RuntimeWarning;
use crate::{config, CafError, CafOp, CafResult};

use parking_lot::Mutex;
use tracing::debug;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

#[derive(Debug, Default)]
struct CafState {
    sync: Option<SyncState>,
    table: RegistrationTable,
}

/// The coarray runtime of one image.
///
/// Every image of a job owns exactly one `CafRuntime`. The transport is brought
/// up lazily by the first operation (or an explicit [init][CafRuntime::init]), and
/// torn down by [finalize][CafRuntime::finalize]; after that registration and
/// synchronization report [STAT_STOPPED_IMAGE][crate::STAT_STOPPED_IMAGE].
///
/// Fallible operations return a [CafResult]. [report][CafRuntime::report]
/// turns a result into the status/errmsg convention, aborting every image when
/// no [StatusSink] is given or the error is fatal.
///
/// # Examples
///```
/// use lamellar_caf::{CafRuntimeBuilder, RegistrationKind, StatusSink};
///
/// let caf = CafRuntimeBuilder::new().build();
/// let token = caf.report(caf.register(64, RegistrationKind::CoarrayAlloc), None).unwrap();
/// let mut stat = -1;
/// caf.report(caf.sync_all(), Some(&mut StatusSink::stat_only(&mut stat)));
/// assert_eq!(stat, 0);
/// caf.report(caf.deregister(token), None);
/// caf.finalize();
///```
pub struct CafRuntime {
    builder: Mutex<LamellaeBuilder>,
    expected_image: usize,
    expected_num_images: usize,
    registry: OnceLock<ImageRegistry>,
    finalized: AtomicBool,
    state: Mutex<CafState>,
}

impl std::fmt::Debug for CafRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CafRuntime")
            .field("registry", &self.registry.get())
            .field("finalized", &self.finalized.load(Ordering::Relaxed))
            .finish()
    }
}

impl CafRuntime {
    fn registry(&self) -> &ImageRegistry {
        self.registry.get_or_init(|| {
            let mut builder = self.builder.lock();
            let registry = match ImageRegistry::init(&mut builder) {
                Ok(registry) => registry,
                Err(e) => abort::runtime_error(None, self.expected_image, &e.to_string()),
            };
            match SyncState::new(registry.lamellae()) {
                Ok(sync) => self.state.lock().sync = Some(sync),
                Err(e) => abort::runtime_error(
                    Some(registry.lamellae()),
                    registry.this_image(),
                    &e.to_string(),
                ),
            }
            debug!(
                "image {} of {} initialized",
                registry.this_image(),
                registry.num_images()
            );
            registry
        })
    }

    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    // (this_image, num_images); a finalized image never brings up the transport
    fn layout(&self) -> (usize, usize) {
        match self.registry.get() {
            Some(registry) => (registry.this_image(), registry.num_images()),
            None if self.is_finalized() => (self.expected_image, self.expected_num_images),
            None => {
                let registry = self.registry();
                (registry.this_image(), registry.num_images())
            }
        }
    }

    fn check_running(&self, op: CafOp) -> CafResult<&ImageRegistry> {
        if self.is_finalized() {
            return Err(CafError::StoppedImage(op));
        }
        Ok(self.registry())
    }

    /// Bring up the transport and the image registry.
    ///
    /// Collective and idempotent; any other operation calls it implicitly.
    /// Failure to bring up the transport is fatal.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn init(&self) {
        if !self.is_finalized() {
            self.registry();
        }
    }

    /// 1-based index of this image
    pub fn this_image(&self) -> usize {
        self.layout().0
    }

    /// Number of images in the job
    pub fn num_images(&self) -> usize {
        self.layout().1
    }

    /// Register `size` bytes on every image.
    ///
    /// Collective: every image must register the same size in the same order.
    /// The returned token addresses every image's share; this image's own share
    /// is at [local_ptr][CoarrayToken::local_ptr]. Static kinds stay registered
    /// until [finalize][CafRuntime::finalize].
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn register(&self, size: usize, kind: RegistrationKind) -> CafResult<CoarrayToken> {
        let registry = self.check_running(CafOp::Register)?;
        self.state
            .lock()
            .table
            .register(registry.lamellae(), registry.this_image(), size, kind)
    }

    /// Release a registration made by [register][CafRuntime::register].
    ///
    /// Synchronizes all images before freeing this image's share.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn deregister(&self, token: CoarrayToken) -> CafResult<()> {
        let registry = self.check_running(CafOp::Deregister)?;
        sync::sync_all(registry.lamellae());
        let registration = self.state.lock().table.take(&token)?;
        debug!("deregistering {:?} {}", registration.kind(), token.id());
        registration.release(registry.lamellae())
    }

    /// `SYNC ALL`
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn sync_all(&self) -> CafResult<()> {
        let registry = self.check_running(CafOp::SyncAll)?;
        sync::sync_all(registry.lamellae());
        Ok(())
    }

    /// `SYNC IMAGES`: rendezvous with every image in `images`.
    ///
    /// Every listed image must in turn name this image in its own call (directly
    /// or through [Images::AllOthers]), otherwise this call never returns. An
    /// empty list, or a list naming only this image, returns immediately.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn sync_images<'a>(&self, images: impl Into<Images<'a>>) -> CafResult<()> {
        let images = images.into();
        if let Images::List([]) = images {
            return Ok(());
        }
        if self.is_finalized() {
            let (this_image, num_images) = self.layout();
            let trivial = match images {
                Images::AllOthers => num_images == 1,
                Images::List(list) => sync::is_noop(list, this_image),
            };
            return if trivial {
                Ok(())
            } else {
                Err(CafError::StoppedImage(CafOp::SyncImages))
            };
        }
        let registry = self.registry();
        let images = images.resolve(registry);
        if sync::is_noop(images, registry.this_image()) {
            return Ok(());
        }
        let mut state = self.state.lock();
        match state.sync.as_mut() {
            Some(sync) => sync.sync_images(registry, images),
            None => Err(CafError::StoppedImage(CafOp::SyncImages)),
        }
    }

    /// `SYNC MEMORY`: complete this image's outstanding puts.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn sync_memory(&self) -> CafResult<()> {
        let registry = self.check_running(CafOp::SyncMemory)?;
        sync::sync_memory(registry.lamellae());
        Ok(())
    }

    /// Write `data` into `image`'s share of `token`, starting `offset` bytes in.
    ///
    /// With `nonblocking` the put may still be in flight on return; a later
    /// `sync_memory` or `sync_all` completes it.
    pub fn send(
        &self,
        token: &CoarrayToken,
        offset: usize,
        image: usize,
        data: &[u8],
        nonblocking: bool,
    ) -> CafResult<()> {
        let registry = self.check_running(CafOp::Send)?;
        transfer::send(registry.lamellae(), token, offset, image, data, nonblocking)
    }

    /// Read `dst.len()` bytes from `image`'s share of `token`, starting `offset` bytes in.
    pub fn get(&self, token: &CoarrayToken, offset: usize, image: usize, dst: &mut [u8]) -> CafResult<()> {
        let registry = self.check_running(CafOp::Get)?;
        transfer::get(registry.lamellae(), token, offset, image, dst)
    }

    /// Stop this image.
    ///
    /// Collective. Releases every static registration, newest first, then the
    /// transport. Calling it again is a no-op.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(registry) = self.registry.get() else {
            return;
        };
        let lamellae = registry.lamellae();
        sync::sync_all(lamellae);
        if let Err(e) = self.release_all(lamellae) {
            abort::runtime_error(Some(lamellae), registry.this_image(), &e.to_string());
        }
        lamellae.shutdown();
        debug!("image {} finalized", registry.this_image());
    }

    fn release_all(&self, lamellae: &Lamellae) -> CafResult<()> {
        let mut state = self.state.lock();
        let released = state.table.static_list_mut().drain(lamellae)?;
        debug!("released {} static registrations", released);
        if let Some(sync) = state.sync.take() {
            sync.free(lamellae).map_err(CafError::FreeFailed)?;
        }
        Ok(())
    }

    /// Hand the outcome of an operation to the caller's status convention.
    ///
    /// On success the sink's stat is set to `0` and the value returned. A
    /// recoverable error is written to the sink and `None` returned. Without a
    /// sink, or for a fatal error, every image is aborted.
    pub fn report<T>(&self, result: CafResult<T>, sink: Option<&mut StatusSink>) -> Option<T> {
        match result {
            Ok(val) => {
                if let Some(sink) = sink {
                    sink.success();
                }
                Some(val)
            }
            Err(e) => match sink {
                Some(sink) if !e.is_fatal() => {
                    debug!("reporting {:?} with stat {}", e, e.stat());
                    sink.fail(e.stat(), &e.to_string());
                    None
                }
                _ => self.runtime_error(&e.to_string()),
            },
        }
    }

    fn lamellae(&self) -> Option<&Lamellae> {
        self.registry.get().map(|r| r.lamellae())
    }

    fn image_hint(&self) -> usize {
        self.registry
            .get()
            .map_or(self.expected_image, |r| r.this_image())
    }

    /// Print `Coarray runtime error on image <n>: <msg>` and abort every image.
    pub fn runtime_error(&self, msg: &str) -> ! {
        abort::runtime_error(self.lamellae(), self.image_hint(), msg)
    }

    /// `ERROR STOP "msg"`: print the message and abort every image with status 1.
    pub fn error_stop_str(&self, msg: &str) -> ! {
        abort::error_stop_str(self.lamellae(), msg)
    }

    /// `ERROR STOP code`: print the code and abort every image with it.
    pub fn error_stop(&self, code: i32) -> ! {
        abort::error_stop(self.lamellae(), code)
    }

    #[doc(hidden)]
    pub fn outstanding_orders(&self) -> i32 {
        self.state
            .lock()
            .sync
            .as_ref()
            .map_or(0, |s| s.outstanding_orders())
    }

    #[doc(hidden)]
    pub fn num_static_registrations(&self) -> usize {
        self.state.lock().table.static_list().len()
    }

    #[doc(hidden)]
    pub fn num_registrations(&self) -> usize {
        let state = self.state.lock();
        state.table.num_live() + state.table.static_list().len()
    }

    #[doc(hidden)]
    pub fn registered_bytes(&self) -> usize {
        self.lamellae().map_or(0, |l| l.mem_occupied())
    }
}

impl Drop for CafRuntime {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.get() {
            if !self.is_finalized() {
                RuntimeWarning::UnfinalizedDrop(registry.this_image()).print();
                self.finalize();
            }
        }
    }
}

/// An implementation of the Builder design pattern, used to construct the [CafRuntime] of one image.
///
/// Chooses the lamellae [Backend] the image communicates over. By default this
/// is taken from `LAMELLAR_BACKEND`.
///
/// # Examples
///
///```
/// use lamellar_caf::{Backend, CafRuntimeBuilder};
///
/// let caf = CafRuntimeBuilder::new()
///                 .with_lamellae(Backend::Shmem)
///                 .build();
///```
#[derive(Debug)]
pub struct CafRuntimeBuilder {
    backend: Backend,
    fabric: Option<(LocalFabric, usize)>,
}

impl Default for CafRuntimeBuilder {
    fn default() -> Self {
        CafRuntimeBuilder::new()
    }
}

impl CafRuntimeBuilder {
    /// Construct a new builder
    #[tracing::instrument(skip_all)]
    pub fn new() -> CafRuntimeBuilder {
        CafRuntimeBuilder {
            backend: Default::default(),
            fabric: None,
        }
    }

    /// Specify the lamellae backend to use for this execution
    #[tracing::instrument(skip_all)]
    pub fn with_lamellae(mut self, backend: Backend) -> CafRuntimeBuilder {
        self.backend = backend;
        self.fabric = None;
        self
    }

    /// Run as image `pe + 1` of an in-process [LocalFabric]
    #[tracing::instrument(skip_all)]
    pub fn with_local_fabric(mut self, fabric: LocalFabric, pe: usize) -> CafRuntimeBuilder {
        self.backend = Backend::Local;
        self.fabric = Some((fabric, pe));
        self
    }

    /// Build the runtime; the transport itself comes up on first use
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> CafRuntime {
        let (builder, expected_image, expected_num_images) = match self.fabric {
            Some((fabric, pe)) => {
                let num_pes = fabric.num_pes();
                (
                    LamellaeBuilder::LocalBuilder(LocalBuilder::new(fabric, pe)),
                    pe + 1,
                    num_pes,
                )
            }
            None => {
                let (expected_image, expected_num_images) = match self.backend {
                    Backend::Shmem => (config().pe_id + 1, config().num_pes),
                    Backend::Local => (1, 1),
                };
                (
                    create_lamellae(self.backend),
                    expected_image,
                    expected_num_images,
                )
            }
        };
        CafRuntime {
            builder: Mutex::new(builder),
            expected_image,
            expected_num_images,
            registry: OnceLock::new(),
            finalized: AtomicBool::new(false),
            state: Mutex::new(CafState::default()),
        }
    }
}
