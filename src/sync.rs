use crate::image::ImageRegistry;
use crate::lamellae::{AllocResult, Lamellae, LamellaeComm};
use crate::symmetric::SymmetricArray;
use crate::warnings::RuntimeWarning;
use crate::{config, CafError, CafOp, CafResult};

use std::time::Instant;
use tracing::trace;

/// The partner set of a [sync_images][crate::CafRuntime::sync_images] call.
#[derive(Debug, Clone, Copy)]
pub enum Images<'a> {
    /// Every image except this one (`SYNC IMAGES (*)`)
    AllOthers,
    /// An explicit list of 1-based image indices
    List(&'a [usize]),
}

impl<'a> Images<'a> {
    pub(crate) fn resolve<'b>(self, registry: &'b ImageRegistry) -> &'b [usize]
    where
        'a: 'b,
    {
        match self {
            Images::AllOthers => registry.images_full(),
            Images::List(list) => list,
        }
    }
}

/// An empty set, or only this image, needs no rendezvous.
pub(crate) fn is_noop(images: &[usize], this_image: usize) -> bool {
    images.is_empty() || (images.len() == 1 && images[0] == this_image)
}

impl<'a> From<&'a [usize]> for Images<'a> {
    fn from(list: &'a [usize]) -> Self {
        Images::List(list)
    }
}

impl<'a, const N: usize> From<&'a [usize; N]> for Images<'a> {
    fn from(list: &'a [usize; N]) -> Self {
        Images::List(list)
    }
}

/// Rendezvous bookkeeping for `sync_images`.
///
/// `orders[k]` counts the signals this image still expects from image `k + 1`.
/// `arrived` row `x` lives on image `x + 1` and slot `y` counts the signals
/// image `y + 1` sent there that have not been consumed yet.
#[derive(Debug)]
pub(crate) struct SyncState {
    orders: Vec<i32>,
    arrived: SymmetricArray,
}

impl SyncState {
    /// Collective; ends with a barrier so no peer can signal into a row that is not zeroed yet.
    pub(crate) fn new(lamellae: &Lamellae) -> CafResult<SyncState> {
        let num_pes = lamellae.num_pes();
        let arrived = SymmetricArray::new(lamellae, num_pes).map_err(CafError::Init)?;
        arrived
            .zero_local_row(lamellae)
            .map_err(|e| CafError::Transport(CafOp::SyncImages, e))?;
        lamellae.barrier();
        Ok(SyncState {
            orders: vec![0; num_pes],
            arrived,
        })
    }

    pub(crate) fn outstanding_orders(&self) -> i32 {
        self.orders.iter().sum()
    }

    pub(crate) fn free(self, lamellae: &Lamellae) -> AllocResult<()> {
        self.arrived.free(lamellae)
    }

    pub(crate) fn sync_images(&mut self, registry: &ImageRegistry, images: &[usize]) -> CafResult<()> {
        let this_image = registry.this_image();
        if is_noop(images, this_image) {
            return Ok(());
        }
        if let Some(&image) = images
            .iter()
            .find(|&&i| i == 0 || i > registry.num_images())
        {
            return Err(CafError::InvalidImage {
                op: CafOp::SyncImages,
                image,
                num_images: registry.num_images(),
            });
        }

        let lamellae = registry.lamellae();
        let me = this_image - 1;
        for &image in images {
            self.orders[image - 1] += 1;
        }
        for &image in images {
            self.arrived
                .increment(lamellae, image - 1, me)
                .map_err(|e| CafError::Transport(CafOp::SyncImages, e))?;
            trace!("image {} signaled image {}", this_image, image);
        }

        let mut start = Instant::now();
        loop {
            let outstanding = self
                .arrived
                .consume(lamellae, &mut self.orders)
                .map_err(|e| CafError::Transport(CafOp::SyncImages, e))?;
            if outstanding == 0 {
                break;
            }
            std::thread::yield_now();
            lamellae.progress();
            if start.elapsed().as_secs_f64() > config().deadlock_timeout {
                let pending = self.pending_images();
                RuntimeWarning::SyncImagesTimeout(start.elapsed().as_secs_f64(), &pending).print();
                start = Instant::now();
            }
        }
        Ok(())
    }

    fn pending_images(&self) -> Vec<usize> {
        self.orders
            .iter()
            .enumerate()
            .filter(|(_, o)| **o != 0)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// `SYNC ALL`: complete outstanding puts, then wait for every image.
pub(crate) fn sync_all(lamellae: &Lamellae) {
    lamellae.fence();
    lamellae.barrier();
}

/// `SYNC MEMORY`: complete outstanding puts without waiting for anyone.
pub(crate) fn sync_memory(lamellae: &Lamellae) {
    lamellae.fence();
}
