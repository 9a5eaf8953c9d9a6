use crate::lamellae::{Lamellae, LamellaeBuilder, LamellaeComm, LamellaeInit};
use crate::{CafError, CafResult};

use std::sync::Arc;
use tracing::debug;

/// Identity and membership of this image, fixed once the transport is up.
#[derive(Debug)]
pub(crate) struct ImageRegistry {
    this_image: usize,
    num_images: usize,
    images_full: Vec<usize>,
    pub(crate) lamellae: Arc<Lamellae>,
}

impl ImageRegistry {
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn init(builder: &mut LamellaeBuilder) -> CafResult<ImageRegistry> {
        let (my_pe, num_pes) = builder.init_fabric().map_err(CafError::Init)?;
        let lamellae = builder.init_lamellae().map_err(CafError::Init)?;
        debug!(
            "image {} of {} up on {:?} with {} mutex slots",
            my_pe + 1,
            num_pes,
            lamellae.backend(),
            lamellae.num_pes()
        );
        Ok(ImageRegistry::new(lamellae))
    }

    pub(crate) fn new(lamellae: Arc<Lamellae>) -> ImageRegistry {
        let this_image = lamellae.my_pe() + 1;
        let num_images = lamellae.num_pes();
        ImageRegistry {
            this_image,
            num_images,
            images_full: peer_images(this_image, num_images),
            lamellae,
        }
    }

    pub(crate) fn this_image(&self) -> usize {
        self.this_image
    }

    pub(crate) fn num_images(&self) -> usize {
        self.num_images
    }

    /// Every image except this one, ascending.
    pub(crate) fn images_full(&self) -> &[usize] {
        &self.images_full
    }

    pub(crate) fn lamellae(&self) -> &Lamellae {
        &self.lamellae
    }
}

fn peer_images(this_image: usize, num_images: usize) -> Vec<usize> {
    (1..=num_images).filter(|&i| i != this_image).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::local_lamellae::LocalBuilder;
    use crate::LocalFabric;

    #[test]
    fn peer_list_skips_this_image() {
        assert_eq!(peer_images(1, 1), Vec::<usize>::new());
        assert_eq!(peer_images(1, 4), vec![2, 3, 4]);
        assert_eq!(peer_images(3, 4), vec![1, 2, 4]);
        assert_eq!(peer_images(4, 4), vec![1, 2, 3]);
    }

    #[test]
    fn registry_from_local_fabric() {
        let fabric = LocalFabric::new(5);
        for pe in 0..5 {
            let mut builder = LamellaeBuilder::LocalBuilder(LocalBuilder::new(fabric.clone(), pe));
            let registry = ImageRegistry::init(&mut builder).unwrap();
            assert_eq!(registry.this_image(), pe + 1);
            assert_eq!(registry.num_images(), 5);
            let expected = (1..=5).filter(|&i| i != pe + 1).collect::<Vec<_>>();
            assert_eq!(registry.images_full(), expected.as_slice());
        }
    }
}
