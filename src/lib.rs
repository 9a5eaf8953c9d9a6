//! Lamellar CAF is a coarray (PGAS) runtime backend built on the Lamellae transports of the Lamellar runtime.
//!
//! A program is run as `N` images, each owning one [CafRuntime]. Images register symmetric memory
//! (the same number of bytes on every image, addressed through a [CoarrayToken]), write into each
//! other's shares with one-sided puts, and synchronize either globally ([sync_all][CafRuntime::sync_all])
//! or with an arbitrary, per-image set of partners ([sync_images][CafRuntime::sync_images]).
//!
//! Two Lamellae exist, one running every image inside a single process ("local"), and one for single
//! node, multi-process jobs over shared memory ("shmem").
//!
//! Environment Variables
//! ---------------------
//! See [Config] for the full list; the most relevant are
//! - `LAMELLAR_BACKEND` -- `local` (default) or `shmem`
//! - `LAMELLAR_NUM_PES`, `LAMELLAR_PE_ID`, `LAMELLAR_JOB_ID` -- job layout for the shmem lamellae
//! - `LAMELLAR_DEADLOCK_TIMEOUT` -- seconds before a stalled SYNC IMAGES prints a warning
//!
//! EXAMPLES
//! --------
//!
//! # Several images inside one process
//! ```
//! use lamellar_caf::{CafRuntimeBuilder, Images, LocalFabric, RegistrationKind};
//!
//! let fabric = LocalFabric::new(4);
//! let images: Vec<_> = (0..4)
//!     .map(|pe| {
//!         let fabric = fabric.clone();
//!         std::thread::spawn(move || {
//!             let caf = CafRuntimeBuilder::new().with_local_fabric(fabric, pe).build();
//!             let token = caf.register(8, RegistrationKind::CoarrayStatic).unwrap();
//!             let right = caf.this_image() % caf.num_images() + 1;
//!             caf.send(&token, 0, right, &(caf.this_image() as u64).to_ne_bytes(), false).unwrap();
//!             caf.sync_images(Images::AllOthers).unwrap();
//!             caf.finalize();
//!         })
//!     })
//!     .collect();
//! for image in images {
//!     image.join().unwrap();
//! }
//! ```

mod abort;
mod caf_runtime;
mod env_var;
mod error;
mod image;
mod lamellae;
mod registration;
mod status;
mod symmetric;
mod sync;
mod token;
mod transfer;
mod warnings;

pub use crate::caf_runtime::{CafRuntime, CafRuntimeBuilder};
pub use crate::env_var::{config, Config};
pub use crate::error::{CafError, CafOp, CafResult, STAT_FAILED, STAT_STOPPED_IMAGE};
pub use crate::lamellae::{AllocError, Backend, LocalFabric, RdmaError};
pub use crate::status::StatusSink;
pub use crate::sync::Images;
pub use crate::token::{CoarrayToken, RegistrationKind};
